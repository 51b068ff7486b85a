// In-memory collaborators, for tests and embedding

use crate::types::{Document, OutputLocations, TemplateRules};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{DocumentSource, OutputStore, SourceError, StoreError, TemplateStore};

#[derive(Default)]
pub struct MemoryDocumentSource {
    documents: HashMap<String, Document>,
}

impl MemoryDocumentSource {
    pub fn with_document(mut self, location: impl Into<String>, document: Document) -> Self {
        self.documents.insert(location.into(), document);
        self
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn load(&self, location: &str) -> Result<Document, SourceError> {
        self.documents
            .get(location)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(location.to_string()))
    }
}

/// Returns the same answer for every query
pub enum MemoryTemplateStore {
    Found(TemplateRules),
    Empty,
    Failing(String),
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn find(&self, _query: &str) -> Result<Option<TemplateRules>, StoreError> {
        match self {
            MemoryTemplateStore::Found(rules) => Ok(Some(rules.clone())),
            MemoryTemplateStore::Empty => Ok(None),
            MemoryTemplateStore::Failing(message) => Err(StoreError::Unavailable(message.clone())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SavedOutput {
    pub document: Document,
    pub report_html: String,
}

/// Keeps saved outputs keyed by job id under `memory://` locations
#[derive(Default)]
pub struct MemoryOutputStore {
    saved: Mutex<HashMap<String, SavedOutput>>,
    fail_with: Option<String>,
}

impl MemoryOutputStore {
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            saved: Mutex::default(),
            fail_with: Some(message.into()),
        }
    }

    pub fn saved(&self, job_id: &str) -> Option<SavedOutput> {
        self.saved.lock().ok()?.get(job_id).cloned()
    }
}

#[async_trait]
impl OutputStore for MemoryOutputStore {
    async fn save(
        &self,
        job_id: &str,
        document: &Document,
        report_html: &str,
    ) -> Result<OutputLocations, StoreError> {
        if let Some(message) = &self.fail_with {
            return Err(StoreError::Unavailable(message.clone()));
        }
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| StoreError::Unavailable("output store lock poisoned".to_string()))?;
        saved.insert(
            job_id.to_string(),
            SavedOutput {
                document: document.clone(),
                report_html: report_html.to_string(),
            },
        );
        Ok(OutputLocations {
            document: format!("memory://{job_id}/formatted.docx"),
            report: format!("memory://{job_id}/diff.html"),
        })
    }
}
