// Storage collaborators for the job pipeline
//
// Each stage that touches the outside world goes through one of these traits,
// so the orchestrator can run against local files, a remote store, or the
// in-memory doubles used by tests.

pub mod fs;
pub mod memory;

use crate::preprocessors::DocxError;
use crate::types::{Document, OutputLocations, TemplateRules};
use async_trait::async_trait;
use thiserror::Error;

pub use fs::{BaseUrlShareLinks, DocxFileSource, FileOutputStore, FileTemplateStore};
pub use memory::{MemoryDocumentSource, MemoryOutputStore, MemoryTemplateStore};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid document: {0}")]
    InvalidDocument(#[from] DocxError),

    #[error("loader task failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template {path} is malformed: {message}")]
    MalformedTemplate { path: String, message: String },

    #[error("failed to encode document: {0}")]
    Encode(#[from] DocxError),

    #[error("share links are not configured")]
    SharingDisabled,

    #[error("{0}")]
    Unavailable(String),
}

/// Fetches the input document for a job
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self, location: &str) -> Result<Document, SourceError>;
}

/// Finds the formatting rules best matching a free-text query
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find(&self, query: &str) -> Result<Option<TemplateRules>, StoreError>;
}

/// Persists the formatted document and its diff report
#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn save(
        &self,
        job_id: &str,
        document: &Document,
        report_html: &str,
    ) -> Result<OutputLocations, StoreError>;
}

/// Turns a persisted location into a link the requester can open
#[async_trait]
pub trait ShareLinkService: Send + Sync {
    async fn create_link(&self, location: &str) -> Result<String, StoreError>;
}

/// Share-link service for deployments without a public URL
pub struct NoShareLinks;

#[async_trait]
impl ShareLinkService for NoShareLinks {
    async fn create_link(&self, _location: &str) -> Result<String, StoreError> {
        Err(StoreError::SharingDisabled)
    }
}

/// Strip a `file://` scheme, leaving plain paths untouched
pub fn local_path(location: &str) -> &str {
    location.strip_prefix("file://").unwrap_or(location)
}
