use crate::preprocessors::{DocxPreprocessor, DocxWriter, Preprocessor};
use crate::types::{Document, OutputLocations, TemplateRules};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{local_path, DocumentSource, OutputStore, ShareLinkService, SourceError, StoreError, TemplateStore};

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn file_uri(path: &Path) -> String {
    let absolute = tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

/// Run filesystem or CPU-bound work off the async worker threads
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| StoreError::Unavailable(format!("blocking task failed: {err}")))?
}

/// Reads `.docx` files from the local filesystem
pub struct DocxFileSource;

#[async_trait]
impl DocumentSource for DocxFileSource {
    async fn load(&self, location: &str) -> Result<Document, SourceError> {
        let path = PathBuf::from(local_path(location));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(location.to_string()))
            }
            Err(source) => {
                return Err(SourceError::Io {
                    location: location.to_string(),
                    source,
                })
            }
        };
        debug!(location, bytes = bytes.len(), "read input document");

        // Unzipping and XML parsing are CPU-bound
        let document = tokio::task::spawn_blocking(move || DocxPreprocessor.process(&bytes))
            .await
            .map_err(|err| SourceError::Join(err.to_string()))??;
        Ok(document)
    }
}

/// Directory of YAML/JSON template files, searched by word overlap
pub struct FileTemplateStore {
    dir: PathBuf,
}

impl FileTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// All readable templates, sorted by file name
    pub async fn load_all(&self) -> Result<Vec<(String, TemplateRules)>, StoreError> {
        let dir = self.dir.clone();
        blocking(move || load_dir(&dir)).await
    }
}

fn load_dir(dir: &Path) -> Result<Vec<(String, TemplateRules)>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|err| io_error(dir, err))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| template_format(path).is_some())
        .collect();
    paths.sort();

    let mut templates = Vec::with_capacity(paths.len());
    for path in paths {
        match load_template(&path) {
            Ok(rules) => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                templates.push((file_name, rules));
            }
            // One broken file should not hide the others
            Err(err) => warn!(error = %err, "skipping template"),
        }
    }
    Ok(templates)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateFormat {
    Yaml,
    Json,
}

fn template_format(path: &Path) -> Option<TemplateFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => Some(TemplateFormat::Yaml),
        "json" => Some(TemplateFormat::Json),
        _ => None,
    }
}

pub fn load_template(path: &Path) -> Result<TemplateRules, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|err| io_error(path, err))?;
    let malformed = |message: String| StoreError::MalformedTemplate {
        path: path.display().to_string(),
        message,
    };

    let mut rules: TemplateRules = match template_format(path) {
        Some(TemplateFormat::Json) => {
            serde_json::from_str(&content).map_err(|err| malformed(err.to_string()))?
        }
        _ => serde_yaml::from_str(&content).map_err(|err| malformed(err.to_string()))?,
    };
    if rules.id.is_empty() {
        rules.id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(rules)
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Number of distinct query terms found in the template's title, id or header
fn overlap(query_terms: &BTreeSet<String>, rules: &TemplateRules) -> usize {
    let haystack: BTreeSet<String> = [&rules.title, &rules.id, &rules.header_text]
        .into_iter()
        .flat_map(|field| terms(field))
        .collect();
    query_terms.intersection(&haystack).count()
}

#[async_trait]
impl TemplateStore for FileTemplateStore {
    async fn find(&self, query: &str) -> Result<Option<TemplateRules>, StoreError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(None);
        }

        let templates = self.load_all().await?;
        let mut best: Option<(usize, &str, &TemplateRules)> = None;
        // Sorted by file name, so strict `>` keeps the first on ties
        for (file_name, rules) in &templates {
            let score = overlap(&query_terms, rules);
            if score > 0 && best.map_or(true, |(top, _, _)| score > top) {
                best = Some((score, file_name.as_str(), rules));
            }
        }

        match best {
            Some((score, file_name, rules)) => {
                info!(query, template = file_name, score, "template matched");
                Ok(Some(rules.clone()))
            }
            None => {
                info!(query, searched = templates.len(), "no template matched");
                Ok(None)
            }
        }
    }
}

/// Writes job outputs into a local directory
pub struct FileOutputStore {
    dir: PathBuf,
}

impl FileOutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Job ids become file names; keep them to a safe alphabet
fn file_stem_for(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl OutputStore for FileOutputStore {
    async fn save(
        &self,
        job_id: &str,
        document: &Document,
        report_html: &str,
    ) -> Result<OutputLocations, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| io_error(&self.dir, err))?;

        let stem = file_stem_for(job_id);
        let document_path = self.dir.join(format!("{stem}_formatted.docx"));
        let report_path = self.dir.join(format!("{stem}_diff.html"));

        let document = document.clone();
        let bytes = blocking(move || Ok(DocxWriter.to_bytes(&document)?)).await?;
        tokio::fs::write(&document_path, &bytes)
            .await
            .map_err(|err| io_error(&document_path, err))?;
        tokio::fs::write(&report_path, report_html)
            .await
            .map_err(|err| io_error(&report_path, err))?;

        info!(job_id, document = %document_path.display(), "outputs saved");
        Ok(OutputLocations {
            document: file_uri(&document_path).await,
            report: file_uri(&report_path).await,
        })
    }
}

/// Publishes outputs under a fixed base URL, e.g. a static file server
/// fronting the output directory
pub struct BaseUrlShareLinks {
    base_url: String,
}

impl BaseUrlShareLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ShareLinkService for BaseUrlShareLinks {
    async fn create_link(&self, location: &str) -> Result<String, StoreError> {
        let file_name = Path::new(local_path(location))
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::Unavailable(format!("no file name in {location}")))?;
        Ok(format!("{}/{}", self.base_url, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn best_overlap_wins() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a_generic.yaml", "title: Generic memo rules\n");
        write(
            dir.path(),
            "b_exam.yaml",
            "title: Exam paper formatting rules\nheader_text: SOUTHERN UNIVERSITY COLLEGE\n",
        );
        write(dir.path(), "notes.txt", "title: exam paper formatting rules\n");

        let store = FileTemplateStore::new(dir.path());
        let rules = store.find("exam paper formatting rules").await.unwrap().unwrap();

        assert_eq!(rules.title, "Exam paper formatting rules");
        assert_eq!(rules.id, "b_exam");
    }

    #[tokio::test]
    async fn ties_go_to_the_first_file_name() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "z.json", r#"{"id": "z", "title": "Exam rules"}"#);
        write(dir.path(), "m.yml", "id: m\ntitle: Exam rules\n");

        let rules = FileTemplateStore::new(dir.path()).find("exam").await.unwrap().unwrap();
        assert_eq!(rules.id, "m");
    }

    #[tokio::test]
    async fn no_overlap_is_none() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "exam.yaml", "title: Exam rules\n");
        let store = FileTemplateStore::new(dir.path());

        assert!(store.find("quarterly budget").await.unwrap().is_none());
        assert!(store.find("  ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_templates_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.yaml", "colon_spacing: [not, a, bool]\n");
        write(dir.path(), "good.yaml", "title: Exam rules\n");

        let rules = FileTemplateStore::new(dir.path()).find("exam").await.unwrap().unwrap();
        assert_eq!(rules.id, "good");
    }

    #[tokio::test]
    async fn missing_template_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileTemplateStore::new(dir.path().join("absent"));
        assert!(matches!(store.find("exam").await, Err(StoreError::Io { .. })));
    }

    #[tokio::test]
    async fn outputs_round_trip_through_the_file_source() {
        let dir = TempDir::new().unwrap();
        let store = FileOutputStore::new(dir.path().join("out"));
        let document = Document::from_texts(["Q1.  Explain (2 marks)"]);

        let locations = store.save("job/42", &document, "<html></html>").await.unwrap();

        assert!(locations.document.starts_with("file://"));
        assert!(locations.document.ends_with("job_42_formatted.docx"));
        assert!(locations.report.ends_with("job_42_diff.html"));

        let loaded = DocxFileSource.load(&locations.document).await.unwrap();
        assert_eq!(loaded.text_lines(), vec!["Q1.  Explain (2 marks)"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn lookups_and_saves_share_a_single_worker() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "exam.yaml", "title: Exam rules\n");
        let templates = std::sync::Arc::new(FileTemplateStore::new(dir.path()));
        let outputs = std::sync::Arc::new(FileOutputStore::new(dir.path().join("out")));

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..8 {
            let templates = templates.clone();
            let outputs = outputs.clone();
            tasks.spawn(async move {
                let rules = templates.find("exam").await.unwrap().unwrap();
                let document = Document::from_texts([format!("Q{n}.  Explain (2 marks)")]);
                let saved = outputs.save(&format!("job-{n}"), &document, "").await.unwrap();
                (rules.id, saved.document)
            });
        }

        let mut finished = 0;
        while let Some(result) = tasks.join_next().await {
            let (id, document) = result.unwrap();
            assert_eq!(id, "exam");
            assert!(document.ends_with("_formatted.docx"));
            finished += 1;
        }
        assert_eq!(finished, 8);
        assert_eq!(templates.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_and_corrupt_inputs_are_distinguished() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.docx");
        let corrupt = dir.path().join("corrupt.docx");
        std::fs::write(&corrupt, b"not a zip").unwrap();

        let err = DocxFileSource.load(&missing.display().to_string()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));

        let err = DocxFileSource.load(&corrupt.display().to_string()).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn share_links_use_the_file_name() {
        let links = BaseUrlShareLinks::new("https://files.example.edu/exams/");
        let link = links.create_link("file:///srv/out/abc_formatted.docx").await.unwrap();
        assert_eq!(link, "https://files.example.edu/exams/abc_formatted.docx");
    }
}
