use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Default value functions for serde
fn default_true() -> bool {
    true
}

/// Top-level configuration for a formatting deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamOpsConfig {
    #[serde(default)]
    pub formatting: FormattingConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub job: JobConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormattingConfig {
    /// Pipeline configuration - defines which rules to run and in what order
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// List of rules to run in order
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Name of the rule
    pub name: String,
    /// Whether this rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleConfig {
    pub fn enabled(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                RuleConfig::enabled("HeaderFooter"),
                RuleConfig::enabled("Margins"),
                RuleConfig::enabled("Numbering"),
                RuleConfig::enabled("MarksNotation"),
                RuleConfig::enabled("ColonSpacing"),
                RuleConfig::enabled("Indentation"),
            ],
        }
    }
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "EXAMOPS_SCORER_API_KEY".to_string()
}

fn default_scorer_timeout_secs() -> u64 {
    30
}

fn default_max_document_chars() -> usize {
    4000
}

fn default_temperature() -> f32 {
    0.1
}

/// Advisory scorer settings. Without an endpoint every job completes in fallback mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Chat-completions URL; `None` disables scoring
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_scorer_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-document character budget in the scoring prompt
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: default_deployment(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_scorer_timeout_secs(),
            max_document_chars: default_max_document_chars(),
            temperature: default_temperature(),
        }
    }
}

fn default_context_lines() -> usize {
    3
}

fn default_max_diff_cells() -> usize {
    4_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Unchanged lines shown around each hunk
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    /// Ceiling on original_lines * formatted_lines before diffing is refused
    #[serde(default = "default_max_diff_cells")]
    pub max_diff_cells: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            context_lines: default_context_lines(),
            max_diff_cells: default_max_diff_cells(),
        }
    }
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Base URL under which the output directory is published
    #[serde(default)]
    pub share_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            template_dir: default_template_dir(),
            output_dir: default_output_dir(),
            share_base_url: None,
        }
    }
}

fn default_template_query() -> String {
    "exam paper formatting rules".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Query used to look up the template when a request does not name one
    #[serde(default = "default_template_query")]
    pub template_query: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            template_query: default_template_query(),
        }
    }
}

impl ExamOpsConfig {
    /// Load config from a YAML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ExamOpsConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load config with fallback to default
    pub fn load_with_fallback(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                tracing::warn!(path = %p.display(), error = %e, "failed to load config, using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
