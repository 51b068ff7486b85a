// Compliance Scorer: advisory, best-effort scoring of a formatted document.
// A scorer never fails; any backend problem yields a fallback ValidationResult.

pub mod advisory;
pub mod backend;
pub mod prompt;

pub use advisory::{parse_response, AdvisoryScorer};
pub use backend::{DisabledBackend, HttpScoringBackend, ScoringBackend, ScoringRequest};

use crate::types::{Document, TemplateRules, ValidationResult};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring backend is not configured")]
    Disabled,

    #[error("API key variable {0} is not set")]
    MissingApiKey(String),

    #[error("scoring request failed: {0}")]
    Http(String),

    #[error("scoring request timed out after {0:?}")]
    Timeout(Duration),

    #[error("scoring task aborted: {0}")]
    Join(String),

    #[error("invalid scoring response: {0}")]
    InvalidResponse(String),

    #[error("compliance score {0} outside 0-100")]
    ScoreOutOfRange(f64),
}

#[async_trait]
pub trait ComplianceScorer: Send + Sync {
    /// Score `transformed` against `template`. Never fails.
    async fn score(
        &self,
        original: &Document,
        transformed: &Document,
        template: &TemplateRules,
    ) -> ValidationResult;
}
