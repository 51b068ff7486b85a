use crate::config::ScorerConfig;
use crate::types::{Document, TemplateRules, ValidationResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::backend::{DisabledBackend, HttpScoringBackend, ScoringBackend};
use super::prompt::build_request;
use super::{ComplianceScorer, ScoringError};

/// Wire shape the backend must return. Any other field is rejected.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScorerResponse {
    compliance_score: f64,
    category_scores: BTreeMap<String, f64>,
    issues_found: Vec<String>,
    edge_cases: Vec<String>,
    math_expressions_preserved: bool,
    summary: String,
}

/// Parse a backend response into a scored ValidationResult
pub fn parse_response(raw: &str) -> Result<ValidationResult, ScoringError> {
    let response: ScorerResponse = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| ScoringError::InvalidResponse(e.to_string()))?;

    let score = response.compliance_score;
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(ScoringError::ScoreOutOfRange(score));
    }

    Ok(ValidationResult::scored(
        score,
        response.category_scores,
        response.issues_found,
        response.edge_cases,
        response.math_expressions_preserved,
        response.summary,
    ))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Scorer that degrades to fallback mode on any backend problem
pub struct AdvisoryScorer {
    backend: Arc<dyn ScoringBackend>,
    timeout: Duration,
    max_document_chars: usize,
}

impl AdvisoryScorer {
    pub fn new(backend: Arc<dyn ScoringBackend>, timeout: Duration, max_document_chars: usize) -> Self {
        Self {
            backend,
            timeout,
            max_document_chars,
        }
    }

    /// HTTP backend when an endpoint and key are configured, otherwise a
    /// scorer that always falls back
    pub fn from_config(config: &ScorerConfig) -> Self {
        let backend: Arc<dyn ScoringBackend> = match HttpScoringBackend::from_config(config) {
            Ok(Some(http)) => Arc::new(http),
            Ok(None) => Arc::new(DisabledBackend),
            Err(e) => {
                warn!(error = %e, "scorer endpoint configured but unusable");
                Arc::new(DisabledBackend)
            }
        };
        Self::new(
            backend,
            Duration::from_secs(config.timeout_secs),
            config.max_document_chars,
        )
    }

    async fn try_score(
        &self,
        original: &Document,
        transformed: &Document,
        template: &TemplateRules,
    ) -> Result<ValidationResult, ScoringError> {
        let request = build_request(original, transformed, template, self.max_document_chars);
        let raw = match tokio::time::timeout(self.timeout, self.backend.complete(&request)).await {
            Ok(result) => result?,
            Err(_) => return Err(ScoringError::Timeout(self.timeout)),
        };
        parse_response(&raw)
    }
}

#[async_trait]
impl ComplianceScorer for AdvisoryScorer {
    async fn score(
        &self,
        original: &Document,
        transformed: &Document,
        template: &TemplateRules,
    ) -> ValidationResult {
        match self.try_score(original, transformed, template).await {
            Ok(result) => {
                info!(score = ?result.compliance_score, issues = result.issues_found.len(), "compliance scored");
                result
            }
            Err(e) => {
                warn!(error = %e, "compliance scorer unavailable, continuing in fallback mode");
                ValidationResult::fallback(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::backend::{DisabledBackend, ScoringRequest};

    struct CannedBackend(String);

    #[async_trait]
    impl ScoringBackend for CannedBackend {
        async fn complete(&self, _request: &ScoringRequest) -> Result<String, ScoringError> {
            Ok(self.0.clone())
        }
    }

    struct StalledBackend;

    #[async_trait]
    impl ScoringBackend for StalledBackend {
        async fn complete(&self, _request: &ScoringRequest) -> Result<String, ScoringError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    const VALID: &str = r#"{
        "compliance_score": 92.5,
        "category_scores": {"numbering": 100, "marks": 85},
        "issues_found": ["Indentation of (ii) inconsistent"],
        "edge_cases": [],
        "math_expressions_preserved": true,
        "summary": "Mostly compliant."
    }"#;

    fn scorer(backend: impl ScoringBackend + 'static) -> AdvisoryScorer {
        AdvisoryScorer::new(Arc::new(backend), Duration::from_millis(200), 4000)
    }

    async fn score_with(scorer: &AdvisoryScorer) -> ValidationResult {
        let document = Document::from_texts(["Q1.  Explain"]);
        scorer.score(&document, &document, &TemplateRules::default()).await
    }

    #[test]
    fn valid_response_is_parsed() {
        let result = parse_response(VALID).unwrap();
        assert_eq!(result.compliance_score, Some(92.5));
        assert_eq!(result.category_scores["marks"], 85.0);
        assert!(!result.fallback_mode);
        assert!(result.error.is_none());
    }

    #[test]
    fn fenced_response_is_accepted() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert_eq!(parse_response(&fenced).unwrap().compliance_score, Some(92.5));
    }

    #[test]
    fn unknown_or_missing_fields_are_rejected() {
        let extra = VALID.replace("\"edge_cases\": []", "\"edge_cases\": [], \"mood\": \"happy\"");
        assert!(matches!(parse_response(&extra), Err(ScoringError::InvalidResponse(_))));

        let missing = r#"{"compliance_score": 50}"#;
        assert!(matches!(parse_response(missing), Err(ScoringError::InvalidResponse(_))));
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let high = VALID.replace("92.5", "140");
        assert!(matches!(parse_response(&high), Err(ScoringError::ScoreOutOfRange(_))));
    }

    #[tokio::test]
    async fn backend_failure_yields_fallback() {
        let result = score_with(&scorer(DisabledBackend)).await;
        assert_eq!(result.compliance_score, None);
        assert!(result.fallback_mode);
        assert!(result.math_preserved);
        assert!(result.error.is_some());
        assert_eq!(result.summary, "Compliance validation unavailable.");
    }

    #[tokio::test]
    async fn timeout_yields_fallback() {
        let result = score_with(&scorer(StalledBackend)).await;
        assert!(result.fallback_mode);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn malformed_json_yields_fallback() {
        let result = score_with(&scorer(CannedBackend("not json".to_string()))).await;
        assert!(result.fallback_mode);
        assert_eq!(result.compliance_score, None);
    }

    #[tokio::test]
    async fn successful_backend_yields_score() {
        let result = score_with(&scorer(CannedBackend(VALID.to_string()))).await;
        assert_eq!(result.compliance_score, Some(92.5));
        assert_eq!(result.issues_found.len(), 1);
    }
}
