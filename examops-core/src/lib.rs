// ExamOps Core Library
//
// Formats exam-paper documents against an institution's template: a
// deterministic rule engine rewrites the document, an advisory scorer grades
// the result, and the job processor ties loading, formatting, reporting and
// saving together.

pub mod types;
pub mod preprocessors;
pub mod processor;
pub mod config;
pub mod rules;
pub mod scoring;
pub mod report;
pub mod storage;
pub mod template;

// Re-export main types and functions for easy use
pub use types::*;
pub use preprocessors::{DocxPreprocessor, DocxWriter, Preprocessor};
pub use processor::{JobProcessor, JobRequest, ToolDispatcher};
pub use config::ExamOpsConfig;
pub use rules::RuleEngine;
pub use template::extract_template_rules;
