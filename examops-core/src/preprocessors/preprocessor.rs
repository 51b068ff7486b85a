// Preprocessor abstraction for document loading
//
// This module defines the boundary between package handling (bytes -> markup
// parts) and the document model the Rule Engine works on. Everything after
// `process` is format-agnostic and works with `Document`.

use crate::types::Document;
use std::path::Path;

use super::docx::DocxError;

/// Preprocessor trait - converts document packages to a `Document`
///
/// The preprocessing happens in two clear steps:
/// 1. Package bytes -> markup (e.g. DOCX zip -> XML parts)
/// 2. Markup -> Document (paragraphs, runs, sections)
pub trait Preprocessor {
    /// Intermediate markup produced by step 1
    type Markup;

    /// Step 1: unpack the raw package into its markup parts
    fn extract_markup(&self, bytes: &[u8]) -> Result<Self::Markup, DocxError>;

    /// Step 2: parse markup into the document model
    fn parse_markup(&self, markup: &Self::Markup) -> Result<Document, DocxError>;

    /// Full document processing (combines both steps)
    fn process(&self, bytes: &[u8]) -> Result<Document, DocxError> {
        let markup = self.extract_markup(bytes)?;
        self.parse_markup(&markup)
    }

    /// Reads file and processes the bytes
    fn process_file(&self, input: &Path) -> Result<Document, DocxError> {
        let bytes = std::fs::read(input)?;
        self.process(&bytes)
    }

    /// Get preprocessor name for logging
    fn name(&self) -> &str;

    /// Check if preprocessor supports the given file type
    fn supports_file_type(&self, path: &Path) -> bool;
}
