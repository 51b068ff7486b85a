//! Document Preprocessors
//!
//! Converts office packages into the `Document` model and back.
//!
//! ```text
//! .docx bytes
//!     ↓
//! [DocxPreprocessor::extract_markup]  zip → XML parts
//!     ↓
//! [DocxPreprocessor::parse_markup]    XML → Document
//!     ↓
//! Rule Engine (in place)
//!     ↓
//! [DocxWriter]                        Document → .docx bytes
//! ```

pub mod docx;
pub mod preprocessor;

pub use docx::{DocxError, DocxPackage, DocxPreprocessor, DocxWriter};
pub use preprocessor::Preprocessor;
