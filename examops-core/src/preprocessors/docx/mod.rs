//! WordprocessingML (.docx) support.
//!
//! Only the parts the formatter needs are modelled: body paragraphs with
//! their runs and indentation, math kept verbatim, section margins and the
//! default header/footer of each section. Anything else in the body is
//! carried through as raw XML, and every other package part travels with
//! the document so the writer can put it back.
//!
//! Element names are matched with their conventional prefixes (`w:`, `m:`,
//! `r:`), which is how every mainstream producer writes them.

mod reader;
mod writer;

pub use writer::DocxWriter;

use crate::types::Document;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use super::preprocessor::Preprocessor;

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const PACKAGE_RELS_PART: &str = "_rels/.rels";
pub const DOCUMENT_PART: &str = "word/document.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";

pub const NS_MAIN: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const NS_RELATIONSHIPS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const NS_MATH: &str = "http://schemas.openxmlformats.org/officeDocument/2006/math";

const TWIPS_PER_CM: f32 = 1440.0 / 2.54;

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("package has no {0}")]
    MissingPart(String),

    #[error("malformed XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("{0} has no w:body")]
    MissingBody(String),
}

impl DocxError {
    fn xml(part: &str, err: quick_xml::Error) -> Self {
        DocxError::Xml {
            part: part.to_string(),
            message: err.to_string(),
        }
    }
}

/// Twips to centimetres, rounded to 0.01 cm so values survive a write/read cycle
pub(crate) fn twips_to_cm(twips: i64) -> f32 {
    ((twips as f32 / TWIPS_PER_CM) * 100.0).round() / 100.0
}

pub(crate) fn cm_to_twips(cm: f32) -> i64 {
    (cm * TWIPS_PER_CM).round() as i64
}

/// Parts of an unpacked package, keyed by part name
#[derive(Debug, Clone, Default)]
pub struct DocxPackage {
    pub parts: BTreeMap<String, Vec<u8>>,
}

impl DocxPackage {
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.parts.insert(name.into(), content.into());
    }

    /// A part as text; `None` when missing or not UTF-8
    pub fn part(&self, name: &str) -> Option<&str> {
        self.parts
            .get(name)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

/// `word/header1.xml` → `word/_rels/header1.xml.rels`
pub(crate) fn rels_part_for(part_name: &str) -> String {
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

pub struct DocxPreprocessor;

impl Preprocessor for DocxPreprocessor {
    type Markup = DocxPackage;

    fn extract_markup(&self, bytes: &[u8]) -> Result<DocxPackage, DocxError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut package = DocxPackage::default();

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content)?;
            package.insert(name, content);
        }

        if !package.parts.contains_key(DOCUMENT_PART) {
            return Err(DocxError::MissingPart(DOCUMENT_PART.to_string()));
        }
        debug!(parts = package.parts.len(), "unpacked docx package");
        Ok(package)
    }

    fn parse_markup(&self, package: &DocxPackage) -> Result<Document, DocxError> {
        reader::read_document(package)
    }

    fn name(&self) -> &str {
        "docx"
    }

    fn supports_file_type(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("docx"))
            .unwrap_or(false)
    }
}
