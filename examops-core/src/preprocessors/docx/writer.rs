use crate::types::{Block, Document, Embedded, Paragraph, Run, Section, SourcePackage};
use quick_xml::escape::escape;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    cm_to_twips, rels_part_for, DocxError, CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART,
    NS_MAIN, NS_MATH, NS_RELATIONSHIPS, PACKAGE_RELS_PART,
};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const NS_PACKAGE_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_HEADER: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/header";
const REL_FOOTER: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer";
const CT_DOCUMENT: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";
const CT_RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";
const CT_HEADER: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.header+xml";
const CT_FOOTER: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml";

// Schema order: w:ind precedes these paragraph properties, w:pgMar precedes these section properties
const AFTER_IND: &[&str] = &[
    "w:contextualSpacing",
    "w:mirrorIndents",
    "w:suppressOverlap",
    "w:jc",
    "w:textDirection",
    "w:textAlignment",
    "w:textboxTightWrap",
    "w:outlineLvl",
    "w:divId",
    "w:cnfStyle",
    "w:rPr",
    "w:pPrChange",
];
const AFTER_PG_MAR: &[&str] = &[
    "w:paperSrc",
    "w:pgBorders",
    "w:lnNumType",
    "w:pgNumType",
    "w:cols",
    "w:formProt",
    "w:vAlign",
    "w:noEndnote",
    "w:titlePg",
    "w:textDirection",
    "w:bidi",
    "w:rtlGutter",
    "w:docGrid",
    "w:printerSettings",
    "w:sectPrChange",
];

/// Header/footer part generated for a section
struct StoryPart {
    rel_id: String,
    part_name: String,
    is_header: bool,
    xml: String,
    /// Relationships of the source part, copied when the story moves to a new name
    rels: Option<(String, Vec<u8>)>,
}

#[derive(Default)]
struct SectionRefs {
    header: Option<String>,
    footer: Option<String>,
}

/// Hands out relationship ids and part names that the source package does not use
struct NameAllocator {
    rel_ids: HashSet<String>,
    parts: HashSet<String>,
    next_rel: usize,
}

impl NameAllocator {
    fn new(source: &SourcePackage) -> Self {
        Self {
            rel_ids: source.relationships.iter().map(|rel| rel.id.clone()).collect(),
            parts: source.parts.keys().cloned().collect(),
            next_rel: 1,
        }
    }

    fn rel_id(&mut self) -> String {
        loop {
            let id = format!("rId{}", self.next_rel);
            self.next_rel += 1;
            if self.rel_ids.insert(id.clone()) {
                return id;
            }
        }
    }

    /// `preferred` when still free, else the first free `word/{stem}{n}.xml`
    fn part_name(&mut self, stem: &str, preferred: Option<&str>) -> String {
        if let Some(name) = preferred {
            if self.parts.insert(name.to_string()) {
                return name.to_string();
            }
        }
        let mut n = 1;
        loop {
            let name = format!("word/{stem}{n}.xml");
            if !self.parts.contains(&name) && !self.parts.contains(&rels_part_for(&name)) {
                self.parts.insert(name.clone());
                return name;
            }
            n += 1;
        }
    }
}

/// Serialises a `Document` into a .docx package.
///
/// Parts read from a source package are written back unchanged; the main
/// document part, its relationships, the content types and each section's
/// default header/footer are generated from the model.
pub struct DocxWriter;

impl DocxWriter {
    pub fn to_bytes(&self, document: &Document) -> Result<Vec<u8>, DocxError> {
        let fresh = SourcePackage::default();
        let source = document.package.as_ref().unwrap_or(&fresh);
        let root_attributes = root_attributes(document);
        let (stories, refs) = story_parts(document, source, &root_attributes);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut put = |name: &str, content: &[u8]| -> Result<(), DocxError> {
            zip.start_file(name, options)?;
            zip.write_all(content)?;
            Ok(())
        };

        put(CONTENT_TYPES_PART, content_types(source, &stories).as_bytes())?;
        if !source.parts.contains_key(PACKAGE_RELS_PART) {
            put(PACKAGE_RELS_PART, package_relationships().as_bytes())?;
        }
        put(DOCUMENT_RELS_PART, document_relationships(source, &stories).as_bytes())?;
        put(DOCUMENT_PART, document_xml(document, &root_attributes, &refs).as_bytes())?;
        for story in &stories {
            put(&story.part_name, story.xml.as_bytes())?;
            if let Some((name, rels)) = &story.rels {
                put(name, rels)?;
            }
        }
        for (name, content) in &source.parts {
            put(name, content)?;
        }

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}

/// Source root attributes, with the namespaces this writer emits guaranteed present
fn root_attributes(document: &Document) -> Vec<(String, String)> {
    let mut attributes = document.root_attributes.clone();
    for (key, value) in [("xmlns:w", NS_MAIN), ("xmlns:r", NS_RELATIONSHIPS), ("xmlns:m", NS_MATH)] {
        if !attributes.iter().any(|(existing, _)| existing == key) {
            attributes.push((key.to_string(), value.to_string()));
        }
    }
    attributes
}

fn attributes_xml(attributes: &[(String, String)]) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!(" {}=\"{}\"", key, escape(value.as_str())))
        .collect()
}

fn story_parts(
    document: &Document,
    source: &SourcePackage,
    root_attributes: &[(String, String)],
) -> (Vec<StoryPart>, Vec<SectionRefs>) {
    let mut names = NameAllocator::new(source);
    let mut stories = Vec::new();
    let mut refs = Vec::with_capacity(document.sections.len());

    for section in &document.sections {
        let mut section_refs = SectionRefs::default();
        let kinds = [
            (true, &section.header, &section.header_blocks, &section.header_part),
            (false, &section.footer, &section.footer_blocks, &section.footer_part),
        ];
        for (is_header, paragraphs, blocks, source_part) in kinds {
            if paragraphs.is_empty() && blocks.is_empty() && source_part.is_none() {
                continue;
            }
            let (root, stem) = if is_header { ("w:hdr", "header") } else { ("w:ftr", "footer") };
            let rel_id = names.rel_id();
            let part_name = names.part_name(stem, source_part.as_deref());
            let rels = source_part
                .as_deref()
                .filter(|original| *original != part_name)
                .and_then(|original| source.parts.get(&rels_part_for(original)))
                .map(|rels| (rels_part_for(&part_name), rels.clone()));

            let mut xml = format!("{XML_DECLARATION}\n<{root}{}>", attributes_xml(root_attributes));
            write_story(&mut xml, paragraphs, blocks);
            let _ = write!(xml, "</{root}>");

            if is_header {
                section_refs.header = Some(rel_id.clone());
            } else {
                section_refs.footer = Some(rel_id.clone());
            }
            stories.push(StoryPart {
                rel_id,
                part_name,
                is_header,
                xml,
                rels,
            });
        }
        refs.push(section_refs);
    }

    (stories, refs)
}

/// Paragraphs with the story's other blocks slotted back between them
fn write_story(xml: &mut String, paragraphs: &[Paragraph], blocks: &[(usize, String)]) {
    let mut pending = blocks.iter().peekable();
    for (index, paragraph) in paragraphs.iter().enumerate() {
        while let Some((_, raw)) = pending.next_if(|(at, _)| *at <= index) {
            xml.push_str(raw);
        }
        write_paragraph(xml, paragraph, None);
    }
    for (_, raw) in pending {
        xml.push_str(raw);
    }
    // A story must hold at least one block
    if paragraphs.is_empty() && blocks.is_empty() {
        xml.push_str("<w:p/>");
    }
}

fn content_types(source: &SourcePackage, stories: &[StoryPart]) -> String {
    let mut xml = format!(
        "{XML_DECLARATION}\n<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">"
    );

    let builtin = [("rels", CT_RELATIONSHIPS), ("xml", "application/xml")]
        .map(|(extension, content_type)| (extension.to_string(), content_type.to_string()));
    let mut extensions = HashSet::new();
    for (extension, content_type) in builtin.iter().chain(&source.content_type_defaults) {
        if extensions.insert(extension.to_ascii_lowercase()) {
            let _ = write!(
                xml,
                "<Default Extension=\"{}\" ContentType=\"{}\"/>",
                escape(extension.as_str()),
                escape(content_type.as_str())
            );
        }
    }

    let _ = write!(xml, "<Override PartName=\"/{DOCUMENT_PART}\" ContentType=\"{CT_DOCUMENT}\"/>");
    for story in stories {
        let content_type = if story.is_header { CT_HEADER } else { CT_FOOTER };
        let _ = write!(
            xml,
            "<Override PartName=\"/{}\" ContentType=\"{content_type}\"/>",
            story.part_name
        );
    }
    for (part, content_type) in &source.content_type_overrides {
        if source.parts.contains_key(part) {
            let _ = write!(
                xml,
                "<Override PartName=\"/{}\" ContentType=\"{}\"/>",
                escape(part.as_str()),
                escape(content_type.as_str())
            );
        }
    }
    xml.push_str("</Types>");
    xml
}

fn package_relationships() -> String {
    format!(
        "{XML_DECLARATION}\n<Relationships xmlns=\"{NS_PACKAGE_RELS}\">\
<Relationship Id=\"rId1\" Type=\"{REL_OFFICE_DOCUMENT}\" Target=\"{DOCUMENT_PART}\"/>\
</Relationships>"
    )
}

fn document_relationships(source: &SourcePackage, stories: &[StoryPart]) -> String {
    let mut xml = format!("{XML_DECLARATION}\n<Relationships xmlns=\"{NS_PACKAGE_RELS}\">");
    for rel in &source.relationships {
        let _ = write!(
            xml,
            "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
            escape(rel.id.as_str()),
            escape(rel.rel_type.as_str()),
            escape(rel.target.as_str())
        );
        if let Some(mode) = &rel.target_mode {
            let _ = write!(xml, " TargetMode=\"{}\"", escape(mode.as_str()));
        }
        xml.push_str("/>");
    }
    for story in stories {
        let rel_type = if story.is_header { REL_HEADER } else { REL_FOOTER };
        let target = story.part_name.trim_start_matches("word/");
        let _ = write!(
            xml,
            "<Relationship Id=\"{}\" Type=\"{rel_type}\" Target=\"{target}\"/>",
            story.rel_id
        );
    }
    xml.push_str("</Relationships>");
    xml
}

fn document_xml(document: &Document, root_attributes: &[(String, String)], refs: &[SectionRefs]) -> String {
    let mut xml = format!(
        "{XML_DECLARATION}\n<w:document{}><w:body>",
        attributes_xml(root_attributes)
    );

    let mut section_index = 0;
    for block in &document.body {
        match block {
            Block::Paragraph(paragraph) if paragraph.section_break && section_index + 1 < document.sections.len() => {
                let sect_pr = section_xml(&document.sections[section_index], &refs[section_index]);
                write_paragraph(&mut xml, paragraph, Some(&sect_pr));
                section_index += 1;
            }
            Block::Paragraph(paragraph) => write_paragraph(&mut xml, paragraph, None),
            Block::Opaque(raw) => xml.push_str(raw),
        }
    }

    // Remaining sections collapse into the body-level one
    if let Some(last) = document.sections.len().checked_sub(1) {
        xml.push_str(&section_xml(&document.sections[last], &refs[last]));
    }
    xml.push_str("</w:body></w:document>");
    xml
}

fn section_xml(section: &Section, refs: &SectionRefs) -> String {
    let mut children = Vec::new();
    if let Some(id) = &refs.header {
        children.push(format!("<w:headerReference w:type=\"default\" r:id=\"{id}\"/>"));
    }
    if let Some(id) = &refs.footer {
        children.push(format!("<w:footerReference w:type=\"default\" r:id=\"{id}\"/>"));
    }

    let margins = &section.margins;
    let page_margins = format!(
        "<w:pgMar w:top=\"{}\" w:right=\"{}\" w:bottom=\"{}\" w:left=\"{}\"{}/>",
        cm_to_twips(margins.top),
        cm_to_twips(margins.right),
        cm_to_twips(margins.bottom),
        cm_to_twips(margins.left),
        section
            .margin_attributes
            .as_deref()
            .unwrap_or(" w:header=\"708\" w:footer=\"708\" w:gutter=\"0\""),
    );
    children.extend(insert_in_schema_order(&section.properties, page_margins, AFTER_PG_MAR));

    format!("<w:sectPr>{}</w:sectPr>", children.concat())
}

/// Insert `element` before the first sibling whose tag must follow it
fn insert_in_schema_order(siblings: &[String], element: String, followers: &[&str]) -> Vec<String> {
    let position = siblings
        .iter()
        .position(|raw| followers.contains(&tag_name(raw)))
        .unwrap_or(siblings.len());
    let mut ordered = siblings.to_vec();
    ordered.insert(position, element);
    ordered
}

fn tag_name(raw: &str) -> &str {
    let name = raw.trim_start().trim_start_matches('<');
    let end = name
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(name.len());
    &name[..end]
}

fn write_paragraph(xml: &mut String, paragraph: &Paragraph, section: Option<&str>) {
    xml.push_str("<w:p>");

    let indent = match (&paragraph.left_indent_cm, &paragraph.indent_attributes) {
        (None, None) => None,
        (left, extra) => Some(format!(
            "<w:ind{}{}/>",
            left.map(|cm| format!(" w:left=\"{}\"", cm_to_twips(cm))).unwrap_or_default(),
            extra.as_deref().unwrap_or_default()
        )),
    };
    let mut properties = match indent {
        Some(ind) => insert_in_schema_order(&paragraph.properties, ind, AFTER_IND),
        None => paragraph.properties.clone(),
    };
    if let Some(sect_pr) = section {
        // sectPr comes after rPr and before pPrChange
        let position = properties
            .iter()
            .position(|raw| tag_name(raw) == "w:pPrChange")
            .unwrap_or(properties.len());
        properties.insert(position, sect_pr.to_string());
    }
    if !properties.is_empty() {
        let _ = write!(xml, "<w:pPr>{}</w:pPr>", properties.concat());
    }

    for run in &paragraph.runs {
        write_run(xml, run);
    }
    xml.push_str("</w:p>");
}

fn write_run(xml: &mut String, run: &Run) {
    let embedded_in_run = match (&run.math, &run.embedded) {
        (Some(raw), _) | (None, Some(Embedded::InParagraph(raw))) => {
            xml.push_str(raw);
            return;
        }
        (None, Some(Embedded::InRun(raw))) => Some(raw),
        (None, None) => None,
    };

    xml.push_str("<w:r>");
    if let Some(properties) = &run.properties {
        xml.push_str(properties);
    }
    if let Some(raw) = embedded_in_run {
        xml.push_str(raw);
        xml.push_str("</w:r>");
        return;
    }

    let mut segment = String::new();
    for ch in run.text.chars() {
        match ch {
            '\t' | '\n' => {
                flush_text(xml, &mut segment);
                xml.push_str(if ch == '\t' { "<w:tab/>" } else { "<w:br/>" });
            }
            _ => segment.push(ch),
        }
    }
    flush_text(xml, &mut segment);
    xml.push_str("</w:r>");
}

fn flush_text(xml: &mut String, segment: &mut String) {
    if segment.is_empty() {
        return;
    }
    let _ = write!(xml, "<w:t xml:space=\"preserve\">{}</w:t>", escape(segment.as_str()));
    segment.clear();
}
