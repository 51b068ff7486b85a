use crate::types::{
    Block, Document, Embedded, Margins, Paragraph, Relationship, Run, Section, SourcePackage,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashSet};

use super::{
    twips_to_cm, DocxError, DocxPackage, CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART,
};

type XmlResult<T> = Result<T, quick_xml::Error>;

/// Event reader over a single XML part that can hand back the raw text of
/// any element it has walked past.
struct XmlCursor<'a> {
    xml: &'a str,
    reader: Reader<&'a [u8]>,
}

impl<'a> XmlCursor<'a> {
    fn new(xml: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);
        Self { xml, reader }
    }

    /// Next event together with the byte offset it starts at
    fn next_event(&mut self) -> XmlResult<(usize, Event<'a>)> {
        let start = self.reader.buffer_position();
        let event = self.reader.read_event()?;
        Ok((start, event))
    }

    fn raw_since(&self, start: usize) -> String {
        self.xml[start..self.reader.buffer_position()].to_string()
    }

    /// Consume everything up to and including the end of the element just opened
    fn skip_element(&mut self) -> XmlResult<()> {
        let mut depth = 1usize;
        loop {
            match self.reader.read_event()? {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Event::Eof => return Err(unexpected_eof("element")),
                _ => {}
            }
        }
    }

    /// Skip the element just opened and return its raw XML
    fn capture_element(&mut self, start: usize) -> XmlResult<String> {
        self.skip_element()?;
        Ok(self.raw_since(start))
    }
}

fn unexpected_eof(context: &str) -> quick_xml::Error {
    quick_xml::Error::UnexpectedEof(context.to_string())
}

fn name_of<'e>(element: &'e BytesStart<'_>) -> &'e [u8] {
    element.name().into_inner()
}

/// Attribute value by qualified name
fn attribute(element: &BytesStart<'_>, key: &[u8]) -> XmlResult<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Every attribute except `excluded`, re-serialised as ` key="value"`
fn other_attributes(element: &BytesStart<'_>, excluded: &[&[u8]]) -> XmlResult<Option<String>> {
    let mut rest = String::new();
    for attr in element.attributes() {
        let attr = attr?;
        if excluded.iter().any(|key| *key == attr.key.as_ref()) {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.as_ref());
        let value = attr.unescape_value()?;
        rest.push_str(&format!(" {}=\"{}\"", key, quick_xml::escape::escape(value.as_ref())));
    }
    Ok((!rest.is_empty()).then_some(rest))
}

fn twips_attribute(element: &BytesStart<'_>, keys: &[&[u8]]) -> XmlResult<Option<f32>> {
    for key in keys {
        if let Some(value) = attribute(element, key)? {
            return Ok(value.trim().parse::<i64>().ok().map(twips_to_cm));
        }
    }
    Ok(None)
}

/// A `w:headerReference`/`w:footerReference` as found in `w:sectPr`
#[derive(Debug)]
struct Reference {
    kind: String,
    id: String,
    raw: String,
}

/// Section properties before header/footer references are resolved
#[derive(Debug, Default)]
struct SectionProperties {
    margins: Option<Margins>,
    margin_attributes: Option<String>,
    header_refs: Vec<Reference>,
    footer_refs: Vec<Reference>,
    properties: Vec<String>,
}

/// Relationship ids used by header/footer references across all sections
#[derive(Debug, Default)]
struct ReferenceIds {
    /// Default references; the writer emits fresh ones
    rewritten: HashSet<String>,
    /// First-page and even-page references, written back as they were
    kept: HashSet<String>,
}

/// Content of a header/footer part
struct Story {
    part: String,
    paragraphs: Vec<Paragraph>,
    blocks: Vec<(usize, String)>,
}

pub(super) fn read_document(package: &DocxPackage) -> Result<Document, DocxError> {
    let xml = package
        .part(DOCUMENT_PART)
        .ok_or_else(|| DocxError::MissingPart(DOCUMENT_PART.to_string()))?;

    let (body, section_properties, root_attributes) =
        parse_document_part(xml).map_err(|e| DocxError::xml(DOCUMENT_PART, e))?;
    let body = body.ok_or_else(|| DocxError::MissingBody(DOCUMENT_PART.to_string()))?;

    let relationships = match package.part(DOCUMENT_RELS_PART) {
        Some(rels) => parse_relationships(rels).map_err(|e| DocxError::xml(DOCUMENT_RELS_PART, e))?,
        None => Vec::new(),
    };

    let mut ids = ReferenceIds::default();
    let mut sections = Vec::with_capacity(section_properties.len());
    for properties in section_properties {
        sections.push(resolve_section(properties, &relationships, package, &mut ids)?);
    }

    let source = source_package(package, relationships, &sections, &ids)?;
    Ok(Document {
        body,
        sections,
        root_attributes,
        package: Some(source),
    })
}

/// Everything the writer does not regenerate, ready to be written back
fn source_package(
    package: &DocxPackage,
    relationships: Vec<Relationship>,
    sections: &[Section],
    ids: &ReferenceIds,
) -> Result<SourcePackage, DocxError> {
    let (content_type_defaults, content_type_overrides) = match package.part(CONTENT_TYPES_PART) {
        Some(xml) => parse_content_types(xml).map_err(|e| DocxError::xml(CONTENT_TYPES_PART, e))?,
        None => (Vec::new(), BTreeMap::new()),
    };

    let regenerated: HashSet<&str> = [CONTENT_TYPES_PART, DOCUMENT_PART, DOCUMENT_RELS_PART]
        .into_iter()
        .chain(
            sections
                .iter()
                .flat_map(|section| [section.header_part.as_deref(), section.footer_part.as_deref()])
                .flatten(),
        )
        .collect();

    let parts = package
        .parts
        .iter()
        .filter(|(name, _)| !regenerated.contains(name.as_str()))
        .map(|(name, bytes)| (name.clone(), bytes.clone()))
        .collect();

    let relationships = relationships
        .into_iter()
        .filter(|rel| !ids.rewritten.contains(&rel.id) || ids.kept.contains(&rel.id))
        .collect();

    Ok(SourcePackage {
        parts,
        relationships,
        content_type_defaults,
        content_type_overrides,
    })
}

type ParsedDocument = (Option<Vec<Block>>, Vec<SectionProperties>, Vec<(String, String)>);

fn parse_document_part(xml: &str) -> XmlResult<ParsedDocument> {
    let mut cursor = XmlCursor::new(xml);
    let mut root_attributes = Vec::new();
    let mut body = None;
    let mut sections = Vec::new();

    loop {
        match cursor.next_event()? {
            (_, Event::Start(e)) if name_of(&e) == b"w:document" => {
                for attr in e.attributes() {
                    let attr = attr?;
                    root_attributes.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        attr.unescape_value()?.into_owned(),
                    ));
                }
            }
            (_, Event::Start(e)) if name_of(&e) == b"w:body" => {
                body = Some(parse_body(&mut cursor, &mut sections)?);
            }
            (_, Event::Start(_)) => cursor.skip_element()?,
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    Ok((body, sections, root_attributes))
}

fn parse_body(cursor: &mut XmlCursor<'_>, sections: &mut Vec<SectionProperties>) -> XmlResult<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut final_section = None;

    loop {
        match cursor.next_event()? {
            (_, Event::Start(e)) if name_of(&e) == b"w:p" => {
                let (paragraph, section) = parse_paragraph(cursor)?;
                if let Some(section) = section {
                    sections.push(section);
                }
                blocks.push(Block::Paragraph(paragraph));
            }
            (_, Event::Empty(e)) if name_of(&e) == b"w:p" => {
                blocks.push(Block::Paragraph(Paragraph::default()));
            }
            (_, Event::Start(e)) if name_of(&e) == b"w:sectPr" => {
                final_section = Some(parse_section_properties(cursor)?);
            }
            (_, Event::Empty(e)) if name_of(&e) == b"w:sectPr" => {
                final_section = Some(SectionProperties::default());
            }
            (start, Event::Start(_)) => blocks.push(Block::Opaque(cursor.capture_element(start)?)),
            (start, Event::Empty(_)) => blocks.push(Block::Opaque(cursor.raw_since(start))),
            (_, Event::End(e)) if e.name().as_ref() == b"w:body" => break,
            (_, Event::Eof) => return Err(unexpected_eof("w:body")),
            _ => {}
        }
    }

    sections.push(final_section.unwrap_or_default());
    Ok(blocks)
}

/// Containers whose runs belong to the paragraph text
fn is_transparent_container(name: &[u8]) -> bool {
    matches!(name, b"w:hyperlink" | b"w:ins" | b"w:smartTag" | b"w:customXml")
}

fn parse_paragraph(cursor: &mut XmlCursor<'_>) -> XmlResult<(Paragraph, Option<SectionProperties>)> {
    let mut paragraph = Paragraph::default();
    let mut section = None;
    let mut open_containers = 0usize;

    loop {
        match cursor.next_event()? {
            (_, Event::Start(e)) if name_of(&e) == b"w:pPr" => {
                section = parse_paragraph_properties(cursor, &mut paragraph)?;
                paragraph.section_break = section.is_some();
            }
            (_, Event::Start(e)) if name_of(&e) == b"w:r" => {
                paragraph.runs.extend(parse_run(cursor)?);
            }
            (start, Event::Start(e)) if matches!(name_of(&e), b"m:oMath" | b"m:oMathPara") => {
                let text = collect_math_text(cursor)?;
                paragraph.runs.push(Run::math(cursor.raw_since(start), text));
            }
            (start, Event::Empty(e)) if matches!(name_of(&e), b"m:oMath" | b"m:oMathPara") => {
                paragraph.runs.push(Run::math(cursor.raw_since(start), ""));
            }
            (_, Event::Start(e)) if is_transparent_container(name_of(&e)) => open_containers += 1,
            (_, Event::End(e)) if is_transparent_container(e.name().as_ref()) => {
                open_containers = open_containers.saturating_sub(1);
            }
            (_, Event::Empty(e)) if matches!(name_of(&e), b"w:r" | b"w:pPr") => {}
            (start, Event::Start(_)) => {
                let xml = cursor.capture_element(start)?;
                paragraph.runs.push(Run::embedded(Embedded::InParagraph(xml), None));
            }
            (start, Event::Empty(_)) => {
                let xml = cursor.raw_since(start);
                paragraph.runs.push(Run::embedded(Embedded::InParagraph(xml), None));
            }
            (_, Event::End(e)) if e.name().as_ref() == b"w:p" && open_containers == 0 => break,
            (_, Event::Eof) => return Err(unexpected_eof("w:p")),
            _ => {}
        }
    }

    Ok((paragraph, section))
}

fn parse_paragraph_properties(
    cursor: &mut XmlCursor<'_>,
    paragraph: &mut Paragraph,
) -> XmlResult<Option<SectionProperties>> {
    let mut section = None;

    loop {
        match cursor.next_event()? {
            (_, Event::Empty(e)) if name_of(&e) == b"w:ind" => read_indent(&e, paragraph)?,
            (_, Event::Start(e)) if name_of(&e) == b"w:ind" => {
                read_indent(&e, paragraph)?;
                cursor.skip_element()?;
            }
            (_, Event::Start(e)) if name_of(&e) == b"w:sectPr" => {
                section = Some(parse_section_properties(cursor)?);
            }
            (_, Event::Empty(e)) if name_of(&e) == b"w:sectPr" => {
                section = Some(SectionProperties::default());
            }
            (start, Event::Start(_)) => paragraph.properties.push(cursor.capture_element(start)?),
            (start, Event::Empty(_)) => paragraph.properties.push(cursor.raw_since(start)),
            (_, Event::End(e)) if e.name().as_ref() == b"w:pPr" => break,
            (_, Event::Eof) => return Err(unexpected_eof("w:pPr")),
            _ => {}
        }
    }

    Ok(section)
}

fn read_indent(element: &BytesStart<'_>, paragraph: &mut Paragraph) -> XmlResult<()> {
    const LEFT: [&[u8]; 2] = [b"w:left", b"w:start"];
    paragraph.left_indent_cm = twips_attribute(element, &LEFT)?;
    paragraph.indent_attributes = other_attributes(element, &LEFT)?;
    Ok(())
}

/// A `w:br`/`w:cr` that is an ordinary line break; page and column breaks
/// are kept verbatim instead
fn is_line_break(element: &BytesStart<'_>) -> bool {
    matches!(name_of(element), b"w:br" | b"w:cr")
        && !element
            .attributes()
            .flatten()
            .any(|attr| attr.key.as_ref() == b"w:type" && attr.value.as_ref() != b"textWrapping")
}

/// Runs read from one `w:r`. A child the model does not cover splits the
/// run: it becomes an embedded run with the same formatting, and text on
/// either side of it stays in ordinary runs.
fn parse_run(cursor: &mut XmlCursor<'_>) -> XmlResult<Vec<Run>> {
    let mut runs = Vec::new();
    let mut current = Run::default();

    loop {
        match cursor.next_event()? {
            (start, Event::Start(e)) if name_of(&e) == b"w:rPr" => {
                current.properties = Some(cursor.capture_element(start)?);
            }
            (start, Event::Empty(e)) if name_of(&e) == b"w:rPr" => {
                current.properties = Some(cursor.raw_since(start));
            }
            (_, Event::Start(e)) if name_of(&e) == b"w:t" => {
                current.text.push_str(&collect_text(cursor)?);
            }
            (_, Event::Empty(e)) if name_of(&e) == b"w:t" => {}
            (_, Event::Empty(e)) if name_of(&e) == b"w:tab" => current.text.push('\t'),
            (_, Event::Empty(e)) if is_line_break(&e) => current.text.push('\n'),
            (start, Event::Start(_)) => {
                let xml = cursor.capture_element(start)?;
                split_off_embedded(&mut runs, &mut current, xml);
            }
            (start, Event::Empty(_)) => {
                let xml = cursor.raw_since(start);
                split_off_embedded(&mut runs, &mut current, xml);
            }
            (_, Event::End(e)) if e.name().as_ref() == b"w:r" => break,
            (_, Event::Eof) => return Err(unexpected_eof("w:r")),
            _ => {}
        }
    }

    if !current.text.is_empty() || runs.is_empty() {
        runs.push(current);
    }
    Ok(runs)
}

fn split_off_embedded(runs: &mut Vec<Run>, current: &mut Run, xml: String) {
    if !current.text.is_empty() {
        runs.push(Run {
            text: std::mem::take(&mut current.text),
            properties: current.properties.clone(),
            ..Run::default()
        });
    }
    runs.push(Run::embedded(Embedded::InRun(xml), current.properties.clone()));
}

/// Text content of the element just opened, up to its end tag
fn collect_text(cursor: &mut XmlCursor<'_>) -> XmlResult<String> {
    let mut text = String::new();
    let mut depth = 1usize;
    loop {
        match cursor.reader.read_event()? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(text);
                }
            }
            Event::Eof => return Err(unexpected_eof("text")),
            _ => {}
        }
    }
}

/// Visible text of a math element: the concatenated `m:t` contents
fn collect_math_text(cursor: &mut XmlCursor<'_>) -> XmlResult<String> {
    let mut text = String::new();
    let mut depth = 1usize;
    loop {
        match cursor.reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"m:t" => text.push_str(&collect_text(cursor)?),
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(text);
                }
            }
            Event::Eof => return Err(unexpected_eof("m:oMath")),
            _ => {}
        }
    }
}

fn parse_section_properties(cursor: &mut XmlCursor<'_>) -> XmlResult<SectionProperties> {
    let mut section = SectionProperties::default();

    loop {
        match cursor.next_event()? {
            (_, Event::Empty(e)) if name_of(&e) == b"w:pgMar" => read_page_margins(&e, &mut section)?,
            (_, Event::Start(e)) if name_of(&e) == b"w:pgMar" => {
                read_page_margins(&e, &mut section)?;
                cursor.skip_element()?;
            }
            (start, Event::Empty(e)) if name_of(&e) == b"w:headerReference" => {
                section.header_refs.push(reference(&e, cursor.raw_since(start))?);
            }
            (start, Event::Empty(e)) if name_of(&e) == b"w:footerReference" => {
                section.footer_refs.push(reference(&e, cursor.raw_since(start))?);
            }
            (start, Event::Start(_)) => section.properties.push(cursor.capture_element(start)?),
            (start, Event::Empty(_)) => section.properties.push(cursor.raw_since(start)),
            (_, Event::End(e)) if e.name().as_ref() == b"w:sectPr" => break,
            (_, Event::Eof) => return Err(unexpected_eof("w:sectPr")),
            _ => {}
        }
    }

    Ok(section)
}

fn read_page_margins(element: &BytesStart<'_>, section: &mut SectionProperties) -> XmlResult<()> {
    let fallback = Margins::default();
    section.margins = Some(Margins {
        top: twips_attribute(element, &[b"w:top"])?.unwrap_or(fallback.top),
        bottom: twips_attribute(element, &[b"w:bottom"])?.unwrap_or(fallback.bottom),
        left: twips_attribute(element, &[b"w:left", b"w:start"])?.unwrap_or(fallback.left),
        right: twips_attribute(element, &[b"w:right", b"w:end"])?.unwrap_or(fallback.right),
    });
    section.margin_attributes = other_attributes(
        element,
        &[b"w:top", b"w:bottom", b"w:left", b"w:start", b"w:right", b"w:end"],
    )?;
    Ok(())
}

fn reference(element: &BytesStart<'_>, raw: String) -> XmlResult<Reference> {
    Ok(Reference {
        kind: attribute(element, b"w:type")?.unwrap_or_else(|| "default".to_string()),
        id: attribute(element, b"r:id")?.unwrap_or_default(),
        raw,
    })
}

fn parse_relationships(xml: &str) -> XmlResult<Vec<Relationship>> {
    let mut cursor = XmlCursor::new(xml);
    let mut relationships = Vec::new();

    loop {
        match cursor.next_event()? {
            (_, Event::Empty(e)) | (_, Event::Start(e)) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id")?, attribute(&e, b"Target")?) {
                    relationships.push(Relationship {
                        id,
                        rel_type: attribute(&e, b"Type")?.unwrap_or_default(),
                        target,
                        target_mode: attribute(&e, b"TargetMode")?,
                    });
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    Ok(relationships)
}

type ContentTypes = (Vec<(String, String)>, BTreeMap<String, String>);

/// `Default` (extension, type) pairs and `Override` types keyed by part name
fn parse_content_types(xml: &str) -> XmlResult<ContentTypes> {
    let mut cursor = XmlCursor::new(xml);
    let mut defaults = Vec::new();
    let mut overrides = BTreeMap::new();

    loop {
        match cursor.next_event()? {
            (_, Event::Empty(e)) | (_, Event::Start(e)) if e.local_name().as_ref() == b"Default" => {
                if let (Some(extension), Some(content_type)) =
                    (attribute(&e, b"Extension")?, attribute(&e, b"ContentType")?)
                {
                    defaults.push((extension, content_type));
                }
            }
            (_, Event::Empty(e)) | (_, Event::Start(e)) if e.local_name().as_ref() == b"Override" => {
                if let (Some(part), Some(content_type)) =
                    (attribute(&e, b"PartName")?, attribute(&e, b"ContentType")?)
                {
                    overrides.insert(part.trim_start_matches('/').to_string(), content_type);
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    Ok((defaults, overrides))
}

fn resolve_section(
    properties: SectionProperties,
    relationships: &[Relationship],
    package: &DocxPackage,
    ids: &mut ReferenceIds,
) -> Result<Section, DocxError> {
    let header = read_story(&properties.header_refs, relationships, package)?;
    let footer = read_story(&properties.footer_refs, relationships, package)?;

    // Only the default header/footer is rewritten. First-page and even-page
    // references go back ahead of the other section properties.
    let mut kept = Vec::new();
    for reference in properties.header_refs.iter().chain(&properties.footer_refs) {
        if reference.kind == "default" {
            ids.rewritten.insert(reference.id.clone());
        } else {
            ids.kept.insert(reference.id.clone());
            kept.push(reference.raw.clone());
        }
    }
    kept.extend(properties.properties);

    let mut section = Section {
        margins: properties.margins.unwrap_or_default(),
        margin_attributes: properties.margin_attributes,
        properties: kept,
        ..Section::default()
    };
    if let Some(story) = header {
        section.header = story.paragraphs;
        section.header_blocks = story.blocks;
        section.header_part = Some(story.part);
    }
    if let Some(story) = footer {
        section.footer = story.paragraphs;
        section.footer_blocks = story.blocks;
        section.footer_part = Some(story.part);
    }
    Ok(section)
}

/// The default header/footer part. A dangling reference reads as no story.
fn read_story(
    references: &[Reference],
    relationships: &[Relationship],
    package: &DocxPackage,
) -> Result<Option<Story>, DocxError> {
    let Some(reference) = references.iter().find(|reference| reference.kind == "default") else {
        return Ok(None);
    };
    let Some(part) = relationships
        .iter()
        .find(|rel| rel.id == reference.id)
        .and_then(Relationship::part_name)
    else {
        return Ok(None);
    };
    let Some(xml) = package.part(&part) else {
        return Ok(None);
    };
    let (paragraphs, blocks) = parse_story_part(xml).map_err(|e| DocxError::xml(&part, e))?;
    Ok(Some(Story {
        part,
        paragraphs,
        blocks,
    }))
}

/// Top-level content of a `w:hdr`/`w:ftr` part: paragraphs, plus any other
/// block tagged with the number of paragraphs before it
fn parse_story_part(xml: &str) -> XmlResult<(Vec<Paragraph>, Vec<(usize, String)>)> {
    let mut cursor = XmlCursor::new(xml);
    let mut paragraphs = Vec::new();
    let mut blocks = Vec::new();

    loop {
        match cursor.next_event()? {
            (_, Event::Start(e)) | (_, Event::Empty(e)) if matches!(name_of(&e), b"w:hdr" | b"w:ftr") => {}
            (_, Event::Start(e)) if name_of(&e) == b"w:p" => paragraphs.push(parse_paragraph(&mut cursor)?.0),
            (_, Event::Empty(e)) if name_of(&e) == b"w:p" => paragraphs.push(Paragraph::default()),
            (start, Event::Start(_)) => blocks.push((paragraphs.len(), cursor.capture_element(start)?)),
            (start, Event::Empty(_)) => blocks.push((paragraphs.len(), cursor.raw_since(start))),
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    Ok((paragraphs, blocks))
}
