use super::engine::{FormatRule, RuleScope};
use crate::types::{Document, Paragraph, Section, TemplateRules};

/// Overwrites the first section's leading header and footer paragraphs
pub struct HeaderFooterRule;

impl FormatRule for HeaderFooterRule {
    fn name(&self) -> &'static str {
        "HeaderFooter"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Document
    }

    fn apply_to_document(&self, document: &mut Document, template: &TemplateRules) -> usize {
        if document.sections.is_empty() {
            document.sections.push(Section::default());
        }
        let section = &mut document.sections[0];

        let mut changes = 0;
        if overwrite_first(&mut section.header, &mut section.header_blocks, &template.header_text) {
            changes += 1;
        }
        if overwrite_first(
            &mut section.footer,
            &mut section.footer_blocks,
            template.effective_footer_text(),
        ) {
            changes += 1;
        }
        changes
    }
}

/// Math in a header/footer paragraph is never rewritten; the template
/// paragraph goes in front of it instead. Tables that sat after the math
/// paragraph keep their place relative to it.
fn overwrite_first(paragraphs: &mut Vec<Paragraph>, blocks: &mut [(usize, String)], text: &str) -> bool {
    match paragraphs.first_mut() {
        None => {
            paragraphs.push(Paragraph::from_text(text));
            true
        }
        Some(first) if first.text() == text => false,
        Some(first) if first.contains_math() => {
            paragraphs.insert(0, Paragraph::from_text(text));
            for (position, _) in blocks.iter_mut().filter(|(position, _)| *position > 0) {
                *position += 1;
            }
            true
        }
        Some(first) => {
            first.set_text(text);
            true
        }
    }
}
