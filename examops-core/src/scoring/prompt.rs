use crate::types::{Document, TemplateRules};

use super::backend::ScoringRequest;

pub const SYSTEM_PROMPT: &str = "You are an exam paper compliance checker. \
Evaluate the formatted document against the template rules and return a JSON object \
with exactly these keys: compliance_score (number 0-100), category_scores (object of \
category name to number), issues_found (list of strings), edge_cases (list of strings), \
math_expressions_preserved (boolean), summary (string). \
Respond with JSON only, without markdown fences.";

pub fn build_request(
    original: &Document,
    transformed: &Document,
    template: &TemplateRules,
    max_document_chars: usize,
) -> ScoringRequest {
    let rules = serde_json::to_string_pretty(template).unwrap_or_else(|_| "{}".to_string());
    let user_prompt = format!(
        "TEMPLATE RULES:\n{}\n\nORIGINAL DOCUMENT:\n{}\n\nFORMATTED DOCUMENT:\n{}",
        rules,
        truncate_chars(&original.plain_text(), max_document_chars),
        truncate_chars(&transformed.plain_text(), max_document_chars),
    );

    ScoringRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt,
    }
}

/// Cut to at most `max_chars` characters, never splitting a code point
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_carries_rules_and_both_documents() {
        let original = Document::from_texts(["Q1) Old"]);
        let formatted = Document::from_texts(["Q1.  New"]);
        let request = build_request(&original, &formatted, &TemplateRules::default(), 4000);

        assert!(request.user_prompt.starts_with("TEMPLATE RULES:\n{"));
        assert!(request.user_prompt.contains("\"header_text\": \"SOUTHERN UNIVERSITY COLLEGE\""));
        assert!(request.user_prompt.contains("ORIGINAL DOCUMENT:\nQ1) Old"));
        assert!(request.user_prompt.ends_with("FORMATTED DOCUMENT:\nQ1.  New"));
        assert!(request.system_prompt.contains("math_expressions_preserved"));
    }

    #[test]
    fn documents_are_truncated_by_characters() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");

        let long = Document::from_texts(["x".repeat(50)]);
        let request = build_request(&long, &long, &TemplateRules::default(), 10);
        assert!(request.user_prompt.ends_with(&format!("FORMATTED DOCUMENT:\n{}", "x".repeat(10))));
    }
}
