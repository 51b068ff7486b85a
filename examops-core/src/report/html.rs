use crate::types::{DiffSummary, FixCounts};
use quick_xml::escape::escape;
use std::fmt::Write;

use super::diff::{Opcode, Tag};

const REPORT_CSS: &str = r#"<style>
  body { font-family: Consolas, monospace; font-size: 13px; }
  table.diff { border-collapse: collapse; width: 100%; }
  td { padding: 2px 6px; vertical-align: top; white-space: pre-wrap; }
  .diff_header { background-color: #f0f0f0; font-weight: bold; }
  .diff_next { background-color: #f0f0f0; }
  span.diff_add { background-color: #c6efce; color: #276221; }
  span.diff_sub { background-color: #ffc7ce; color: #9c0006; }
  span.diff_chg { background-color: #ffeb9c; color: #9c6500; }
</style>"#;

pub const NO_DIFFERENCES: &str = "No differences found.";

pub fn render_report(
    original: &[String],
    formatted: &[String],
    hunks: &[Vec<Opcode>],
    fix_counts: &FixCounts,
    header_footer_changed: bool,
    compliance_score: Option<f64>,
) -> String {
    let preview = DiffSummary::new(String::new(), *fix_counts, header_footer_changed, compliance_score);

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset='utf-8'>");
    html.push_str("<title>ExamOps Diff Report</title>\n");
    html.push_str(REPORT_CSS);
    html.push_str("\n</head>\n<body>\n");
    html.push_str(&summary_header(&preview));
    html.push('\n');
    html.push_str(&diff_table(original, formatted, hunks));
    html.push_str("\n</body>\n</html>\n");
    html
}

fn summary_header(summary: &DiffSummary) -> String {
    let score = match summary.compliance_score {
        Some(score) => format!("{score:.1}%"),
        None => "N/A (scorer unavailable)".to_string(),
    };
    let counts = &summary.fix_counts;
    let yes_no = if summary.header_footer_changed { "Yes" } else { "No" };

    format!(
        "<div style='font-family:sans-serif;padding:12px;background:#f8f9fa;\
border:1px solid #dee2e6;border-radius:4px;margin-bottom:16px'>\
<h2 style='margin:0 0 8px'>ExamOps Formatting Report</h2>\
<p><strong>Compliance score:</strong> {score}</p>\
<p><strong>Total changes:</strong> {total}</p>\
<ul>\
<li>Numbering fixes: {numbering}</li>\
<li>Spacing fixes: {spacing}</li>\
<li>Mark notation fixes: {marks}</li>\
<li>Indentation fixes: {indentation}</li>\
<li>Header/footer changed: {yes_no}</li>\
</ul></div>",
        total = summary.total_changes,
        numbering = counts.numbering,
        spacing = counts.spacing,
        marks = counts.marks,
        indentation = counts.indentation,
    )
}

fn diff_table(original: &[String], formatted: &[String], hunks: &[Vec<Opcode>]) -> String {
    let mut table = String::from(
        "<table class=\"diff\">\n<thead><tr>\
<th class=\"diff_header\" colspan=\"2\">Original</th>\
<th class=\"diff_header\" colspan=\"2\">Formatted</th>\
</tr></thead>\n",
    );

    if hunks.is_empty() {
        let _ = writeln!(
            table,
            "<tbody><tr><td class=\"diff_next\" colspan=\"4\">{NO_DIFFERENCES}</td></tr></tbody>"
        );
        table.push_str("</table>");
        return table;
    }

    for (index, hunk) in hunks.iter().enumerate() {
        table.push_str("<tbody>\n");
        if index > 0 {
            table.push_str("<tr><td class=\"diff_next\" colspan=\"4\">&hellip;</td></tr>\n");
        }
        for code in hunk {
            render_opcode(&mut table, original, formatted, code);
        }
        table.push_str("</tbody>\n");
    }
    table.push_str("</table>");
    table
}

fn render_opcode(out: &mut String, original: &[String], formatted: &[String], code: &Opcode) {
    match code.tag {
        Tag::Equal => {
            for (i, j) in code.a.clone().zip(code.b.clone()) {
                let text = escape(original[i].as_str());
                row(out, Some((i, &*text)), Some((j, &*text)));
            }
        }
        Tag::Delete => {
            for i in code.a.clone() {
                let text = marked(&original[i], "diff_sub");
                row(out, Some((i, text.as_str())), None);
            }
        }
        Tag::Insert => {
            for j in code.b.clone() {
                let text = marked(&formatted[j], "diff_add");
                row(out, None, Some((j, text.as_str())));
            }
        }
        Tag::Replace => {
            let paired = code.a.len().max(code.b.len());
            for k in 0..paired {
                let i = code.a.start + k;
                let j = code.b.start + k;
                match (code.a.contains(&i), code.b.contains(&j)) {
                    (true, true) => {
                        let (left, right) = changed_pair(&original[i], &formatted[j]);
                        row(out, Some((i, left.as_str())), Some((j, right.as_str())));
                    }
                    (true, false) => {
                        let text = marked(&original[i], "diff_sub");
                        row(out, Some((i, text.as_str())), None);
                    }
                    (false, true) => {
                        let text = marked(&formatted[j], "diff_add");
                        row(out, None, Some((j, text.as_str())));
                    }
                    (false, false) => {}
                }
            }
        }
    }
}

fn row(out: &mut String, left: Option<(usize, &str)>, right: Option<(usize, &str)>) {
    out.push_str("<tr>");
    for side in [left, right] {
        match side {
            Some((index, html)) => {
                let _ = write!(out, "<td class=\"diff_header\">{}</td><td>{}</td>", index + 1, html);
            }
            None => out.push_str("<td class=\"diff_header\"></td><td></td>"),
        }
    }
    out.push_str("</tr>\n");
}

fn marked(text: &str, class: &str) -> String {
    format!("<span class=\"{class}\">{}</span>", escape(text))
}

/// Highlight only the differing middle of a changed line pair
fn changed_pair(old: &str, new: &str) -> (String, String) {
    let prefix = old
        .char_indices()
        .zip(new.chars())
        .take_while(|((_, a), b)| a == b)
        .last()
        .map(|((index, ch), _)| index + ch.len_utf8())
        .unwrap_or(0);
    let suffix = old[prefix..]
        .chars()
        .rev()
        .zip(new[prefix..].chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum::<usize>();

    let highlight = |text: &str| {
        let end = text.len() - suffix;
        let middle = &text[prefix..end];
        let changed = if middle.is_empty() {
            String::new()
        } else {
            marked(middle, "diff_chg")
        };
        format!(
            "{}{}{}",
            escape(&text[..prefix]),
            changed,
            escape(&text[end..])
        )
    };
    (highlight(old), highlight(new))
}
