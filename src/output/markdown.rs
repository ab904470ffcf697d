//! Markdown key/value rendering.
//!
//! Each record becomes a `## Record N` section holding a fenced block of
//! `key: value` lines. Language models parse this layout more reliably than
//! delimited text.

use super::Record;
use std::fmt::Write;

pub(crate) const QUERY_HEADING: &str = "# Query Results";
pub(crate) const STATEMENT_HEADING: &str = "# Statement Result";
pub(crate) const NO_RECORDS: &str = "No records found.";
const ERROR_HEADING: &str = "## Error";
const FENCE: &str = "```";

/// Renders records under a `# Query Results` heading.
pub(crate) fn render_records(records: &[Record]) -> String {
    if records.is_empty() {
        return render_empty();
    }

    let mut out = format!("{QUERY_HEADING}\n\n");
    for (i, record) in records.iter().enumerate() {
        let _ = writeln!(out, "## Record {}\n", i + 1);
        out.push_str(FENCE);
        out.push('\n');
        for (key, value) in record {
            let _ = writeln!(out, "{key}: {}", render_value(value));
        }
        out.push_str(FENCE);
        out.push_str("\n\n");
    }
    out
}

pub(crate) fn render_empty() -> String {
    format!("{QUERY_HEADING}\n\n{NO_RECORDS}\n")
}

pub(crate) fn render_error(message: &str) -> String {
    format!("{QUERY_HEADING}\n\n{ERROR_HEADING}\n\n{FENCE}\nerror: {message}\n{FENCE}\n")
}

pub(crate) fn render_statement(message: &str) -> String {
    format!("{STATEMENT_HEADING}\n\n{FENCE}\nmessage: {message}\n{FENCE}\n")
}

/// Extracts the message from text produced by [`render_error`].
pub(crate) fn error_message(text: &str) -> Option<String> {
    let prefix = format!("{QUERY_HEADING}\n\n{ERROR_HEADING}\n\n{FENCE}\nerror: ");
    let suffix = format!("\n{FENCE}\n");
    text.strip_prefix(prefix.as_str())?
        .strip_suffix(suffix.as_str())
        .map(String::from)
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
