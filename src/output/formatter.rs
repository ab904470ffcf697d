//! Formatting of raw engine results.
//!
//! Provides the `OutputFormatter` that normalizes a [`RawResult`] into the
//! configured [`OutputFormat`], classifying errors along the way.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::{
    markdown, unwrap_nullable, unwrap_record, Frame, NormalizedResult, OutputFormat, Record,
    StatementResult,
};
use crate::detector::ErrorDetector;
use crate::engine::RawResult;
use crate::error::Result;

const INVALID_JSON: &str = "Invalid JSON output";

/// Normalizes raw engine output into a caller-facing result.
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    format: OutputFormat,
    detector: Arc<ErrorDetector>,
}

impl OutputFormatter {
    /// Creates a formatter for the given format.
    pub fn new(format: OutputFormat, detector: Arc<ErrorDetector>) -> Self {
        Self { format, detector }
    }

    /// Creates a formatter from a format name such as `"dict"` or `"markdownkv"`.
    pub fn from_name(name: &str, detector: Arc<ErrorDetector>) -> Result<Self> {
        Ok(Self::new(name.parse()?, detector))
    }

    /// Returns a formatter sharing this one's detector but producing `format`.
    pub fn with_format(&self, format: OutputFormat) -> Self {
        Self {
            format,
            detector: Arc::clone(&self.detector),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn detector(&self) -> &ErrorDetector {
        &self.detector
    }

    /// Formats the result of a query that returns rows.
    ///
    /// With `suppress_errors`, a result holding only an engine message is
    /// treated as empty: some engine versions report "no matches" on stderr.
    pub fn format_query_result(&self, raw: &RawResult, suppress_errors: bool) -> NormalizedResult {
        match raw {
            RawResult::SpawnException(exception) => self.format_error(exception),
            RawResult::Data { data, message } => {
                if let Some(message) = message {
                    debug!("Engine message alongside data: {}", message.trim_end());
                }
                self.format_data(data)
            }
            RawResult::EngineMessage(message) if !suppress_errors => self.format_error(message),
            RawResult::EngineMessage(message) => {
                debug!("Suppressed engine message: {}", message.trim_end());
                self.format_empty()
            }
            RawResult::Empty => self.format_empty(),
        }
    }

    /// Formats the result of a statement, which yields a message instead of rows.
    pub fn format_statement_result(&self, raw: &RawResult) -> NormalizedResult {
        let message = match raw {
            RawResult::SpawnException(exception) => return self.format_error(exception),
            RawResult::EngineMessage(message) => message.as_str(),
            RawResult::Data { data, message } => message.as_deref().unwrap_or(data.as_str()),
            RawResult::Empty => "",
        };
        self.format_statement_message(message)
    }

    /// Formats a statement status message (also used for server mode).
    pub fn format_statement_message(&self, message: &str) -> NormalizedResult {
        if self.detector.is_error(message) {
            return self.format_error(message);
        }

        match self.format {
            OutputFormat::Records => NormalizedResult::Statement(StatementResult::new(message)),
            OutputFormat::Frame if message.is_empty() => NormalizedResult::Frame(Frame::new()),
            OutputFormat::Frame => NormalizedResult::Frame(Frame::single("message", message)),
            OutputFormat::Delimited => NormalizedResult::Delimited(message.to_string()),
            OutputFormat::KeyValue => NormalizedResult::KeyValue(markdown::render_statement(message)),
        }
    }

    /// Formats rows that were already decoded, e.g. from a server connection.
    pub fn format_rows(&self, rows: Vec<Record>) -> NormalizedResult {
        let rows: Vec<JsonValue> = rows
            .into_iter()
            .map(|r| JsonValue::Object(unwrap_record(r)))
            .collect();
        self.render_checked(JsonValue::Array(rows))
    }

    /// Renders an error message in the configured format.
    pub fn format_error(&self, message: &str) -> NormalizedResult {
        match self.format {
            OutputFormat::Records => NormalizedResult::Records(vec![error_record(message)]),
            OutputFormat::Frame => NormalizedResult::Frame(Frame::error(message)),
            OutputFormat::Delimited => NormalizedResult::Delimited(message.to_string()),
            OutputFormat::KeyValue => NormalizedResult::KeyValue(markdown::render_error(message)),
        }
    }

    /// Renders the empty result of the configured format.
    pub fn format_empty(&self) -> NormalizedResult {
        match self.format {
            OutputFormat::Records => NormalizedResult::Records(Vec::new()),
            OutputFormat::Frame => NormalizedResult::Frame(Frame::new()),
            OutputFormat::Delimited => NormalizedResult::Delimited(String::new()),
            OutputFormat::KeyValue => NormalizedResult::KeyValue(markdown::render_empty()),
        }
    }

    fn format_data(&self, data: &str) -> NormalizedResult {
        // Delimited text is already in its final shape
        if self.format == OutputFormat::Delimited {
            return NormalizedResult::Delimited(data.to_string());
        }

        if data.trim().is_empty() {
            return self.format_empty();
        }

        match serde_json::from_str::<JsonValue>(data) {
            Ok(value) => self.render_checked(unwrap_nullable(value)),
            Err(_) if self.detector.is_error(data) => {
                warn!("Engine returned an error as data: {}", data.trim_end());
                self.format_error(data.trim_end())
            }
            Err(e) => self.format_parse_error(data, &e),
        }
    }

    /// Scans unwrapped data for an error string, then renders it.
    fn render_checked(&self, value: JsonValue) -> NormalizedResult {
        if let Some(error) = find_error_string(&self.detector, &value) {
            warn!("Result data contains an error message: {}", error);
            return self.format_error(error);
        }
        self.render(value)
    }

    fn render(&self, value: JsonValue) -> NormalizedResult {
        match self.format {
            OutputFormat::Records => NormalizedResult::Records(into_records(value)),
            OutputFormat::Frame => match Frame::from_json(&value) {
                Ok(frame) => NormalizedResult::Frame(frame),
                Err(reason) => {
                    warn!("{}", reason);
                    NormalizedResult::Frame(Frame::error(reason))
                }
            },
            OutputFormat::KeyValue => {
                NormalizedResult::KeyValue(markdown::render_records(&into_records(value)))
            }
            OutputFormat::Delimited => NormalizedResult::Delimited(value.to_string()),
        }
    }

    fn format_parse_error(&self, data: &str, error: &serde_json::Error) -> NormalizedResult {
        warn!(
            "{} at line {}, column {}: {}",
            INVALID_JSON,
            error.line(),
            error.column(),
            error
        );

        let mut record = Record::new();
        record.insert("error".to_string(), JsonValue::from(INVALID_JSON));
        record.insert("data".to_string(), JsonValue::from(data));
        record.insert("line".to_string(), JsonValue::from(error.line()));
        record.insert("column".to_string(), JsonValue::from(error.column()));

        match self.format {
            OutputFormat::Records => NormalizedResult::Records(vec![record]),
            OutputFormat::Frame => NormalizedResult::Frame(Frame::from_records([&record])),
            _ => self.format_error(&format!(
                "{INVALID_JSON} at line {}, column {}: {data}",
                error.line(),
                error.column()
            )),
        }
    }
}

fn error_record(message: &str) -> Record {
    let mut record = Record::new();
    record.insert("error".to_string(), JsonValue::from(message));
    record
}

/// Converts decoded JSON into records. Non-object items are kept under `value`.
fn into_records(value: JsonValue) -> Vec<Record> {
    let wrap = |item: JsonValue| match item {
        JsonValue::Object(record) => record,
        other => {
            let mut record = Record::new();
            record.insert("value".to_string(), other);
            record
        }
    };

    match value {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(items) => items.into_iter().map(wrap).collect(),
        other => vec![wrap(other)],
    }
}

/// Returns the first string in `value`, at any depth, that the detector flags.
pub(crate) fn find_error_string<'a>(
    detector: &ErrorDetector,
    value: &'a JsonValue,
) -> Option<&'a str> {
    match value {
        JsonValue::String(s) if detector.is_error(s) => Some(s),
        JsonValue::Array(items) => items.iter().find_map(|v| find_error_string(detector, v)),
        JsonValue::Object(map) => map.values().find_map(|v| find_error_string(detector, v)),
        _ => None,
    }
}
