//! Result normalization for engine output.
//!
//! Turns the raw text an engine invocation produced into one of several
//! caller-facing shapes, reclassifying data that is really an error.

mod formatter;
mod frame;
mod markdown;
mod unwrap;

pub use formatter::OutputFormatter;
pub use frame::{Frame, Value};
pub use unwrap::{unwrap_nullable, unwrap_record};

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single result row keyed by column name, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Target representation for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// A list of key/value records.
    #[default]
    #[serde(alias = "dict")]
    Records,
    /// A column-wise table.
    #[serde(alias = "pandas")]
    Frame,
    /// Delimited text exactly as the engine produced it.
    #[serde(alias = "csv")]
    Delimited,
    /// Markdown headings with fenced `key: value` blocks per record.
    #[serde(alias = "markdownkv")]
    KeyValue,
}

impl OutputFormat {
    /// Returns the canonical name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Frame => "frame",
            Self::Delimited => "delimited",
            Self::KeyValue => "keyvalue",
        }
    }

    /// Returns the value passed to the engine's `--output` flag.
    pub fn engine_flag(&self) -> &'static str {
        match self {
            Self::Delimited => "csv",
            _ => "json",
        }
    }

    /// Returns true for the formats a batch can be merged into.
    pub fn supports_batch(&self) -> bool {
        matches!(self, Self::Records | Self::Frame)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "records" | "dict" => Ok(Self::Records),
            "frame" | "pandas" => Ok(Self::Frame),
            "delimited" | "csv" => Ok(Self::Delimited),
            "keyvalue" | "markdownkv" => Ok(Self::KeyValue),
            _ => Err(ClientError::config(format!(
                "Invalid output format '{s}'. Expected one of: records, frame, delimited, keyvalue"
            ))),
        }
    }
}

/// Outcome of a statement (a mutation or lifecycle operation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementResult {
    /// Status text reported by the engine.
    pub message: String,

    /// Number of line breaks in `message`.
    ///
    /// This is a heuristic kept for compatibility: the engine reports no
    /// structured row count, so treat it as approximate.
    #[serde(rename = "rowsaffected")]
    pub rows_affected: usize,
}

impl StatementResult {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let rows_affected = message.matches('\n').count();
        Self {
            message,
            rows_affected,
        }
    }
}

/// Fields of the record the formatter emits for a failure; only `error` is
/// always present.
pub(crate) const ERROR_FIELDS: [&str; 4] = ["error", "data", "line", "column"];

/// Caller-facing result of one query or statement.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResult {
    Records(Vec<Record>),
    Frame(Frame),
    Delimited(String),
    KeyValue(String),
    Statement(StatementResult),
}

impl NormalizedResult {
    /// Returns true if the result holds no rows and no text.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Records(records) => records.is_empty(),
            Self::Frame(frame) => frame.is_empty(),
            Self::Delimited(text) => text.is_empty(),
            Self::KeyValue(text) => *text == markdown::render_empty(),
            Self::Statement(stmt) => stmt.message.is_empty(),
        }
    }

    /// Returns the number of records or rows, where that is meaningful.
    pub fn record_count(&self) -> usize {
        match self {
            Self::Records(records) => records.len(),
            Self::Frame(frame) => frame.height(),
            Self::Statement(_) => 1,
            Self::Delimited(_) | Self::KeyValue(_) => 0,
        }
    }

    /// Returns the error message if this result describes a failure.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Records(records) => match records.as_slice() {
                [only] if only.keys().all(|k| ERROR_FIELDS.contains(&k.as_str())) => {
                    only.get("error").and_then(|v| v.as_str()).map(String::from)
                }
                _ => None,
            },
            Self::Frame(frame) => frame.error_message(),
            Self::KeyValue(text) => markdown::error_message(text),
            Self::Delimited(_) | Self::Statement(_) => None,
        }
    }

    /// Converts the result to JSON for printing or serialization.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Records(records) => serde_json::Value::Array(
                records
                    .iter()
                    .cloned()
                    .map(serde_json::Value::Object)
                    .collect(),
            ),
            Self::Frame(frame) => serde_json::Value::Array(
                frame
                    .to_records()
                    .into_iter()
                    .map(serde_json::Value::Object)
                    .collect(),
            ),
            Self::Delimited(text) | Self::KeyValue(text) => serde_json::Value::String(text.clone()),
            Self::Statement(stmt) => serde_json::to_value(stmt).unwrap_or_default(),
        }
    }
}
