//! Local engine execution.
//!
//! Builds a command line for one query, runs the engine as a child process
//! and captures what it printed.

mod command;
mod debug_log;
mod process;

pub use command::{CommandBuilder, Invocation, Platform, Quoting};
pub use debug_log::DebugLog;
pub use process::ProcessExecutor;

use crate::output::OutputFormat;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Per-call values that take precedence over the base configuration.
///
/// Overrides are merged into a copy of the base arguments for one call only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOverrides {
    /// Replaces the configured auth object entirely.
    pub auth: Option<JsonValue>,

    /// Environment variables visible only to the spawned process.
    pub env_vars: BTreeMap<String, String>,

    pub output: Option<OutputFormat>,

    pub separator: Option<char>,

    pub header: Option<bool>,
}

impl CallOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(mut self, auth: JsonValue) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = Some(separator);
        self
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.header = Some(header);
        self
    }

    /// Returns true if any output-shaping option is overridden.
    pub fn changes_output(&self) -> bool {
        self.output.is_some() || self.separator.is_some() || self.header.is_some()
    }
}

/// What a single engine invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResult {
    /// Text on stdout, possibly with a warning on stderr.
    Data {
        data: String,
        message: Option<String>,
    },

    /// Only stderr had output (status message or error).
    EngineMessage(String),

    /// The process could not be started or communicated with.
    SpawnException(String),

    /// Neither stream had output.
    Empty,
}

impl RawResult {
    /// Classifies captured process output.
    pub fn from_output(stdout: String, stderr: String) -> Self {
        let message = (!stderr.is_empty()).then_some(stderr);
        match (stdout.is_empty(), message) {
            (false, message) => Self::Data {
                data: stdout,
                message,
            },
            (true, Some(message)) => Self::EngineMessage(message),
            (true, None) => Self::Empty,
        }
    }

    pub fn data(&self) -> Option<&str> {
        match self {
            Self::Data { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Returns the stderr text, whether or not stdout was present.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Data { message, .. } => message.as_deref(),
            Self::EngineMessage(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Self::SpawnException(_))
    }
}
