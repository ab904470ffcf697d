//! Append-only debug log of queries and engine output.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Appends one line per event to a file.
///
/// Each line is written with a single `write_all` on a file opened in append
/// mode, so lines from concurrent calls do not interleave within a line.
/// Write failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct DebugLog {
    path: PathBuf,
}

impl DebugLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `label: text`, with newlines in `text` escaped.
    pub fn log(&self, label: &str, text: &str) {
        let line = format!("{label}: {}\n", text.replace('\r', "\\r").replace('\n', "\\n"));
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to write debug log");
        }
    }
}
