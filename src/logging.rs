//! Logging configuration for the StackQL client.
//!
//! The binary logs to stderr so stdout carries only query results. A file
//! sink is available for long-running hosts that keep stderr for other uses.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initializes logging to a file.
///
/// Location: `~/.local/state/stackql-client/stackql-client.log` on Linux
/// (XDG state directory), or the platform-appropriate directory elsewhere.
/// Returns false if the file could not be opened; no subscriber is installed
/// in that case.
pub fn init_file_logging(verbose: bool) -> bool {
    let log_path = get_log_path();

    let log_file = match open_log_file(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {e}", log_path.display());
            return false;
        }
    };

    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    true
}

/// Initializes logging to stderr.
///
/// `verbose` lowers the default level to `debug`; `RUST_LOG` still wins.
pub fn init_stderr_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .with_writer(std::io::stderr)
        .init();
}

/// Opens `path` for appending, creating its directory first.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Returns the path for the log file.
pub fn get_log_path() -> PathBuf {
    if let Some(state_dir) = dirs::state_dir() {
        return state_dir.join("stackql-client").join("stackql-client.log");
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("stackql-client").join("stackql-client.log");
    }

    std::env::temp_dir().join("stackql-client.log")
}
