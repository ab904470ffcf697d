//! Runs one engine invocation and captures its output.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};

use serde_json::json;
use tracing::{debug, warn};

use super::{CallOverrides, CommandBuilder, DebugLog, Invocation, RawResult};
use crate::config::ExecutionConfig;
use crate::error::Result;

/// Spawns the engine and classifies its output.
///
/// Never returns an error: build and spawn failures become
/// [`RawResult::SpawnException`]. The exit status is logged but does not
/// change the classification; the engine reports failures on its streams.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    builder: CommandBuilder,
    debug_log: Option<DebugLog>,
}

impl ProcessExecutor {
    /// Creates an executor, preparing the debug log directory if enabled.
    pub fn new(config: &ExecutionConfig) -> Result<Self> {
        let builder = CommandBuilder::new(config)?;
        let debug_log = config.prepare_debug_log()?.map(DebugLog::new);
        Ok(Self::with_builder(builder, debug_log))
    }

    pub fn with_builder(builder: CommandBuilder, debug_log: Option<DebugLog>) -> Self {
        Self { builder, debug_log }
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    pub fn debug_log(&self) -> Option<&DebugLog> {
        self.debug_log.as_ref()
    }

    /// Runs `query` with `overrides` applied and returns what the engine printed.
    pub fn execute(&self, query: &str, overrides: &CallOverrides) -> RawResult {
        let invocation = match self.builder.build(query, overrides) {
            Ok(invocation) => invocation,
            Err(e) => return RawResult::SpawnException(format!("ERROR: {e}")),
        };

        if let Some(log) = &self.debug_log {
            log.log("query", query);
            log.log("command", &invocation.command_line());
        }
        debug!(command = %invocation.command_line(), "Running engine");

        let (result, status) = self.run(&invocation);

        if let Some(log) = &self.debug_log {
            if let Some(status) = status {
                log.log("returncode", &return_code(status));
            }
            match &result {
                RawResult::Data { data, message } => {
                    log.log("stdout", data);
                    if let Some(message) = message {
                        log.log("stderr", message);
                    }
                }
                RawResult::EngineMessage(message) => log.log("stderr", message),
                RawResult::SpawnException(error) => log.log("exception", error),
                RawResult::Empty => {}
            }
        }

        result
    }

    /// Returns the classified output and, if the child ran, its exit status.
    fn run(&self, invocation: &Invocation) -> (RawResult, Option<ExitStatus>) {
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match output {
            Ok(output) => {
                debug!(
                    status = ?output.status.code(),
                    stdout_len = output.stdout.len(),
                    stderr_len = output.stderr.len(),
                    "Engine exited"
                );
                let result = RawResult::from_output(
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                );
                (result, Some(output.status))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(engine = %invocation.engine().display(), "Engine executable not found");
                let result = RawResult::SpawnException(format!(
                    "ERROR: {} not found",
                    invocation.engine().display()
                ));
                (result, None)
            }
            Err(e) => {
                warn!(error = %e, "Failed to run engine");
                let report = json!({
                    "exception": e.to_string(),
                    "kind": format!("{:?}", e.kind()),
                    "params": invocation.argv(),
                    "stdout": "",
                    "stderr": "",
                });
                (RawResult::SpawnException(format!("ERROR: {report}")), None)
            }
        }
    }
}

/// Exit code, or `signal` when the child was killed without one.
fn return_code(status: ExitStatus) -> String {
    status
        .code()
        .map_or_else(|| "signal".to_string(), |code| code.to_string())
}
