//! Integration tests for stackql-client.

pub mod dispatch_test;
pub mod pipeline_test;
pub mod server_test;

#[cfg(unix)]
pub mod support {
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use stackql_client::config::ExecutionConfig;
    use stackql_client::output::OutputFormat;
    use tempfile::TempDir;

    /// A shell script standing in for the engine executable.
    pub struct FakeEngine {
        dir: TempDir,
        path: PathBuf,
    }

    impl FakeEngine {
        /// Writes `body` as a `/bin/sh` script. `$1` is `exec`, `$2` the query.
        pub fn new(body: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("stackql");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            Self { dir, path }
        }

        /// An engine that prints each argument on its own line.
        pub fn echo_args() -> Self {
            Self::new(r#"for a in "$@"; do printf '%s\n' "$a"; done"#)
        }

        pub fn dir(&self) -> &std::path::Path {
            self.dir.path()
        }

        pub fn config(&self, output: OutputFormat) -> ExecutionConfig {
            ExecutionConfig {
                engine_path: self.path.clone(),
                output,
                ..Default::default()
            }
        }
    }
}
