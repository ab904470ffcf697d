//! Configuration management for the StackQL client.
//!
//! Handles loading configuration from TOML files and environment variables.
//! Every option the engine understands is an explicit field on
//! [`ExecutionConfig`]; unknown keys are rejected when the file is parsed.

use crate::error::{ClientError, Result};
use crate::output::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Engine invocation settings.
    #[serde(default)]
    pub engine: ExecutionConfig,

    /// Named queries that can be run by name from the CLI.
    #[serde(default)]
    pub queries: BTreeMap<String, String>,
}

/// Storage backend used by the engine for materialized views and caching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BackendStorage {
    #[default]
    Memory,
    File {
        #[serde(default = "default_backend_location")]
        location: PathBuf,
    },
}

fn default_backend_location() -> PathBuf {
    PathBuf::from("stackql.db")
}

/// HTTP proxy settings passed through to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Proxy host.
    pub host: String,

    /// Proxy port (-1 lets the engine pick).
    #[serde(default = "default_proxy_port")]
    pub port: i32,

    pub user: Option<String>,

    pub password: Option<String>,

    /// Proxy scheme: "http" or "https".
    #[serde(default = "default_proxy_scheme")]
    pub scheme: String,
}

fn default_proxy_port() -> i32 {
    -1
}

fn default_proxy_scheme() -> String {
    "http".to_string()
}

impl ProxyConfig {
    /// Creates proxy settings for a host with default port and scheme.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_proxy_port(),
            user: None,
            password: None,
            scheme: default_proxy_scheme(),
        }
    }
}

/// Immutable base settings for every engine invocation.
///
/// Created once per client session and shared read-only by every call,
/// including concurrent batch workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Path to the engine executable.
    pub engine_path: PathBuf,

    /// Default output format for results.
    pub output: OutputFormat,

    /// Value separator for delimited output.
    pub separator: char,

    /// Show column headers in delimited output.
    pub header: bool,

    /// Provider authentication object, or a JSON string holding one.
    pub auth: Option<serde_json::Value>,

    /// Custom provider registry URL.
    pub custom_registry: Option<String>,

    /// Application config and cache root.
    pub app_root: Option<PathBuf>,

    pub backend: BackendStorage,

    pub execution_concurrency_limit: i64,
    pub dataflow_dependency_max: i64,
    pub dataflow_components_max: i64,

    /// Max results per HTTP request (-1 for no limit).
    pub max_results: i64,

    /// Max pages of results returned per resource.
    pub page_limit: i64,

    /// Max depth for indirect queries (views and subqueries).
    pub max_depth: i64,

    /// API request timeout in seconds.
    pub api_timeout: i64,

    /// Enable engine HTTP logging. Also disables error suppression.
    pub http_debug: bool,

    pub proxy: Option<ProxyConfig>,

    /// Append query/stdout/stderr lines to a debug log file.
    pub debug: bool,

    /// Debug log location (defaults to `~/.stackql-client/debug.log`).
    pub debug_log_file: Option<PathBuf>,

    /// Connect to a running engine over the Postgres wire protocol.
    pub server_mode: bool,
    pub server_address: String,
    pub server_port: u16,

    /// Error pattern file overriding the bundled patterns.
    pub error_patterns: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("stackql"),
            output: OutputFormat::default(),
            separator: ',',
            header: false,
            auth: None,
            custom_registry: None,
            app_root: None,
            backend: BackendStorage::default(),
            execution_concurrency_limit: -1,
            dataflow_dependency_max: 50,
            dataflow_components_max: 50,
            max_results: -1,
            page_limit: 20,
            max_depth: 5,
            api_timeout: 45,
            http_debug: false,
            proxy: None,
            debug: false,
            debug_log_file: None,
            server_mode: false,
            server_address: "127.0.0.1".to_string(),
            server_port: 5466,
            error_patterns: None,
        }
    }
}

const ALLOWED_PROXY_SCHEMES: [&str; 2] = ["http", "https"];

impl ExecutionConfig {
    /// Checks option combinations the engine would reject or misinterpret.
    pub fn validate(&self) -> Result<()> {
        if let Some(proxy) = &self.proxy {
            let scheme = proxy.scheme.to_lowercase();
            if !ALLOWED_PROXY_SCHEMES.contains(&scheme.as_str()) {
                return Err(ClientError::config(format!(
                    "Invalid proxy scheme '{}'. Expected one of: {}",
                    proxy.scheme,
                    ALLOWED_PROXY_SCHEMES.join(", ")
                )));
            }
        }

        if self.server_mode && self.output == OutputFormat::Delimited {
            return Err(ClientError::config(
                "Delimited output is not supported in server mode, use records or frame instead",
            ));
        }

        if let Some(auth) = &self.auth {
            auth_to_json(auth)?;
        }

        Ok(())
    }

    /// Returns the debug log path when debug logging is enabled.
    pub fn debug_log_path(&self) -> Option<PathBuf> {
        if !self.debug {
            return None;
        }
        self.debug_log_file.clone().or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
            Some(home.join(".stackql-client").join("debug.log"))
        })
    }

    /// Ensures the debug log directory exists.
    pub fn prepare_debug_log(&self) -> Result<Option<PathBuf>> {
        let Some(path) = self.debug_log_path() else {
            return Ok(None);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClientError::config(format!(
                    "Unable to create the log directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(Some(path))
    }

    /// Applies environment variables as defaults.
    pub fn apply_env_defaults(&mut self) {
        if self.engine_path == Path::new("stackql") {
            if let Ok(path) = std::env::var("STACKQL_PATH") {
                self.engine_path = PathBuf::from(path);
            }
        }
    }

    /// Builds the base argument list passed to `<engine>` for every query.
    ///
    /// The first element is always `exec`; the query is inserted after it.
    pub fn base_args(&self) -> Result<Vec<String>> {
        let mut args = vec!["exec".to_string()];

        push_flag(&mut args, "output", self.output.engine_flag());

        if let BackendStorage::File { location } = &self.backend {
            let dsn = serde_json::json!({ "dsn": format!("file:{}", location.display()) });
            push_flag(&mut args, "sqlBackend", dsn);
        }

        if let Some(app_root) = &self.app_root {
            push_flag(&mut args, "approot", app_root.display());
        }

        push_flag(
            &mut args,
            "execution.concurrency.limit",
            self.execution_concurrency_limit,
        );
        push_flag(&mut args, "dataflow.dependency.max", self.dataflow_dependency_max);
        push_flag(&mut args, "dataflow.components.max", self.dataflow_components_max);

        if let Some(auth) = &self.auth {
            push_flag(&mut args, "auth", auth_to_json(auth)?);
        }

        if let Some(registry) = &self.custom_registry {
            push_flag(&mut args, "registry", serde_json::json!({ "url": registry }));
        }

        if self.output == OutputFormat::Delimited {
            push_flag(&mut args, "delimiter", self.separator);
            if !self.header {
                args.push("--hideheaders".to_string());
            }
        }

        push_flag(&mut args, "http.response.maxResults", self.max_results);
        push_flag(&mut args, "http.response.pageLimit", self.page_limit);
        push_flag(&mut args, "indirect.depth.max", self.max_depth);
        push_flag(&mut args, "apirequesttimeout", self.api_timeout);

        if self.http_debug {
            args.push("--http.log.enabled".to_string());
        }

        if let Some(proxy) = &self.proxy {
            push_flag(&mut args, "http.proxy.host", &proxy.host);
            push_flag(&mut args, "http.proxy.port", proxy.port);
            if let Some(user) = &proxy.user {
                push_flag(&mut args, "http.proxy.user", user);
            }
            if let Some(password) = &proxy.password {
                push_flag(&mut args, "http.proxy.password", password);
            }
            push_flag(&mut args, "http.proxy.scheme", proxy.scheme.to_lowercase());
        }

        Ok(args)
    }
}

fn push_flag(args: &mut Vec<String>, name: &str, value: impl std::fmt::Display) {
    args.push(format!("--{name}"));
    args.push(value.to_string());
}

/// Serializes an auth object for `--auth`. Strings must already hold JSON.
pub fn auth_to_json(auth: &serde_json::Value) -> Result<String> {
    match auth {
        serde_json::Value::String(s) => {
            serde_json::from_str::<serde_json::Value>(s)
                .map_err(|e| ClientError::config(format!("Invalid auth JSON string: {e}")))?;
            Ok(s.clone())
        }
        serde_json::Value::Object(_) => Ok(auth.to_string()),
        other => Err(ClientError::config(format!(
            "Auth must be an object or a JSON string, got: {other}"
        ))),
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stackql-client")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ClientError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Gets a named query.
    pub fn get_query(&self, name: &str) -> Option<&str> {
        self.queries.get(name).map(String::as_str)
    }
}
