//! Command-line argument parsing for stackql-client.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stackql_client::config::Config;
use stackql_client::engine::CallOverrides;
use stackql_client::error::{ClientError, Result};

/// Run StackQL queries and print normalized results.
#[derive(Parser, Debug)]
#[command(name = "stackql-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Engine executable (overrides the config file)
    #[arg(long, global = true, env = "STACKQL_PATH", value_name = "PATH")]
    pub engine: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to the client log file instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a query that returns rows
    Exec(QueryArgs),

    /// Run a statement (INSERT, DELETE, REGISTRY PULL, ...) and print its message
    Stmt(QueryArgs),

    /// Run the queries in a file concurrently and merge their rows
    Batch {
        /// File of queries, each terminated by `;`
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format (records or frame)
        #[arg(short, long, value_name = "FORMAT")]
        output: Option<String>,
    },

    /// Run a query against an engine server
    Server {
        /// Query text, or `@name` for a preset from the config file
        #[arg(value_name = "QUERY")]
        query: Option<String>,

        /// Run the query as a statement
        #[arg(long)]
        stmt: bool,

        /// Only check that the server answers
        #[arg(long, conflicts_with = "stmt")]
        test: bool,

        /// Server host
        #[arg(short = 'H', long, value_name = "HOST")]
        host: Option<String>,

        /// Server port
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,
    },
}

/// Options shared by `exec` and `stmt`.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query text, or `@name` for a preset from the config file
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Output format for this call (records, frame, delimited, keyvalue)
    #[arg(short, long, value_name = "FORMAT")]
    pub output: Option<String>,

    /// Auth JSON for this call, replacing the configured auth
    #[arg(long, value_name = "JSON")]
    pub auth: Option<String>,

    /// Environment variable for the engine process (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Report engine messages instead of treating them as empty results
    #[arg(long)]
    pub show_errors: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

impl QueryArgs {
    /// Builds the per-call overrides from the flags.
    pub fn overrides(&self) -> Result<CallOverrides> {
        let mut overrides = CallOverrides::new();
        if let Some(output) = &self.output {
            overrides = overrides.with_output(output.parse()?);
        }
        if let Some(auth) = &self.auth {
            let value = serde_json::from_str(auth)
                .map_err(|e| ClientError::config(format!("Invalid --auth JSON: {e}")))?;
            overrides = overrides.with_auth(value);
        }
        for (key, value) in &self.env {
            overrides = overrides.with_env(key, value);
        }
        Ok(overrides)
    }
}

/// Resolves `@name` to a preset query from the config file.
pub fn resolve_query(query: &str, config: &Config) -> Result<String> {
    match query.strip_prefix('@') {
        Some(name) => config
            .get_query(name)
            .map(str::to_string)
            .ok_or_else(|| ClientError::config(format!("Query '{name}' not found in config file"))),
        None => Ok(query.to_string()),
    }
}

/// Splits a batch file into queries.
///
/// A query ends at a line whose last non-blank character is `;`. Blank lines
/// and `--` comment lines are skipped. A trailing query without `;` counts.
pub fn split_batch(text: &str) -> Vec<String> {
    let mut queries = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        match trimmed.strip_suffix(';') {
            Some(last) => {
                current.push(last.trim_end());
                let query = current.join("\n").trim().to_string();
                if !query.is_empty() {
                    queries.push(query);
                }
                current.clear();
            }
            None => current.push(line.trim_end()),
        }
    }

    let rest = current.join("\n").trim().to_string();
    if !rest.is_empty() {
        queries.push(rest);
    }
    queries
}

fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid environment variable '{s}'. Expected KEY=VALUE")),
    }
}
