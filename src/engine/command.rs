//! Invocation building for the engine executable.
//!
//! The base argument list is computed once from [`ExecutionConfig`]; each
//! call clones it, applies [`CallOverrides`] and inserts the query. Commands
//! are spawned from an argv list, so the query reaches the engine verbatim.
//! Quoting only matters where a command line is rendered as a string.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempPath;

use super::CallOverrides;
use crate::config::{auth_to_json, ExecutionConfig};
use crate::error::{ClientError, Result};
use crate::output::OutputFormat;

/// Host platform conventions for building commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    /// Returns the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    /// Returns the quoting used to render command lines on this platform.
    pub fn quoting(&self) -> Quoting {
        match self {
            Self::Posix => Quoting::Posix,
            Self::Windows => Quoting::Windows,
        }
    }
}

/// Strategy for quoting one argument in a rendered command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// POSIX shell single quotes.
    Posix,
    /// Double quotes with `\"` escapes.
    Windows,
    /// PowerShell single quotes with `''` escapes. Every value is quoted,
    /// since a bare word is parsed as a command.
    PowerShell,
}

impl Quoting {
    /// Quotes `arg` so the target shell reads it back as one word.
    pub fn quote(&self, arg: &str) -> String {
        match self {
            Self::PowerShell => powershell_literal(arg),
            _ if !arg.is_empty() && arg.chars().all(is_shell_safe) => arg.to_string(),
            Self::Posix => format!("'{}'", arg.replace('\'', r#"'"'"'"#)),
            Self::Windows => format!("\"{}\"", arg.replace('"', "\\\"")),
        }
    }

    /// Quotes an argument for a native executable called from a PowerShell
    /// script.
    ///
    /// Windows PowerShell 5.1 re-joins native arguments without escaping
    /// embedded double quotes, so they are escaped for the child's
    /// command-line parser before the PowerShell literal is formed.
    pub fn native_arg(&self, arg: &str) -> String {
        match self {
            Self::PowerShell => powershell_literal(&escape_native_quotes(arg)),
            _ => self.quote(arg),
        }
    }

    /// Quotes and joins arguments with spaces.
    pub fn join<'a, I>(&self, args: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        args.into_iter()
            .map(|a| self.quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | ',' | '=' | '+' | '@' | '%')
}

/// PowerShell treats the typographic single quotes as quote characters too.
fn powershell_literal(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Escapes `"` as `\"`, doubling any backslashes directly before it, following
/// the MSVC runtime argument rules.
fn escape_native_quotes(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                backslashes = 0;
            }
        }
        if c != '\\' {
            out.push(c);
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes));
    out
}

/// A fully formed command for one query.
///
/// When environment variables had to be written to a temporary script, the
/// script is owned here and deleted when the invocation is dropped.
#[derive(Debug)]
pub struct Invocation {
    program: OsString,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    engine: PathBuf,
    quoting: Quoting,
    script: Option<TempPath>,
}

impl Invocation {
    pub fn program(&self) -> &Path {
        Path::new(&self.program)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment variables passed to the child only.
    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// The engine executable this invocation ultimately runs.
    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// Path of the temporary script, if one was written.
    pub fn script_path(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    /// Returns the program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program().display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Renders the invocation as a shell command line, for logs and errors.
    pub fn command_line(&self) -> String {
        let assignments = self
            .envs
            .iter()
            .map(|(k, v)| format!("{k}={}", self.quoting.quote(v)));
        let program = self.program().display().to_string();
        let words = std::iter::once(self.quoting.quote(&program))
            .chain(self.args.iter().map(|a| self.quoting.quote(a)));
        assignments.chain(words).collect::<Vec<_>>().join(" ")
    }

    /// Creates the `std::process::Command` for this invocation.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.envs.iter().map(|(k, v)| (k, v)));
        command
    }
}

/// Builds per-call invocations from a fixed base argument list.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    engine_path: PathBuf,
    base_args: Vec<String>,
    output: OutputFormat,
    separator: char,
    header: bool,
    platform: Platform,
}

impl CommandBuilder {
    /// Creates a builder for the current platform.
    pub fn new(config: &ExecutionConfig) -> Result<Self> {
        Self::for_platform(config, Platform::current())
    }

    /// Creates a builder using the conventions of `platform`.
    pub fn for_platform(config: &ExecutionConfig, platform: Platform) -> Result<Self> {
        Ok(Self {
            engine_path: config.engine_path.clone(),
            base_args: config.base_args()?,
            output: config.output,
            separator: config.separator,
            header: config.header,
            platform,
        })
    }

    pub fn engine_path(&self) -> &Path {
        &self.engine_path
    }

    pub fn base_args(&self) -> &[String] {
        &self.base_args
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Builds the invocation for `query` with `overrides` applied.
    pub fn build(&self, query: &str, overrides: &CallOverrides) -> Result<Invocation> {
        let mut args = self.base_args.clone();

        if overrides.changes_output() {
            self.apply_output_overrides(&mut args, overrides);
        }

        if let Some(auth) = &overrides.auth {
            remove_flag(&mut args, "--auth", true);
            args.push("--auth".to_string());
            args.push(auth_to_json(auth)?);
        }

        args.insert(1.min(args.len()), query.to_string());

        for key in overrides.env_vars.keys() {
            validate_env_key(key)?;
        }

        if overrides.env_vars.is_empty() || self.platform == Platform::Posix {
            return Ok(Invocation {
                program: self.engine_path.clone().into_os_string(),
                args,
                envs: overrides
                    .env_vars
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                engine: self.engine_path.clone(),
                quoting: self.platform.quoting(),
                script: None,
            });
        }

        self.build_script_invocation(args, overrides)
    }

    fn apply_output_overrides(&self, args: &mut Vec<String>, overrides: &CallOverrides) {
        let output = overrides.output.unwrap_or(self.output);
        let separator = overrides.separator.unwrap_or(self.separator);
        let header = overrides.header.unwrap_or(self.header);

        set_flag(args, "--output", output.engine_flag());
        remove_flag(args, "--delimiter", true);
        remove_flag(args, "--hideheaders", false);

        if output == OutputFormat::Delimited {
            args.push("--delimiter".to_string());
            args.push(separator.to_string());
            if !header {
                args.push("--hideheaders".to_string());
            }
        }
    }

    /// Env vars cannot be inlined reliably on Windows, so a PowerShell script
    /// sets them and then runs the engine.
    fn build_script_invocation(
        &self,
        args: Vec<String>,
        overrides: &CallOverrides,
    ) -> Result<Invocation> {
        let ps = Quoting::PowerShell;
        let mut script = String::new();
        for (key, value) in &overrides.env_vars {
            script.push_str(&format!("$env:{key} = {};\n", ps.quote(value)));
        }
        let engine = self.engine_path.display().to_string();
        let native_args = args
            .iter()
            .map(|a| ps.native_arg(a))
            .collect::<Vec<_>>()
            .join(" ");
        script.push_str(&format!(
            "& {} {native_args}\nexit $LASTEXITCODE\n",
            ps.quote(&engine)
        ));

        let mut file = tempfile::Builder::new()
            .prefix("stackql-")
            .suffix(".ps1")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;
        let script_path = file.into_temp_path();

        Ok(Invocation {
            program: OsString::from("powershell"),
            args: vec![
                "-NoProfile".to_string(),
                "-ExecutionPolicy".to_string(),
                "Bypass".to_string(),
                "-File".to_string(),
                script_path.display().to_string(),
            ],
            envs: Vec::new(),
            engine: self.engine_path.clone(),
            quoting: Quoting::Windows,
            script: Some(script_path),
        })
    }
}

fn validate_env_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ClientError::config(format!(
            "Invalid environment variable name '{key}'"
        )))
    }
}

/// Removes every occurrence of `flag` (and its value, if it takes one).
fn remove_flag(args: &mut Vec<String>, flag: &str, takes_value: bool) {
    while let Some(i) = args.iter().position(|a| a == flag) {
        let end = if takes_value { (i + 2).min(args.len()) } else { i + 1 };
        args.drain(i..end);
    }
}

/// Replaces the value of `flag`, or appends the pair if absent.
fn set_flag(args: &mut Vec<String>, flag: &str, value: &str) {
    match args.iter().position(|a| a == flag) {
        Some(i) if i + 1 < args.len() => args[i + 1] = value.to_string(),
        _ => {
            remove_flag(args, flag, false);
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    }
}
