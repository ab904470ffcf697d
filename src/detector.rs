//! Error classification for engine output.
//!
//! The engine does not reliably separate failures from data: a provider error
//! can arrive on stdout packaged as a row, and a harmless status message can
//! arrive on stderr. `ErrorDetector` decides using three tiers of patterns,
//! checked in order: fuzzy substrings, exact/prefix strings, then regexes.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Patterns bundled with the crate.
const DEFAULT_PATTERNS: &str = include_str!("error_patterns.toml");

/// Which tier of the pattern set produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Fuzzy,
    Exact,
    Regex,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fuzzy => "fuzzy",
            Self::Exact => "exact",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details about a message that matched an error pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// The full message that was checked.
    pub error: String,
    /// The pattern that matched (lowercased for fuzzy patterns).
    pub matched_pattern: String,
    /// The tier the pattern belongs to.
    pub pattern_kind: PatternKind,
}

/// On-disk layout of a pattern file.
#[derive(Debug, Default, Deserialize)]
struct PatternFile {
    #[serde(default)]
    errors: PatternLists,
}

#[derive(Debug, Default, Deserialize)]
struct PatternLists {
    #[serde(default)]
    fuzzy_matches: Vec<String>,
    #[serde(default)]
    exact_matches: Vec<String>,
    #[serde(default)]
    regex_matches: Vec<String>,
}

/// The three ordered pattern lists, ready for matching.
#[derive(Debug, Clone, Default)]
pub struct ErrorPatternSet {
    fuzzy: Vec<String>,
    exact: Vec<String>,
    regex: Vec<(String, Regex)>,
}

impl ErrorPatternSet {
    /// Builds a pattern set from raw lists. Empty entries are dropped and
    /// invalid regexes are skipped with a warning.
    pub fn new<F, E, R>(fuzzy: F, exact: E, regex: R) -> Self
    where
        F: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
        R: IntoIterator<Item = String>,
    {
        let fuzzy = fuzzy
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();

        let exact = exact.into_iter().filter(|p| !p.is_empty()).collect();

        let regex = regex
            .into_iter()
            .filter(|p| !p.is_empty())
            .filter_map(|p| {
                match RegexBuilder::new(&p).case_insensitive(true).build() {
                    Ok(compiled) => Some((p, compiled)),
                    Err(e) => {
                        warn!("Invalid regex pattern '{}': {}", p, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            fuzzy,
            exact,
            regex,
        }
    }

    pub fn fuzzy_patterns(&self) -> &[String] {
        &self.fuzzy
    }

    pub fn exact_patterns(&self) -> &[String] {
        &self.exact
    }

    /// Returns the source strings of the compiled regex patterns.
    pub fn regex_patterns(&self) -> impl Iterator<Item = &str> {
        self.regex.iter().map(|(source, _)| source.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fuzzy.is_empty() && self.exact.is_empty() && self.regex.is_empty()
    }
}

/// Classifies text as an error using an immutable [`ErrorPatternSet`].
#[derive(Debug, Clone, Default)]
pub struct ErrorDetector {
    patterns: ErrorPatternSet,
}

impl ErrorDetector {
    /// Creates a detector with the bundled patterns.
    pub fn new() -> Self {
        Self::from_toml_str(DEFAULT_PATTERNS, "bundled error patterns")
    }

    /// Creates a detector with an explicit pattern set.
    pub fn with_patterns(patterns: ErrorPatternSet) -> Self {
        Self { patterns }
    }

    /// Loads patterns from a TOML file.
    ///
    /// A missing or malformed file yields a detector with no patterns.
    pub fn from_path(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content, &path.display().to_string()),
            Err(e) => {
                warn!(
                    "Could not load error patterns from {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parses patterns from TOML content; `source` only labels log messages.
    pub fn from_toml_str(content: &str, source: &str) -> Self {
        match toml::from_str::<PatternFile>(content) {
            Ok(file) => {
                let lists = file.errors;
                let patterns = ErrorPatternSet::new(
                    lists.fuzzy_matches,
                    lists.exact_matches,
                    lists.regex_matches,
                );
                debug!(
                    "Loaded {} fuzzy, {} exact, {} regex error patterns from {}",
                    patterns.fuzzy.len(),
                    patterns.exact.len(),
                    patterns.regex.len(),
                    source
                );
                Self { patterns }
            }
            Err(e) => {
                warn!("Could not parse error patterns from {}: {}", source, e);
                Self::default()
            }
        }
    }

    pub fn patterns(&self) -> &ErrorPatternSet {
        &self.patterns
    }

    /// Returns true if the message matches any error pattern.
    pub fn is_error(&self, message: &str) -> bool {
        self.find_match(message).is_some()
    }

    /// Same as [`is_error`](Self::is_error), for JSON values. Only strings can be errors.
    pub fn is_error_value(&self, value: &serde_json::Value) -> bool {
        value.as_str().is_some_and(|s| self.is_error(s))
    }

    /// Returns details about the first pattern that matches, if any.
    pub fn extract_error_info(&self, message: &str) -> Option<ErrorInfo> {
        self.find_match(message)
            .map(|(matched_pattern, pattern_kind)| ErrorInfo {
                error: message.to_string(),
                matched_pattern: matched_pattern.to_string(),
                pattern_kind,
            })
    }

    fn find_match(&self, message: &str) -> Option<(&str, PatternKind)> {
        if message.is_empty() {
            return None;
        }

        let lowered = message.to_lowercase();
        if let Some(p) = self.patterns.fuzzy.iter().find(|p| lowered.contains(p.as_str())) {
            return Some((p, PatternKind::Fuzzy));
        }

        // `starts_with` also covers equality
        if let Some(p) = self
            .patterns
            .exact
            .iter()
            .find(|p| message.starts_with(p.as_str()))
        {
            return Some((p, PatternKind::Exact));
        }

        self.patterns
            .regex
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(source, _)| (source.as_str(), PatternKind::Regex))
    }
}
