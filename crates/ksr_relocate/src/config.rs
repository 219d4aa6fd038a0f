//! `ksr.toml` configuration.

use crate::archive::RelocationOptions;
use ksr_rules::{RuleError, RuleSet};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Verbosity of the relocation log, as written in `log_level` or passed to
/// `--log-level`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

const LEVEL_NAMES: [(LogLevel, &str); 5] = [
    (LogLevel::Trace, "trace"),
    (LogLevel::Debug, "debug"),
    (LogLevel::Info, "info"),
    (LogLevel::Warn, "warn"),
    (LogLevel::Error, "error"),
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level: {0}. Expected one of: {choices}", choices = level_choices())]
pub struct UnknownLogLevel(pub String);

fn level_choices() -> String {
    let names: Vec<_> = LEVEL_NAMES.iter().map(|(_, name)| *name).collect();
    names.join(", ")
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        LEVEL_NAMES[self as usize].1
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let wanted = if lowered == "warning" {
            "warn".to_string()
        } else {
            lowered
        };
        LEVEL_NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(level, _)| *level)
            .ok_or(UnknownLogLevel(wanted))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = UnknownLogLevel;

    fn try_from(value: String) -> Result<Self, UnknownLogLevel> {
        value.parse()
    }
}

/// One `[[relocate]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelocationEntry {
    pub pattern: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelocationConfig {
    pub log_level: LogLevel,
    pub relocate_string_literals: bool,
    #[serde(rename = "relocate")]
    pub relocations: Vec<RelocationEntry>,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            relocate_string_literals: true,
            relocations: Vec::new(),
        }
    }
}

impl RelocationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn push(&mut self, pattern: impl Into<String>, destination: impl Into<String>) {
        self.relocations.push(RelocationEntry {
            pattern: pattern.into(),
            destination: destination.into(),
        });
    }

    /// Registers the relocations in file order.
    pub fn rule_set(&self) -> Result<RuleSet, RuleError> {
        RuleSet::from_pairs(
            self.relocations
                .iter()
                .map(|entry| (entry.pattern.as_str(), entry.destination.as_str())),
        )
    }

    pub fn options(&self) -> RelocationOptions {
        RelocationOptions {
            string_literals: self.relocate_string_literals,
        }
    }
}
