// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Captured log entries and their severity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// Severity of a captured line, ordered from most to least severe.
///
/// The discriminants follow the usual engine verbosity numbering, so
/// `Fatal = 1` and `VeryVerbose = 7`. A *lower* number is *more* severe, which
/// is why the [`Ord`] implementation is reversed: `Fatal > Error > ... >
/// VeryVerbose`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Severity {
    Fatal = 1,
    Error = 2,
    Warning = 3,
    Display = 4,
    Log = 5,
    Verbose = 6,
    VeryVerbose = 7,
}

impl Severity {
    pub const ALL: [Severity; 7] = [
        Severity::Fatal,
        Severity::Error,
        Severity::Warning,
        Severity::Display,
        Severity::Log,
        Severity::Verbose,
        Severity::VeryVerbose,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Fatal => "Fatal",
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Display => "Display",
            Severity::Log => "Log",
            Severity::Verbose => "Verbose",
            Severity::VeryVerbose => "VeryVerbose",
        }
    }

    /// Maps a raw engine verbosity value. Anything outside `1..=7` is `None`.
    #[must_use]
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| *s as u8 == raw)
    }

    /// Canonical name for a raw verbosity value, `Unknown` when unmapped.
    #[must_use]
    pub fn raw_name(raw: u8) -> &'static str {
        Self::from_raw(raw).map_or("Unknown", Self::as_str)
    }

    /// Whether a line of this severity passes a filter set at `threshold`.
    #[must_use]
    pub fn passes(self, threshold: Severity) -> bool {
        self >= threshold
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*other as u8).cmp(&(*self as u8))
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        if lowered == "all" {
            return Ok(Severity::VeryVerbose);
        }
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str().to_lowercase() == lowered)
            .ok_or_else(|| format!("unknown severity '{s}'"))
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::INFO => Severity::Log,
            tracing::Level::DEBUG => Severity::Verbose,
            _ => Severity::VeryVerbose,
        }
    }
}

/// One captured log entry. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: String,
    pub message: String,
}

impl LogLine {
    /// Builds a line stamped with the current time.
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(Utc::now(), severity, category, message)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            severity,
            category: category.into(),
            message: message.into(),
        }
    }
}
