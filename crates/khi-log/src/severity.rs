//! Log severity levels

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Severity attached to a log or derived for it during recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Severity could not be determined
    #[default]
    Unknown,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Parse a provider severity string, case-insensitively.
    ///
    /// Unrecognized values map to [`Severity::Unknown`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" | "DEBUG" | "INFO" | "NOTICE" => Self::Info,
            "WARNING" | "WARN" => Self::Warning,
            "ERROR" | "ERR" => Self::Error,
            "CRITICAL" | "ALERT" | "EMERGENCY" | "FATAL" => Self::Fatal,
            _ => Self::Unknown,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}
