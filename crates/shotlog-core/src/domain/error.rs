//! Domain-level error taxonomy for shotlog.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Why a discovered run was left out of a scan.
///
/// These are the recoverable conditions: a scan records them and keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A directory or file in the expected layout is absent.
    PathNotFound,
    /// The log exists but has no line for a required metric.
    MetricNotFound,
    /// A metric line was found but its value is not a number.
    MalformedNumber,
    /// One half of a base-to-new pair has no partner log.
    UnpairedSubtask,
    /// The log could not be read (permissions, invalid UTF-8, ...).
    Unreadable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::PathNotFound => "path not found",
            SkipReason::MetricNotFound => "metric not found",
            SkipReason::MalformedNumber => "malformed number",
            SkipReason::UnpairedSubtask => "unpaired subtask",
            SkipReason::Unreadable => "unreadable log",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// shotlog domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ShotlogError {
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("metric '{metric}' not found in {}", path.display())]
    MetricNotFound { path: PathBuf, metric: String },

    #[error("malformed number '{raw}' for metric '{metric}'")]
    MalformedNumber { metric: String, raw: String },

    #[error("no {missing} log to pair with {}", present.display())]
    UnpairedSubtask { present: PathBuf, missing: String },

    #[error("failed to append record to {}: {source}", path.display())]
    StoreWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read record store {}: {detail}", path.display())]
    StoreReadFailure { path: PathBuf, detail: String },

    #[error("record store {} has header '{found}', expected '{expected}'", path.display())]
    StoreSchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unknown dimension: {0}")]
    InvalidDimension(String),

    #[error("unknown spread kind: {0} (expected stddev or ci95)")]
    InvalidSpread(String),

    #[error("unknown run kind: {0} (expected few-shot or base2new)")]
    InvalidRunKind(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShotlogError {
    /// The skip reason for errors a scan recovers from, `None` for fatal ones.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ShotlogError::PathNotFound(_) => Some(SkipReason::PathNotFound),
            ShotlogError::MetricNotFound { .. } => Some(SkipReason::MetricNotFound),
            ShotlogError::MalformedNumber { .. } => Some(SkipReason::MalformedNumber),
            ShotlogError::UnpairedSubtask { .. } => Some(SkipReason::UnpairedSubtask),
            _ => None,
        }
    }
}

/// Result type for shotlog domain operations.
pub type Result<T> = std::result::Result<T, ShotlogError>;
