//! Run coordinates and run records.
//!
//! A run is identified by where its `log.txt` sits in the results tree:
//!
//! - few-shot: `<root>/<dataset>/shots_<K>/<model>/<config>/seed<N>/log.txt`
//! - base-to-new: `<root>/base2new/test_<base|new>/<dataset>/shots_16/<model>/<config>/seed<N>/log.txt`
//!
//! [`RunCoordinates::from_log_path`] is the single place that layout is decoded.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Result, ShotlogError};

/// Log file name terminating every run directory.
pub const LOG_FILE_NAME: &str = "log.txt";

/// Top-level directory holding base-to-new runs.
pub const BASE2NEW_DIR: &str = "base2new";

/// Shot count used for base-to-new runs by convention.
pub const BASE2NEW_SHOTS: u32 = 16;

/// Well-known metric names.
pub mod metric {
    pub const ACCURACY: &str = "accuracy";
    pub const BASE_ACCURACY: &str = "base_accuracy";
    pub const NEW_ACCURACY: &str = "new_accuracy";
    pub const HARMONIC_MEAN: &str = "harmonic_mean";
    pub const PRECISION: &str = "precision";
    pub const RECALL: &str = "recall";
    pub const F1_SCORE: &str = "f1_score";
    pub const MACRO_F1: &str = "macro_f1";
    pub const BALANCED_ACCURACY: &str = "balanced_accuracy";

    /// Pseudo-metric exposing a record's evaluation time.
    pub const EVAL_TIME_SECONDS: &str = "eval_time_seconds";

    /// Optional metrics the parser picks up next to `accuracy`.
    pub const AUXILIARY: [&str; 5] = [PRECISION, RECALL, F1_SCORE, MACRO_F1, BALANCED_ACCURACY];
}

/// Kind of evaluation sweep a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    FewShot,
    #[serde(rename = "base2new")]
    BaseToNew,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::FewShot => "few_shot",
            RunKind::BaseToNew => "base2new",
        }
    }

    /// Metric columns a store of this kind persists, in header order.
    pub fn metric_columns(&self) -> &'static [&'static str] {
        match self {
            RunKind::FewShot => &[
                metric::ACCURACY,
                metric::PRECISION,
                metric::RECALL,
                metric::F1_SCORE,
                metric::MACRO_F1,
                metric::BALANCED_ACCURACY,
            ],
            RunKind::BaseToNew => &[
                metric::BASE_ACCURACY,
                metric::NEW_ACCURACY,
                metric::HARMONIC_MEAN,
            ],
        }
    }

    /// Metrics every record of this kind must carry.
    pub fn required_metrics(&self) -> &'static [&'static str] {
        match self {
            RunKind::FewShot => &[metric::ACCURACY],
            RunKind::BaseToNew => &[
                metric::BASE_ACCURACY,
                metric::NEW_ACCURACY,
                metric::HARMONIC_MEAN,
            ],
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = ShotlogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "few_shot" | "few-shot" | "fewshot" => Ok(RunKind::FewShot),
            "base2new" | "base-to-new" | "base_to_new" | "b2n" => Ok(RunKind::BaseToNew),
            other => Err(ShotlogError::InvalidRunKind(other.to_string())),
        }
    }
}

/// Which half of a base-to-new evaluation a log reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtask {
    None,
    Base,
    New,
}

impl Subtask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subtask::None => "none",
            Subtask::Base => "base",
            Subtask::New => "new",
        }
    }

    /// Directory name under `base2new/` for this subtask.
    pub fn test_dir(&self) -> Option<&'static str> {
        match self {
            Subtask::None => None,
            Subtask::Base => Some("test_base"),
            Subtask::New => Some("test_new"),
        }
    }

    fn from_test_dir(name: &str) -> Option<Self> {
        match name {
            "test_base" => Some(Subtask::Base),
            "test_new" => Some(Subtask::New),
            _ => None,
        }
    }

    /// The other half of a base-to-new pair.
    pub fn partner(&self) -> Option<Self> {
        match self {
            Subtask::None => None,
            Subtask::Base => Some(Subtask::New),
            Subtask::New => Some(Subtask::Base),
        }
    }
}

impl fmt::Display for Subtask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subtask {
    type Err = ShotlogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Subtask::None),
            "base" => Ok(Subtask::Base),
            "new" => Ok(Subtask::New),
            other => Err(ShotlogError::InvalidRecord(format!("unknown subtask: {other}"))),
        }
    }
}

/// Labeled examples per class, or `NotApplicable` (written as `N/A`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ShotCount {
    Shots(u32),
    NotApplicable,
}

impl ShotCount {
    /// Parse a `shots_<K>` directory name.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.strip_prefix("shots_")
            .and_then(|k| k.parse::<u32>().ok())
            .filter(|k| *k > 0)
            .map(ShotCount::Shots)
    }

    /// Directory name for this shot count, if it has one.
    pub fn dir_name(&self) -> Option<String> {
        match self {
            ShotCount::Shots(k) => Some(format!("shots_{k}")),
            ShotCount::NotApplicable => None,
        }
    }
}

impl fmt::Display for ShotCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShotCount::Shots(k) => write!(f, "{k}"),
            ShotCount::NotApplicable => f.write_str("N/A"),
        }
    }
}

impl FromStr for ShotCount {
    type Err = ShotlogError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("n/a") || s.eq_ignore_ascii_case("na") {
            return Ok(ShotCount::NotApplicable);
        }
        match s.parse::<u32>() {
            Ok(k) if k > 0 => Ok(ShotCount::Shots(k)),
            _ => Err(ShotlogError::InvalidRecord(format!("invalid shot count: {s}"))),
        }
    }
}

impl TryFrom<String> for ShotCount {
    type Error = ShotlogError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ShotCount> for String {
    fn from(value: ShotCount) -> Self {
        value.to_string()
    }
}

/// Parse a `seed<N>` directory name.
pub fn seed_from_dir_name(name: &str) -> Option<u32> {
    name.strip_prefix("seed")
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Position of one run in the evaluation sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunCoordinates {
    pub model: String,
    /// Trainer configuration directory (e.g. `nctx4_cscFalse_ctpend`), when known.
    pub config: Option<String>,
    pub dataset: String,
    pub shot_count: ShotCount,
    pub seed: u32,
    pub subtask: Subtask,
}

impl RunCoordinates {
    pub fn new(model: &str, dataset: &str, shot_count: ShotCount, seed: u32) -> Self {
        Self {
            model: model.to_string(),
            config: None,
            dataset: dataset.to_string(),
            shot_count,
            seed,
            subtask: Subtask::None,
        }
    }

    pub fn with_config(mut self, config: &str) -> Self {
        self.config = Some(config.to_string());
        self
    }

    pub fn with_subtask(mut self, subtask: Subtask) -> Self {
        self.subtask = subtask;
        self
    }

    /// Decode the coordinates of a `log.txt` from the trailing components of its path.
    ///
    /// Only the tail of the path is inspected, so any root prefix is accepted.
    /// Returns `None` for paths that do not follow the layout of `kind`.
    pub fn from_log_path(path: &Path, kind: RunKind) -> Option<Self> {
        let parts: Vec<&str> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();

        let n = parts.len();
        if n < 6 || parts[n - 1] != LOG_FILE_NAME {
            return None;
        }

        let dataset = parts[n - 6];
        let shot_count = ShotCount::from_dir_name(parts[n - 5])?;
        let model = parts[n - 4];
        let config = parts[n - 3];
        let seed = seed_from_dir_name(parts[n - 2])?;

        if dataset.starts_with('.') || dataset == BASE2NEW_DIR {
            return None;
        }

        let subtask = if n >= 8 && parts[n - 8] == BASE2NEW_DIR {
            Subtask::from_test_dir(parts[n - 7])
        } else {
            None
        };

        let subtask = match (kind, subtask) {
            (RunKind::FewShot, None) => Subtask::None,
            (RunKind::BaseToNew, Some(subtask)) => subtask,
            _ => return None,
        };

        Some(Self {
            model: model.to_string(),
            config: Some(config.to_string()),
            dataset: dataset.to_string(),
            shot_count,
            seed,
            subtask,
        })
    }

    /// Inverse of [`from_log_path`](Self::from_log_path): where this run's log lives under `root`.
    pub fn log_path(&self, root: &Path) -> Option<PathBuf> {
        let shots = self.shot_count.dir_name()?;
        let config = self.config.as_deref()?;
        let mut path = root.to_path_buf();
        if let Some(test_dir) = self.subtask.test_dir() {
            path.push(BASE2NEW_DIR);
            path.push(test_dir);
        }
        path.push(&self.dataset);
        path.push(shots);
        path.push(&self.model);
        path.push(config);
        path.push(format!("seed{}", self.seed));
        path.push(LOG_FILE_NAME);
        Some(path)
    }

    /// Coordinates with the subtask cleared, used as a base-to-new pairing key.
    pub fn without_subtask(&self) -> Self {
        Self {
            subtask: Subtask::None,
            ..self.clone()
        }
    }
}

/// `2·base·new / (base + new)`, or 0 when either side is 0.
pub fn harmonic_mean(base: f64, new: f64) -> f64 {
    if base == 0.0 || new == 0.0 || base + new == 0.0 {
        0.0
    } else {
        2.0 * base * new / (base + new)
    }
}

/// One completed evaluation run, as persisted in a record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub model: String,
    pub checkpoint_path: Option<String>,
    pub dataset: String,
    pub shot_count: ShotCount,
    pub seed: u32,
    pub subtask: Subtask,
    pub metric_values: BTreeMap<String, f64>,
    /// Absent when the record was back-filled from an existing log.
    pub eval_time_seconds: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
}

impl RunRecord {
    /// Create a record for `coords` with the given metrics, stamped now.
    pub fn new(coords: &RunCoordinates, metric_values: BTreeMap<String, f64>) -> Self {
        Self {
            model: coords.model.clone(),
            checkpoint_path: None,
            dataset: coords.dataset.clone(),
            shot_count: coords.shot_count,
            seed: coords.seed,
            subtask: coords.subtask,
            metric_values,
            eval_time_seconds: None,
            timestamp: Utc::now(),
            notes: None,
        }
    }

    /// Combine the two halves of a base-to-new run into one record.
    pub fn base_to_new(coords: &RunCoordinates, base_accuracy: f64, new_accuracy: f64) -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert(metric::BASE_ACCURACY.to_string(), base_accuracy);
        metrics.insert(metric::NEW_ACCURACY.to_string(), new_accuracy);
        metrics.insert(
            metric::HARMONIC_MEAN.to_string(),
            harmonic_mean(base_accuracy, new_accuracy),
        );
        Self::new(&coords.without_subtask(), metrics)
    }

    pub fn with_eval_time(mut self, seconds: Option<f64>) -> Self {
        self.eval_time_seconds = seconds;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Option<String>) -> Self {
        self.checkpoint_path = checkpoint.filter(|c| !c.is_empty());
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.is_empty());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Value of a metric, including the `eval_time_seconds` pseudo-metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        if name == metric::EVAL_TIME_SECONDS {
            return self.eval_time_seconds;
        }
        self.metric_values.get(name).copied()
    }

    /// Check the per-kind invariants on metrics and eval time.
    pub fn validate(&self, kind: RunKind) -> Result<()> {
        for required in kind.required_metrics() {
            if !self.metric_values.contains_key(*required) {
                return Err(ShotlogError::InvalidRecord(format!(
                    "{kind} record for {}/{}/seed{} is missing '{required}'",
                    self.dataset, self.shot_count, self.seed
                )));
            }
        }
        if let Some((name, value)) = self.metric_values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ShotlogError::InvalidRecord(format!(
                "metric '{name}' is not finite: {value}"
            )));
        }
        if let Some(t) = self.eval_time_seconds {
            if !(t.is_finite() && t >= 0.0) {
                return Err(ShotlogError::InvalidRecord(format!(
                    "eval time must be non-negative, got {t}"
                )));
            }
        }
        Ok(())
    }

    /// Equality on everything except the creation timestamp.
    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            timestamp: other.timestamp,
            ..self.clone()
        } == *other
    }
}
