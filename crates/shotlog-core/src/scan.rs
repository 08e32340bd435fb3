//! Scan pipeline: locate logs, parse them into records, optionally append.
//!
//! Recoverable failures (missing file, no accuracy line, malformed number,
//! unpaired base-to-new half) skip the offending log with a warning and the
//! scan continues. Store failures are fatal; records appended before the
//! failure stay in the store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::domain::{
    metric, Result, RunCoordinates, RunKind, RunRecord, ShotCount, ShotlogError, SkipReason,
    Subtask, SweepConfig,
};
use crate::locator::{LocatedLog, LogLocator};
use crate::obs;
use crate::parser::parse_log_file;
use crate::store::RecordStore;

/// A log the scan could not turn into a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedLog {
    pub path: PathBuf,
    pub reason: SkipReason,
    pub detail: String,
}

/// Counts and skip details for one scan.
///
/// Every found log is either parsed or skipped: `found == parsed + skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub found: usize,
    pub parsed: usize,
    pub skipped: Vec<SkippedLog>,
    /// Records written to the store, when the scan appended.
    pub appended: usize,
    /// Expected (dataset, shot count) cells with no log at all.
    pub missing_cells: Vec<(String, ShotCount)>,
}

impl ScanSummary {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Skipped logs per reason.
    pub fn skip_counts(&self) -> BTreeMap<SkipReason, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.skipped {
            *counts.entry(s.reason).or_insert(0) += 1;
        }
        counts
    }

    fn skip(&mut self, path: &Path, err: &ShotlogError) {
        let reason = err.skip_reason().unwrap_or(SkipReason::Unreadable);
        obs::emit_log_skipped(path, &reason, err);
        self.skipped.push(SkippedLog {
            path: path.to_path_buf(),
            reason,
            detail: err.to_string(),
        });
    }
}

/// Records produced by a scan, in discovery order, and its summary.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub records: Vec<RunRecord>,
    pub summary: ScanSummary,
}

/// Filters and expectations applied to a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub model: Option<String>,
    pub datasets: Vec<String>,
    pub expected_cells: Vec<(String, ShotCount)>,
}

impl ScanOptions {
    pub fn from_config(config: &SweepConfig, kind: RunKind) -> Self {
        Self {
            model: config.model.clone(),
            datasets: config.datasets.clone(),
            expected_cells: config.expected_cells(kind),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if model.is_some() {
            self.model = model;
        }
        self
    }
}

/// Parse a single few-shot log into a record.
pub fn parse_few_shot(path: &Path, coords: &RunCoordinates) -> Result<RunRecord> {
    let metrics = parse_log_file(path)?;
    Ok(RunRecord::new(coords, metrics))
}

fn accuracy_of(path: &Path) -> Result<f64> {
    let metrics = parse_log_file(path)?;
    metrics
        .get(metric::ACCURACY)
        .copied()
        .ok_or_else(|| ShotlogError::MetricNotFound {
            path: path.to_path_buf(),
            metric: metric::ACCURACY.to_string(),
        })
}

/// Parse both halves of a base-to-new run into one combined record.
pub fn parse_base_to_new(
    base_path: &Path,
    new_path: &Path,
    coords: &RunCoordinates,
) -> Result<RunRecord> {
    let base = accuracy_of(base_path)?;
    let new = accuracy_of(new_path)?;
    Ok(RunRecord::base_to_new(coords, base, new))
}

/// The sibling log of a base-to-new half: `test_base` swapped for `test_new` or back.
pub fn partner_log_path(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let idx = parts
        .iter()
        .rposition(|p| p == "test_base" || p == "test_new")?;
    parts[idx] = if parts[idx] == "test_base" {
        "test_new".to_string()
    } else {
        "test_base".to_string()
    };
    Some(parts.iter().collect())
}

/// Parse one log of `kind` into a record.
///
/// For base-to-new runs `path` may be either half; its partner is found by
/// swapping the `test_base`/`test_new` directory.
pub fn parse_log(path: &Path, kind: RunKind, coords: &RunCoordinates) -> Result<RunRecord> {
    match kind {
        RunKind::FewShot => parse_few_shot(path, coords),
        RunKind::BaseToNew => {
            let partner = partner_log_path(path).ok_or_else(|| ShotlogError::UnpairedSubtask {
                present: path.to_path_buf(),
                missing: "partner (path has no test_base/test_new directory)".to_string(),
            })?;
            let (base, new) = match coords.subtask {
                Subtask::New => (partner, path.to_path_buf()),
                _ => (path.to_path_buf(), partner),
            };
            if !base.is_file() || !new.is_file() {
                let (present, missing) = if base.is_file() {
                    (base, Subtask::New)
                } else {
                    (new, Subtask::Base)
                };
                return Err(ShotlogError::UnpairedSubtask {
                    present,
                    missing: missing.to_string(),
                });
            }
            parse_base_to_new(&base, &new, coords)
        }
    }
}

/// Scan `root` for logs of `kind` and parse every one into a record.
pub fn scan_and_parse(root: &Path, kind: RunKind, options: &ScanOptions) -> ScanOutcome {
    let _span = obs::ScanSpan::enter(root, kind);
    obs::emit_scan_started(root, kind);

    let locator = LogLocator::new(root, kind)
        .with_model(options.model.clone())
        .with_datasets(options.datasets.clone());
    let mut outcome = parse_located(locator.locate(), kind);
    outcome.summary.missing_cells = missing_cells(&options.expected_cells, &outcome, kind);

    let s = &outcome.summary;
    obs::emit_scan_finished(s.found, s.parsed, s.skipped_count());
    outcome
}

/// Parse an already-located sequence of logs.
///
/// Consumes `logs` lazily, so a caller can cut the scan short by bounding
/// the iterator.
pub fn parse_located(logs: impl Iterator<Item = LocatedLog>, kind: RunKind) -> ScanOutcome {
    match kind {
        RunKind::FewShot => parse_few_shot_logs(logs),
        RunKind::BaseToNew => parse_base_to_new_logs(logs),
    }
}

fn parse_few_shot_logs(logs: impl Iterator<Item = LocatedLog>) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    for log in logs {
        outcome.summary.found += 1;
        match parse_few_shot(&log.path, &log.coords) {
            Ok(record) => {
                debug!(path = %log.path.display(), "parsed log");
                outcome.summary.parsed += 1;
                outcome.records.push(record);
            }
            Err(err) => outcome.summary.skip(&log.path, &err),
        }
    }
    outcome
}

#[derive(Default)]
struct Halves {
    base: Option<PathBuf>,
    new: Option<PathBuf>,
}

fn parse_base_to_new_logs(logs: impl Iterator<Item = LocatedLog>) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    // Pair halves by their coordinates without subtask, in first-seen order.
    let mut order: Vec<RunCoordinates> = Vec::new();
    let mut halves: BTreeMap<usize, Halves> = BTreeMap::new();
    for log in logs {
        outcome.summary.found += 1;
        let key = log.coords.without_subtask();
        let idx = match order.iter().position(|k| *k == key) {
            Some(idx) => idx,
            None => {
                order.push(key);
                order.len() - 1
            }
        };
        let entry = halves.entry(idx).or_default();
        match log.coords.subtask {
            Subtask::Base => entry.base = Some(log.path),
            Subtask::New => entry.new = Some(log.path),
            Subtask::None => {}
        }
    }

    for (idx, pair) in halves {
        let coords = &order[idx];
        match (pair.base, pair.new) {
            (Some(base), Some(new)) => {
                let base_acc = accuracy_of(&base);
                let new_acc = accuracy_of(&new);
                match (base_acc, new_acc) {
                    (Ok(b), Ok(n)) => {
                        outcome.summary.parsed += 2;
                        outcome.records.push(RunRecord::base_to_new(coords, b, n));
                    }
                    (base_acc, new_acc) => {
                        skip_half(&mut outcome.summary, &base, base_acc.err(), &new, Subtask::New);
                        skip_half(&mut outcome.summary, &new, new_acc.err(), &base, Subtask::Base);
                    }
                }
            }
            (Some(present), None) => skip_unpaired(&mut outcome.summary, &present, Subtask::New),
            (None, Some(present)) => skip_unpaired(&mut outcome.summary, &present, Subtask::Base),
            (None, None) => {}
        }
    }
    outcome
}

/// Skip one half of a failed pair: with its own error, or as unpaired when
/// only its partner failed.
fn skip_half(
    summary: &mut ScanSummary,
    path: &Path,
    own_error: Option<ShotlogError>,
    partner: &Path,
    partner_subtask: Subtask,
) {
    let err = own_error.unwrap_or_else(|| ShotlogError::UnpairedSubtask {
        present: path.to_path_buf(),
        missing: format!("{partner_subtask} ({} was skipped)", partner.display()),
    });
    summary.skip(path, &err);
}

fn skip_unpaired(summary: &mut ScanSummary, present: &Path, missing: Subtask) {
    let err = ShotlogError::UnpairedSubtask {
        present: present.to_path_buf(),
        missing: missing.to_string(),
    };
    summary.skip(present, &err);
}

fn missing_cells(
    expected: &[(String, ShotCount)],
    outcome: &ScanOutcome,
    kind: RunKind,
) -> Vec<(String, ShotCount)> {
    if expected.is_empty() {
        return Vec::new();
    }
    let mut seen: BTreeSet<(String, ShotCount)> = outcome
        .records
        .iter()
        .map(|r| (r.dataset.clone(), r.shot_count))
        .collect();
    for s in &outcome.summary.skipped {
        if let Some(c) = RunCoordinates::from_log_path(&s.path, kind) {
            seen.insert((c.dataset, c.shot_count));
        }
    }
    let missing: Vec<_> = expected
        .iter()
        .filter(|cell| !seen.contains(*cell))
        .cloned()
        .collect();
    for (dataset, shots) in &missing {
        debug!(dataset = %dataset, shot_count = %shots, "no logs for expected cell");
    }
    missing
}

/// Append `records` to `store` in order, stopping at the first failure.
pub fn record_all(records: &[RunRecord], store: &dyn RecordStore) -> Result<usize> {
    let location = store.location();
    for (n, record) in records.iter().enumerate() {
        if let Err(err) = store.append(record) {
            debug!(appended = n, store = %location, "store append failed");
            return Err(err);
        }
        obs::emit_record_appended(record, &location);
    }
    Ok(records.len())
}

/// Scan `root`, then append every parsed record to `store`.
pub fn scan_and_record(
    root: &Path,
    kind: RunKind,
    options: &ScanOptions,
    store: &dyn RecordStore,
) -> Result<ScanOutcome> {
    let mut outcome = scan_and_parse(root, kind, options);
    outcome.summary.appended = record_all(&outcome.records, store)?;
    Ok(outcome)
}
