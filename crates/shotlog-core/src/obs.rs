//! Structured observability hooks for scan and aggregation events.
//!
//! This module provides:
//! - A scan-scoped tracing span via the `ScanSpan` RAII guard
//! - Emission functions for scan start, skipped logs, appended records,
//!   scan completion and aggregation
//!
//! Events are emitted at `info!` level, skipped logs at `warn!`.
//! Filter with `RUST_LOG`; pass `--json` to the CLI for JSON lines.

use std::path::Path;

use tracing::{info, warn};

use crate::domain::{RunKind, RunRecord, SkipReason};

/// RAII guard that enters a scan-scoped span for the duration of a scan.
///
/// # Example
///
/// ```ignore
/// let _span = ScanSpan::enter(Path::new("output_eval"), RunKind::FewShot);
/// // All events below carry root = "output_eval" and kind = "few_shot"
/// ```
pub struct ScanSpan {
    _span: tracing::span::EnteredSpan,
}

impl ScanSpan {
    /// Create and enter a span tagged with the scanned root and run kind.
    pub fn enter(root: &Path, kind: RunKind) -> Self {
        let span = tracing::info_span!("shotlog.scan", root = %root.display(), kind = %kind);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: scan started.
pub fn emit_scan_started(root: &Path, kind: RunKind) {
    info!(event = "scan.started", root = %root.display(), kind = %kind);
}

/// Emit event: a log was skipped (warning level).
pub fn emit_log_skipped(path: &Path, reason: &SkipReason, detail: &dyn std::fmt::Display) {
    warn!(
        event = "scan.log_skipped",
        path = %path.display(),
        reason = %reason,
        detail = %detail,
    );
}

/// Emit event: a record was appended to a store.
pub fn emit_record_appended(record: &RunRecord, store: &str) {
    info!(
        event = "store.record_appended",
        dataset = %record.dataset,
        shot_count = %record.shot_count,
        seed = record.seed,
        store = %store,
    );
}

/// Emit event: scan finished with found / parsed / skipped counts.
pub fn emit_scan_finished(found: usize, parsed: usize, skipped: usize) {
    info!(
        event = "scan.finished",
        found = found,
        parsed = parsed,
        skipped = skipped,
    );
}

/// Emit event: aggregation produced `groups` groups from `records` records.
pub fn emit_aggregation_finished(records: usize, groups: usize) {
    info!(event = "aggregate.finished", records = records, groups = groups);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_span_create() {
        let _span = ScanSpan::enter(Path::new("output_eval"), RunKind::BaseToNew);
        emit_scan_started(Path::new("output_eval"), RunKind::BaseToNew);
        emit_log_skipped(
            Path::new("output_eval/log.txt"),
            &SkipReason::MetricNotFound,
            &"no accuracy line",
        );
        emit_scan_finished(1, 0, 1);
    }
}
