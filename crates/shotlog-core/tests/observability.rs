//! Structured events emitted by scans, store appends and aggregation.

use std::fs;
use std::path::Path;

use shotlog_core::obs::emit_aggregation_finished;
use shotlog_core::{
    aggregate, scan_and_parse, scan_and_record, AggregateRequest, Dimension, MemoryRecordStore,
    RunKind, ScanOptions, Spread,
};
use tracing_test::traced_test;

fn write_log(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

#[traced_test]
#[test]
fn truncated_log_emits_one_skip_warning() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "btmri/shots_1/CoOp/cfg/seed1/log.txt",
        "=> result\n* accuracy: 81.00%\n",
    );
    write_log(
        dir.path(),
        "btmri/shots_1/CoOp/cfg/seed2/log.txt",
        "epoch [12/50] loss 0.4\n",
    );

    let outcome = scan_and_parse(dir.path(), RunKind::FewShot, &ScanOptions::default());
    assert_eq!(outcome.summary.skipped_count(), 1);

    assert!(logs_contain("scan.started"));
    assert!(logs_contain("scan.finished"));
    logs_assert(|lines: &[&str]| {
        let skips: Vec<_> = lines
            .iter()
            .filter(|line| line.contains("scan.log_skipped"))
            .collect();
        match skips.as_slice() {
            [line] if line.contains("WARN") && line.contains("seed2") => Ok(()),
            other => Err(format!("expected one skip warning for seed2, got {other:?}")),
        }
    });
}

#[traced_test]
#[test]
fn recording_emits_one_append_event_per_record() {
    let dir = tempfile::tempdir().unwrap();
    for seed in 1..=2 {
        write_log(
            dir.path(),
            &format!("busi/shots_2/CoOp/cfg/seed{seed}/log.txt"),
            "=> result\n* accuracy: 70.00%\n",
        );
    }
    let store = MemoryRecordStore::default();

    scan_and_record(dir.path(), RunKind::FewShot, &ScanOptions::default(), &store).unwrap();

    assert!(!logs_contain("scan.log_skipped"));
    logs_assert(|lines: &[&str]| {
        match lines
            .iter()
            .filter(|line| line.contains("store.record_appended"))
            .count()
        {
            2 => Ok(()),
            n => Err(format!("expected 2 append events, got {n}")),
        }
    });
}

#[traced_test]
#[test]
fn aggregation_event_carries_counts() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "kvasir/shots_4/CoOp/cfg/seed1/log.txt",
        "=> result\n* accuracy: 66.00%\n",
    );
    let records = scan_and_parse(dir.path(), RunKind::FewShot, &ScanOptions::default()).records;

    let report = aggregate(
        &records,
        &AggregateRequest::new(vec![Dimension::Dataset], Spread::Ci95),
    );
    emit_aggregation_finished(records.len(), report.groups.len());

    assert!(logs_contain("aggregate.finished"));
    assert!(logs_contain("records=1"));
    assert!(logs_contain("groups=1"));
}
