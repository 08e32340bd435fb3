//! End-to-end scan tests: results tree on disk -> CSV store -> records.

use std::fs;
use std::path::Path;

use shotlog_core::{
    scan_and_parse, scan_and_record, CsvRecordStore, RecordStore, RunKind, ScanOptions, ShotCount,
    ShotlogError, SkipReason, SweepConfig,
};

fn write_log(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn result_block(acc: &str) -> String {
    format!(
        "epoch [50/50] loss 0.1\n=> result\n* total: 600\n* correct: 540\n* accuracy: {acc}%\n* error: 10.00%\n* macro_f1: 85.00%\n"
    )
}

/// btmri and busi at shots 1 and 4, three seeds each; one busi log crashed.
fn few_shot_tree(root: &Path) {
    for dataset in ["btmri", "busi"] {
        for shots in [1, 4] {
            for seed in 1..=3 {
                let rel = format!("{dataset}/shots_{shots}/CoOp/vit_b16/seed{seed}/log.txt");
                if dataset == "busi" && shots == 4 && seed == 3 {
                    write_log(root, &rel, "CUDA out of memory\n");
                } else {
                    let acc = format!("{}.00", 60 + shots * 5 + seed);
                    write_log(root, &rel, &result_block(&acc));
                }
            }
        }
    }
}

#[test]
fn scan_records_every_parsable_log() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("output_eval");
    few_shot_tree(&root);
    let store = CsvRecordStore::in_dir(dir.path().join("stores"), RunKind::FewShot, Some("CoOp"));

    let mut config = SweepConfig::default();
    config.datasets = vec!["btmri".to_string(), "busi".to_string()];
    let options = ScanOptions::from_config(&config, RunKind::FewShot);

    let outcome = scan_and_record(&root, RunKind::FewShot, &options, &store).unwrap();
    let summary = &outcome.summary;
    assert_eq!(summary.found, 12);
    assert_eq!(summary.parsed, 11);
    assert_eq!(summary.appended, 11);
    assert_eq!(summary.skip_counts().get(&SkipReason::MetricNotFound), Some(&1));
    // shots 2, 8 and 16 were never run
    assert_eq!(summary.missing_cells.len(), 6);
    assert!(summary
        .missing_cells
        .contains(&("busi".to_string(), ShotCount::Shots(16))));

    let stored = store.load().unwrap();
    assert_eq!(stored.len(), 11);
    assert!(stored
        .iter()
        .zip(&outcome.records)
        .all(|(a, b)| a.same_content(b)));
    assert_eq!(stored[0].metric_values["macro_f1"], 85.0);
    assert!(stored.iter().all(|r| r.eval_time_seconds.is_none()));
}

#[test]
fn rescanning_appends_duplicates_with_same_content() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "kvasir/shots_2/CoOp/cfg/seed1/log.txt",
        &result_block("71.25"),
    );
    let store = CsvRecordStore::new(dir.path().join("few_shot.csv"), RunKind::FewShot);
    let options = ScanOptions::default();

    scan_and_record(dir.path(), RunKind::FewShot, &options, &store).unwrap();
    scan_and_record(dir.path(), RunKind::FewShot, &options, &store).unwrap();

    let stored = store.load().unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored[0].same_content(&stored[1]));
}

#[test]
fn base2new_store_holds_paired_records() {
    let dir = tempfile::tempdir().unwrap();
    for seed in 1..=2 {
        write_log(
            dir.path(),
            &format!("base2new/test_base/retina/shots_16/CoOp/cfg/seed{seed}/log.txt"),
            &result_block("80.00"),
        );
        write_log(
            dir.path(),
            &format!("base2new/test_new/retina/shots_16/CoOp/cfg/seed{seed}/log.txt"),
            &result_block("40.00"),
        );
    }
    let store = CsvRecordStore::in_dir(dir.path(), RunKind::BaseToNew, Some("CoOp"));

    let outcome =
        scan_and_record(dir.path(), RunKind::BaseToNew, &ScanOptions::default(), &store).unwrap();
    assert_eq!(outcome.summary.found, 4);
    assert_eq!(outcome.summary.appended, 2);

    let header = fs::read_to_string(store.path())
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string();
    assert!(header.contains("base_accuracy,new_accuracy,harmonic_mean"));

    let stored = store.load().unwrap();
    let hm = stored[0].metric_values["harmonic_mean"];
    assert!((hm - 2.0 * 80.0 * 40.0 / 120.0).abs() < 1e-9);
}

#[test]
fn few_shot_records_cannot_go_into_a_base2new_store() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "btmri/shots_1/CoOp/cfg/seed1/log.txt",
        &result_block("70.00"),
    );
    let store = CsvRecordStore::new(dir.path().join("base2new.csv"), RunKind::BaseToNew);

    let err = scan_and_record(dir.path(), RunKind::FewShot, &ScanOptions::default(), &store)
        .unwrap_err();
    assert!(matches!(err, ShotlogError::InvalidRecord(_)));
    assert!(!store.path().exists());
}

#[test]
fn scanning_an_empty_tree_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = scan_and_parse(dir.path(), RunKind::FewShot, &ScanOptions::default());
    assert_eq!(outcome.summary.found, 0);
    assert!(outcome.records.is_empty());
}
