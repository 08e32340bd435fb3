//! shotlog core library
//!
//! Collects evaluation results of few-shot and base-to-new sweeps: locate
//! run logs, parse their metrics, append them to CSV record stores and
//! summarise the stored records across seeds.

pub mod aggregate;
pub mod domain;
pub mod locator;
pub mod obs;
pub mod parser;
pub mod report;
pub mod scan;
pub mod store;
pub mod telemetry;

pub use domain::{
    harmonic_mean, metric, Result, RunCoordinates, RunKind, RunRecord, ShotCount, ShotlogError,
    SkipReason, Subtask, SweepConfig, BASE2NEW_SHOTS, LOG_FILE_NAME,
};

pub use aggregate::{
    aggregate, parse_dimensions, pivot, rollup, timing, AggregateReport, AggregateRequest,
    Dimension, GroupOrder, GroupSummary, MetricSummary, PivotTable, Spread, TimingReport,
};

pub use locator::{LocatedLog, LogLocator};
pub use parser::{parse_log_file, parse_metrics};
pub use scan::{
    parse_base_to_new, parse_few_shot, parse_log, scan_and_parse, scan_and_record, ScanOptions,
    ScanOutcome, ScanSummary,
};
pub use store::{read_records, CsvRecordStore, MemoryRecordStore, RecordStore};
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
