//! shotlog - evaluation result collector
//!
//! The `shotlog` command gathers the metrics of few-shot and base-to-new
//! evaluation sweeps into CSV record stores and summarises them.
//!
//! ## Commands
//!
//! - `parse-log`: Parse one run's log and append its record
//! - `scan`: Locate every run log under a results root and record it
//! - `aggregate`: Mean and spread of stored metrics per group
//! - `pivot`: Dataset × shot-count table of one metric
//! - `timing`: Evaluation time summary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use shotlog_core::report::{
    aggregate_csv, render_aggregate, render_pivot, render_scan_summary, render_timing,
    write_aggregate_csv, write_json, write_pivot_csv,
};
use shotlog_core::{
    aggregate, metric, parse_base_to_new, parse_dimensions, parse_log, pivot, read_records,
    rollup, scan_and_parse, scan_and_record, timing, AggregateRequest, CsvRecordStore,
    GroupOrder, RecordStore, RunCoordinates, RunKind, RunRecord, ScanOptions, ScanSummary,
    ShotCount, Spread, SweepConfig, BASE2NEW_SHOTS,
};

#[derive(Parser)]
#[command(name = "shotlog")]
#[command(author = "Stevedores Org")]
#[command(version = shotlog_core::VERSION)]
#[command(about = "Collect and summarise few-shot evaluation results", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Sweep configuration file (JSON); without one, scans accept every dataset
    #[arg(long, global = true, env = "SHOTLOG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse one run's log and append the record to its store
    ParseLog {
        /// Run kind: few-shot or base2new
        #[arg(long)]
        kind: RunKind,

        /// Log file (the test_base half for base2new)
        #[arg(long)]
        log: PathBuf,

        /// test_new log for base2new (default: sibling of --log)
        #[arg(long)]
        new_log: Option<PathBuf>,

        /// Model (trainer) name; inferred from the log path if omitted
        #[arg(long)]
        model: Option<String>,

        /// Dataset; inferred from the log path if omitted
        #[arg(long)]
        dataset: Option<String>,

        /// Shot count; inferred from the log path if omitted
        #[arg(long)]
        shots: Option<ShotCount>,

        /// Seed; inferred from the log path if omitted
        #[arg(long)]
        seed: Option<u32>,

        /// Evaluation wall time in seconds
        #[arg(long)]
        eval_time: Option<f64>,

        /// Checkpoint the run evaluated
        #[arg(long)]
        checkpoint: Option<String>,

        /// Free-text note stored with the record
        #[arg(long)]
        notes: Option<String>,

        /// Directory holding the record stores
        #[arg(long, env = "SHOTLOG_STORE_DIR")]
        store_dir: Option<PathBuf>,
    },

    /// Locate, parse and record every run under a results root
    Scan {
        /// Results root directory
        #[arg(long, env = "SHOTLOG_RESULTS_DIR")]
        root: PathBuf,

        /// Run kind: few-shot or base2new
        #[arg(long)]
        kind: RunKind,

        /// Only scan runs of this model
        #[arg(long)]
        model: Option<String>,

        /// Directory holding the record stores
        #[arg(long, env = "SHOTLOG_STORE_DIR")]
        store_dir: Option<PathBuf>,

        /// Parse and report without appending
        #[arg(long)]
        dry_run: bool,
    },

    /// Mean and spread of stored metrics per group
    Aggregate {
        /// Record store file
        #[arg(long)]
        store: PathBuf,

        /// Comma-separated dimensions: model, dataset, shot_count, seed, subtask
        #[arg(long, default_value = "dataset,shot_count")]
        group_by: String,

        /// Spread statistic: std or ci95
        #[arg(long, default_value = "std")]
        spread: Spread,

        /// Comma-separated metrics (default: all)
        #[arg(long)]
        metrics: Option<String>,

        /// Sort groups by key instead of first appearance
        #[arg(long)]
        sorted: bool,

        /// Also aggregate group means over these dimensions
        #[arg(long)]
        rollup: Option<String>,

        /// Metric for --rollup
        #[arg(long, default_value = metric::ACCURACY)]
        rollup_metric: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Dataset × shot-count table of one metric
    Pivot {
        /// Record store file
        #[arg(long)]
        store: PathBuf,

        /// Metric to tabulate
        #[arg(long, default_value = metric::ACCURACY)]
        metric: String,

        /// Write the table as CSV to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Evaluation time summary in HH:MM:SS
    Timing {
        /// Record store file
        #[arg(long)]
        store: PathBuf,

        /// Comma-separated dimensions to break times down by
        #[arg(long, default_value = "dataset")]
        group_by: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    shotlog_core::init_tracing(cli.json, level);

    let config = cli
        .config
        .as_deref()
        .map(SweepConfig::load)
        .transpose()
        .context("Failed to load sweep configuration")?;
    let default_store_dir = || {
        config
            .as_ref()
            .map_or_else(|| PathBuf::from("."), |c| c.store_dir.clone())
    };

    match cli.command {
        Commands::ParseLog {
            kind,
            log,
            new_log,
            model,
            dataset,
            shots,
            seed,
            eval_time,
            checkpoint,
            notes,
            store_dir,
        } => {
            let args = ParseLogArgs {
                kind,
                log,
                new_log,
                model,
                dataset,
                shots,
                seed,
                eval_time,
                checkpoint,
                notes,
            };
            let store_dir = store_dir.unwrap_or_else(default_store_dir);
            cmd_parse_log(&args, &store_dir)
        }
        Commands::Scan {
            root,
            kind,
            model,
            store_dir,
            dry_run,
        } => {
            let store_dir = store_dir.unwrap_or_else(default_store_dir);
            let store_dir = (!dry_run).then_some(store_dir.as_path());
            cmd_scan(config.as_ref(), &root, kind, model, store_dir).map(|_| ())
        }
        Commands::Aggregate {
            store,
            group_by,
            spread,
            metrics,
            sorted,
            rollup,
            rollup_metric,
            output,
            format,
        } => {
            let args = AggregateArgs {
                group_by,
                spread,
                metrics,
                sorted,
                rollup,
                rollup_metric,
                output,
                format,
            };
            cmd_aggregate(&store, &args)
        }
        Commands::Pivot {
            store,
            metric,
            output,
        } => cmd_pivot(&store, &metric, output.as_deref()),
        Commands::Timing { store, group_by } => cmd_timing(&store, &group_by),
    }
}

struct ParseLogArgs {
    kind: RunKind,
    log: PathBuf,
    new_log: Option<PathBuf>,
    model: Option<String>,
    dataset: Option<String>,
    shots: Option<ShotCount>,
    seed: Option<u32>,
    eval_time: Option<f64>,
    checkpoint: Option<String>,
    notes: Option<String>,
}

/// Coordinates of a single run: explicit flags over what the log path implies.
fn resolve_coordinates(args: &ParseLogArgs) -> Result<RunCoordinates> {
    let inferred = RunCoordinates::from_log_path(&args.log, args.kind);
    let from_path = |f: fn(&RunCoordinates) -> String| inferred.as_ref().map(f);

    let model = args
        .model
        .clone()
        .or_else(|| from_path(|c| c.model.clone()))
        .context("--model is required when the log path does not name the model")?;
    let dataset = args
        .dataset
        .clone()
        .or_else(|| from_path(|c| c.dataset.clone()))
        .context("--dataset is required when the log path does not name the dataset")?;
    let seed = args
        .seed
        .or_else(|| inferred.as_ref().map(|c| c.seed))
        .context("--seed is required when the log path does not name the seed")?;
    let shots = args
        .shots
        .or_else(|| inferred.as_ref().map(|c| c.shot_count))
        .or_else(|| (args.kind == RunKind::BaseToNew).then_some(ShotCount::Shots(BASE2NEW_SHOTS)))
        .context("--shots is required when the log path does not name the shot count")?;

    let mut coords = RunCoordinates::new(&model, &dataset, shots, seed);
    if let Some(inferred) = inferred {
        coords = coords.with_subtask(inferred.subtask);
        if let Some(config) = inferred.config.as_deref() {
            coords = coords.with_config(config);
        }
    }
    Ok(coords)
}

fn cmd_parse_log(args: &ParseLogArgs, store_dir: &Path) -> Result<()> {
    let coords = resolve_coordinates(args)?;

    let parsed = match (&args.new_log, args.kind) {
        (Some(new_log), RunKind::BaseToNew) => parse_base_to_new(&args.log, new_log, &coords),
        (Some(_), RunKind::FewShot) => anyhow::bail!("--new-log only applies to base2new runs"),
        (None, kind) => parse_log(&args.log, kind, &coords),
    };

    let record = match parsed {
        Ok(record) => record,
        Err(err) => match err.skip_reason() {
            Some(reason) => {
                warn!(log = %args.log.display(), reason = %reason, "log skipped: {err}");
                println!("Skipped {} ({}): {}", args.log.display(), reason, err);
                return Ok(());
            }
            None => {
                return Err(err).with_context(|| format!("Failed to parse {:?}", args.log));
            }
        },
    };

    let record = record
        .with_eval_time(args.eval_time)
        .with_checkpoint(args.checkpoint.clone())
        .with_notes(args.notes.clone());

    let store = CsvRecordStore::in_dir(store_dir, args.kind, Some(&coords.model));
    append_one(&store, &record)?;
    println!(
        "Recorded {} {} shots={} seed={} -> {:?}",
        record.model,
        record.dataset,
        record.shot_count,
        record.seed,
        store.path()
    );
    for (name, value) in &record.metric_values {
        println!("  {name}: {value:.2}");
    }
    Ok(())
}

fn append_one(store: &CsvRecordStore, record: &RunRecord) -> Result<()> {
    store
        .append(record)
        .with_context(|| format!("Failed to append to {:?}", store.path()))
}

/// Without a config every dataset is accepted and no cells are expected.
fn cmd_scan(
    config: Option<&SweepConfig>,
    root: &Path,
    kind: RunKind,
    model: Option<String>,
    store_dir: Option<&Path>,
) -> Result<ScanSummary> {
    let options = config
        .map(|c| ScanOptions::from_config(c, kind))
        .unwrap_or_default()
        .with_model(model);

    let outcome = match store_dir {
        Some(dir) => {
            let store = CsvRecordStore::in_dir(dir, kind, options.model.as_deref());
            info!(store = %store.path().display(), "recording scan results");
            scan_and_record(root, kind, &options, &store)
                .with_context(|| format!("Failed to record scan into {:?}", store.path()))?
        }
        None => scan_and_parse(root, kind, &options),
    };

    print!("{}", render_scan_summary(&outcome.summary));
    Ok(outcome.summary)
}

struct AggregateArgs {
    group_by: String,
    spread: Spread,
    metrics: Option<String>,
    sorted: bool,
    rollup: Option<String>,
    rollup_metric: String,
    output: Option<PathBuf>,
    format: OutputFormat,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn load_store(path: &Path) -> Result<Vec<RunRecord>> {
    if !path.is_file() {
        anyhow::bail!("Record store not found: {:?}", path);
    }
    read_records(path).with_context(|| format!("Failed to read record store {:?}", path))
}

fn cmd_aggregate(store: &Path, args: &AggregateArgs) -> Result<()> {
    let records = load_store(store)?;
    let group_by = parse_dimensions(&args.group_by).context("Invalid --group-by")?;

    let mut request = AggregateRequest::new(group_by, args.spread);
    if let Some(metrics) = &args.metrics {
        request = request.with_metrics(split_list(metrics));
    }
    if args.sorted {
        request = request.with_order(GroupOrder::Sorted);
    }

    let mut report = aggregate(&records, &request);
    if let Some(by) = &args.rollup {
        let by = parse_dimensions(by).context("Invalid --rollup")?;
        report = rollup(&report, &by, &args.rollup_metric, args.spread)?;
    }
    shotlog_core::obs::emit_aggregation_finished(records.len(), report.groups.len());

    match (args.format, &args.output) {
        (OutputFormat::Table, None) => print!("{}", render_aggregate(&report)),
        (OutputFormat::Table, Some(path)) => {
            std::fs::write(path, render_aggregate(&report))
                .with_context(|| format!("Failed to write {:?}", path))?;
        }
        (OutputFormat::Csv, Some(path)) => write_aggregate_csv(path, &report)?,
        (OutputFormat::Json, Some(path)) => write_json(path, &report)?,
        (OutputFormat::Csv, None) => print!("{}", aggregate_csv(&report)?),
        (OutputFormat::Json, None) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    if let Some(path) = &args.output {
        println!("Wrote {} groups to {:?}", report.groups.len(), path);
    }
    Ok(())
}

fn cmd_pivot(store: &Path, metric: &str, output: Option<&Path>) -> Result<()> {
    let records = load_store(store)?;
    let table = pivot(&records, metric);
    print!("{}", render_pivot(&table));
    if let Some(path) = output {
        write_pivot_csv(path, &table)?;
        println!("Wrote pivot table to {:?}", path);
    }
    Ok(())
}

fn cmd_timing(store: &Path, group_by: &str) -> Result<()> {
    let records = load_store(store)?;
    let group_by = parse_dimensions(group_by).context("Invalid --group-by")?;
    print!("{}", render_timing(&timing(&records, group_by)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_log(root: &Path, rel: &str, acc: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("=> result\n* accuracy: {acc}%\n")).unwrap();
        path
    }

    fn parse_args(kind: RunKind, log: PathBuf) -> ParseLogArgs {
        ParseLogArgs {
            kind,
            log,
            new_log: None,
            model: None,
            dataset: None,
            shots: None,
            seed: None,
            eval_time: Some(12.5),
            checkpoint: None,
            notes: Some("rerun".to_string()),
        }
    }

    #[test]
    fn test_parse_log_infers_coordinates_and_appends() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = write_log(
            temp_dir.path(),
            "out/btmri/shots_4/CoOp/cfg/seed2/log.txt",
            "83.10",
        );
        let store_dir = temp_dir.path().join("stores");

        cmd_parse_log(&parse_args(RunKind::FewShot, log), &store_dir).unwrap();

        let store = CsvRecordStore::in_dir(&store_dir, RunKind::FewShot, Some("CoOp"));
        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dataset, "btmri");
        assert_eq!(records[0].shot_count, ShotCount::Shots(4));
        assert_eq!(records[0].seed, 2);
        assert_eq!(records[0].eval_time_seconds, Some(12.5));
        assert_eq!(records[0].notes.as_deref(), Some("rerun"));
    }

    #[test]
    fn test_parse_log_outside_layout_needs_flags() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = write_log(temp_dir.path(), "log.txt", "70.00");

        let err = cmd_parse_log(&parse_args(RunKind::FewShot, log.clone()), temp_dir.path())
            .unwrap_err();
        assert!(format!("{err:#}").contains("--model"));

        let mut args = parse_args(RunKind::FewShot, log);
        args.model = Some("CLIP".to_string());
        args.dataset = Some("busi".to_string());
        args.shots = Some(ShotCount::NotApplicable);
        args.seed = Some(1);
        cmd_parse_log(&args, temp_dir.path()).unwrap();

        let store = CsvRecordStore::in_dir(temp_dir.path(), RunKind::FewShot, Some("CLIP"));
        assert_eq!(store.load().unwrap()[0].shot_count, ShotCount::NotApplicable);
    }

    #[test]
    fn test_parse_log_without_accuracy_is_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = temp_dir.path().join("btmri/shots_1/CoOp/cfg/seed1/log.txt");
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, "Traceback (most recent call last)\n").unwrap();

        cmd_parse_log(&parse_args(RunKind::FewShot, log), temp_dir.path()).unwrap();
        let store = CsvRecordStore::in_dir(temp_dir.path(), RunKind::FewShot, Some("CoOp"));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_parse_log_base2new_with_explicit_new_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = write_log(
            temp_dir.path(),
            "base2new/test_base/kvasir/shots_16/CoOp/cfg/seed1/log.txt",
            "90.00",
        );
        let new = write_log(temp_dir.path(), "elsewhere/new.txt", "60.00");
        let mut args = parse_args(RunKind::BaseToNew, base);
        args.new_log = Some(new);

        cmd_parse_log(&args, temp_dir.path()).unwrap();

        let store = CsvRecordStore::in_dir(temp_dir.path(), RunKind::BaseToNew, Some("CoOp"));
        let records = store.load().unwrap();
        assert_eq!(records[0].metric_values["harmonic_mean"], 72.0);
    }

    #[test]
    fn test_scan_then_aggregate_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("output_eval");
        for (seed, acc) in [(1, "88.00"), (2, "90.00"), (3, "92.00")] {
            write_log(&root, &format!("btmri/shots_1/CoOp/cfg/seed{seed}/log.txt"), acc);
        }
        let store_dir = temp_dir.path().join("stores");
        let config = SweepConfig::default();

        cmd_scan(
            Some(&config),
            &root,
            RunKind::FewShot,
            Some("CoOp".to_string()),
            Some(&store_dir),
        )
        .unwrap();

        let store_path = store_dir.join("few_shot_CoOp.csv");
        let out = temp_dir.path().join("summary.csv");
        let args = AggregateArgs {
            group_by: "dataset,shot_count".to_string(),
            spread: Spread::StdDev,
            metrics: Some("accuracy".to_string()),
            sorted: false,
            rollup: None,
            rollup_metric: metric::ACCURACY.to_string(),
            output: Some(out.clone()),
            format: OutputFormat::Csv,
        };
        cmd_aggregate(&store_path, &args).unwrap();

        let text = fs::read_to_string(out).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("btmri,1,3,90,1.63"), "unexpected row: {row}");
    }

    #[test]
    fn test_scan_dry_run_writes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_log(temp_dir.path(), "btmri/shots_1/CoOp/cfg/seed1/log.txt", "80.00");

        cmd_scan(
            Some(&SweepConfig::default()),
            temp_dir.path(),
            RunKind::FewShot,
            None,
            None,
        )
        .unwrap();
        assert!(!temp_dir.path().join("few_shot.csv").exists());
    }

    #[test]
    fn test_scan_without_config_accepts_any_dataset() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("output_eval");
        write_log(&root, "isic/shots_1/CoOp/cfg/seed1/log.txt", "77.00");
        let store_dir = temp_dir.path().join("stores");

        let summary = cmd_scan(None, &root, RunKind::FewShot, None, Some(&store_dir)).unwrap();
        assert_eq!(summary.found, 1);
        assert_eq!(summary.appended, 1);
        assert!(summary.missing_cells.is_empty());

        let store = CsvRecordStore::in_dir(&store_dir, RunKind::FewShot, None);
        assert_eq!(store.load().unwrap()[0].dataset, "isic");

        // the default dataset list filters it out
        let summary = cmd_scan(
            Some(&SweepConfig::default()),
            &root,
            RunKind::FewShot,
            None,
            None,
        )
        .unwrap();
        assert_eq!(summary.found, 0);
    }

    #[test]
    fn test_aggregate_missing_store_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let args = AggregateArgs {
            group_by: "dataset".to_string(),
            spread: Spread::Ci95,
            metrics: None,
            sorted: true,
            rollup: None,
            rollup_metric: metric::ACCURACY.to_string(),
            output: None,
            format: OutputFormat::Table,
        };
        let err = cmd_aggregate(&temp_dir.path().join("absent.csv"), &args).unwrap_err();
        assert!(format!("{err:#}").contains("Record store not found"));
    }

    #[test]
    fn test_cli_version_matches_core() {
        use clap::CommandFactory;
        assert_eq!(Cli::command().get_version(), Some(shotlog_core::VERSION));
    }

    #[test]
    fn test_cli_parses_aggregate_flags() {
        let cli = Cli::try_parse_from([
            "shotlog",
            "aggregate",
            "--store",
            "few_shot_CoOp.csv",
            "--spread",
            "ci95",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Aggregate {
                spread,
                format,
                group_by,
                ..
            } => {
                assert_eq!(spread, Spread::Ci95);
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(group_by, "dataset,shot_count");
            }
            _ => panic!("expected aggregate"),
        }
    }
}
