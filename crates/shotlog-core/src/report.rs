//! Rendering of scan summaries and aggregation results.
//!
//! Console output is a padded plain-text table; file output is CSV or
//! pretty JSON, written through a temp file in the target directory and
//! renamed into place.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::aggregate::{AggregateReport, PivotTable, TimingReport};
use crate::domain::metric;
use crate::scan::ScanSummary;
use crate::store::NOT_AVAILABLE;

/// Label of the across-datasets row of a pivot table.
pub const AVERAGE_ROW: &str = "AVERAGE";

/// Seconds as `HH:MM:SS`, truncating fractions. Hours may exceed 99.
pub fn format_hms(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return NOT_AVAILABLE.to_string();
    }
    let total = seconds as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn cell(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn raw_cell(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Left-aligned columns separated by two spaces.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, c) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(c.len());
            }
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<width$}", width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers);
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    out.push('\n');
    for row in rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}

/// Column names of an aggregate report: keys, `count`, then mean/spread per metric.
pub fn aggregate_headers(report: &AggregateReport) -> Vec<String> {
    let mut headers: Vec<String> = report
        .group_by
        .iter()
        .map(|d| d.as_str().to_string())
        .collect();
    headers.push("count".to_string());
    for m in &report.metrics {
        headers.push(format!("{m}_mean"));
        headers.push(format!("{m}_{}", report.spread.as_str()));
    }
    headers
}

fn aggregate_rows(report: &AggregateReport, fmt: fn(Option<f64>) -> String) -> Vec<Vec<String>> {
    report
        .groups
        .iter()
        .map(|g| {
            let mut row: Vec<String> = g.key.iter().map(|k| k.value.to_string()).collect();
            row.push(g.count.to_string());
            for m in &report.metrics {
                let summary = g.metric(m);
                row.push(fmt(summary.map(|s| s.mean)));
                row.push(fmt(summary.map(|s| s.spread)));
            }
            row
        })
        .collect()
}

/// Console rendering of an aggregate report, stating the group ordering.
pub fn render_aggregate(report: &AggregateReport) -> String {
    let dims = if report.group_by.is_empty() {
        "(all records)".to_string()
    } else {
        report
            .group_by
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut out = format!(
        "{} records grouped by {dims}; {}; spread = {}\n\n",
        report.total_records,
        report.order.describe(),
        report.spread.as_str(),
    );
    if report.is_empty() {
        out.push_str(NOT_AVAILABLE);
        out.push_str(" (no records)\n");
        return out;
    }
    out.push_str(&render_table(
        &aggregate_headers(report),
        &aggregate_rows(report, cell),
    ));
    out
}

fn csv_bytes(headers: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(headers).context("encode csv header")?;
    for row in rows {
        writer.write_record(row).context("encode csv row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush csv buffer: {}", e.error()))
}

/// Replace `path` with `bytes` atomically (temp file + rename in the same directory).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    let mut tmp = NamedTempFile::new_in(dir).with_context(|| format!("temp file in {:?}", dir))?;
    tmp.write_all(bytes)
        .with_context(|| format!("write {:?}", tmp.path()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("persist {:?}", path))?;
    Ok(())
}

/// An aggregate report as CSV text, full precision, `N/A` for absent metrics.
pub fn aggregate_csv(report: &AggregateReport) -> Result<String> {
    let bytes = csv_bytes(&aggregate_headers(report), &aggregate_rows(report, raw_cell))?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}

pub fn write_aggregate_csv(path: &Path, report: &AggregateReport) -> Result<()> {
    write_atomic(path, aggregate_csv(report)?.as_bytes())
}

/// Write any serializable report as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("serialize report")?;
    write_atomic(path, content.as_bytes())
}

fn pivot_rows(table: &PivotTable, fmt: fn(Option<f64>) -> String) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers = vec!["dataset".to_string()];
    headers.extend(table.columns.iter().map(|k| format!("shots_{k}")));

    let mut rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|(dataset, cells)| {
            let mut row = vec![dataset.clone()];
            row.extend(cells.iter().map(|c| fmt(*c)));
            row
        })
        .collect();
    let mut average = vec![AVERAGE_ROW.to_string()];
    average.extend(table.average.iter().map(|c| fmt(*c)));
    rows.push(average);
    (headers, rows)
}

/// Console rendering of a pivot table with its `AVERAGE` row.
pub fn render_pivot(table: &PivotTable) -> String {
    if table.rows.is_empty() {
        return format!("{}: {NOT_AVAILABLE} (no records)\n", table.metric);
    }
    let (headers, rows) = pivot_rows(table, cell);
    format!("{} by dataset and shot count\n\n{}", table.metric, render_table(&headers, &rows))
}

pub fn write_pivot_csv(path: &Path, table: &PivotTable) -> Result<()> {
    let (headers, rows) = pivot_rows(table, raw_cell);
    write_atomic(path, &csv_bytes(&headers, &rows)?)
}

/// Console rendering of evaluation times in `HH:MM:SS`.
pub fn render_timing(report: &TimingReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "timed runs: {}  (without time: {})\n",
        report.timed, report.untimed
    ));
    let Some(overall) = &report.overall else {
        out.push_str(&format!("eval time: {NOT_AVAILABLE}\n"));
        return out;
    };
    out.push_str(&format!(
        "total: {}  mean: {}  shortest: {}  longest: {}\n",
        format_hms(report.total_seconds),
        format_hms(overall.mean),
        format_hms(overall.min),
        format_hms(overall.max),
    ));

    let groups = &report.by_group;
    if groups.group_by.is_empty() || groups.is_empty() {
        return out;
    }
    let mut headers: Vec<String> = groups
        .group_by
        .iter()
        .map(|d| d.as_str().to_string())
        .collect();
    headers.extend(["count", "mean", "min", "max"].map(String::from));
    let rows: Vec<Vec<String>> = groups
        .groups
        .iter()
        .map(|g| {
            let mut row: Vec<String> = g.key.iter().map(|k| k.value.to_string()).collect();
            row.push(g.count.to_string());
            match g.metric(metric::EVAL_TIME_SECONDS) {
                Some(s) => row.extend([s.mean, s.min, s.max].map(format_hms)),
                None => row.extend([NOT_AVAILABLE; 3].map(String::from)),
            }
            row
        })
        .collect();
    out.push('\n');
    out.push_str(&render_table(&headers, &rows));
    out
}

/// Found / parsed / skipped counts, skip reasons and missing cells.
pub fn render_scan_summary(summary: &ScanSummary) -> String {
    let mut out = format!(
        "found: {}  parsed: {}  skipped: {}",
        summary.found,
        summary.parsed,
        summary.skipped_count()
    );
    if summary.appended > 0 {
        out.push_str(&format!("  appended: {}", summary.appended));
    }
    out.push('\n');

    for (reason, n) in summary.skip_counts() {
        out.push_str(&format!("  {reason}: {n}\n"));
    }
    for s in &summary.skipped {
        out.push_str(&format!("  - {} ({})\n", s.path.display(), s.reason));
    }
    if !summary.missing_cells.is_empty() {
        out.push_str("missing:\n");
        for (dataset, shots) in &summary.missing_cells {
            out.push_str(&format!("  - {dataset} shots_{shots}\n"));
        }
    }
    out
}
