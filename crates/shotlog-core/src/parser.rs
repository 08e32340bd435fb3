//! Metric extraction from free-text evaluation logs.
//!
//! The evaluation program ends each run with a block like:
//!
//! ```text
//! => result
//! * total: 1,200
//! * correct: 1,023
//! * accuracy: 85.23% +- 2.34%
//! * error: 14.77%
//! * macro_f1: 80.10%
//! ```
//!
//! Only `* <label>: <number>%` lines with a known label are read. Anything
//! after the `%`, such as a `+- <number>%` spread or a `(best)` note, is
//! ignored; spread is computed across seeds at aggregation time instead.
//!
//! When a `=> result` marker is present, only lines after the last marker are
//! searched and the first value per label wins. Without a marker the whole log
//! is searched and the last value per label wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::domain::{metric, Result, ShotlogError};

/// Line introducing the final test report in a log.
pub const RESULT_MARKER: &str = "=> result";

fn metric_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\*\s*(?P<label>[A-Za-z][A-Za-z0-9_ ]*?)\s*:\s*(?P<value>[^\s%]+)\s*%",
        )
        .expect("metric line regex is valid")
    })
}

/// Normalise a label: lower case, inner spaces to `_`.
fn normalise_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_ascii_lowercase()
}

fn is_known_metric(label: &str) -> bool {
    label == metric::ACCURACY || metric::AUXILIARY.contains(&label)
}

/// One recognised `* <label>: <value>%` line, value still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLine<'a> {
    pub label: String,
    pub raw_value: &'a str,
}

/// Match a single (already trimmed) log line.
pub fn match_metric_line(line: &str) -> Option<MetricLine<'_>> {
    let caps = metric_line_regex().captures(line)?;
    let label = normalise_label(caps.name("label")?.as_str());
    if !is_known_metric(&label) {
        return None;
    }
    Some(MetricLine {
        label,
        raw_value: caps.name("value")?.as_str(),
    })
}

fn parse_percentage(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extract every known metric from log text.
///
/// Fails with `MetricNotFound` when `accuracy` is absent and with
/// `MalformedNumber` when the accuracy value cannot be parsed. Malformed
/// auxiliary metrics are dropped with a warning.
pub fn parse_metrics(text: &str, path: &Path) -> Result<BTreeMap<String, f64>> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let marker = lines.iter().rposition(|l| l.starts_with(RESULT_MARKER));
    let (region, first_wins) = match marker {
        Some(idx) => (&lines[idx + 1..], true),
        None => (&lines[..], false),
    };

    let mut raw: BTreeMap<String, &str> = BTreeMap::new();
    for line in region {
        let Some(m) = match_metric_line(line) else {
            continue;
        };
        if first_wins {
            raw.entry(m.label).or_insert(m.raw_value);
        } else {
            raw.insert(m.label, m.raw_value);
        }
    }

    let mut values = BTreeMap::new();
    for (label, raw_value) in raw {
        match parse_percentage(raw_value) {
            Some(v) => {
                values.insert(label, v);
            }
            None if label == metric::ACCURACY => {
                return Err(ShotlogError::MalformedNumber {
                    metric: label,
                    raw: raw_value.to_string(),
                });
            }
            None => {
                warn!(path = %path.display(), metric = %label, raw = %raw_value, "dropping malformed metric");
            }
        }
    }

    if !values.contains_key(metric::ACCURACY) {
        return Err(ShotlogError::MetricNotFound {
            path: PathBuf::from(path),
            metric: metric::ACCURACY.to_string(),
        });
    }
    Ok(values)
}

/// Read a log file. A missing file maps to `PathNotFound`.
pub fn read_log(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ShotlogError::PathNotFound(path.to_path_buf())
        } else {
            ShotlogError::Io(e)
        }
    })
}

/// Read and parse one log file.
pub fn parse_log_file(path: &Path) -> Result<BTreeMap<String, f64>> {
    let text = read_log(path)?;
    parse_metrics(&text, path)
}
