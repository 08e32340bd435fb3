//! Grouped summary statistics over run records.
//!
//! Records are partitioned by equality of the requested dimensions. Each
//! partition reports, per metric, the arithmetic mean and a spread:
//!
//! - [`Spread::StdDev`]: population standard deviation (divisor `n`)
//! - [`Spread::Ci95`]: normal-approximation 95% half-width, `1.96 · σ / √n`
//!
//! A single-member group has spread 0. If any record of a group lacks a
//! metric, that metric is left out for that group only.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::domain::{Result, RunRecord, ShotCount, ShotlogError, Subtask};

/// z-value of the two-sided 95% normal interval.
pub const Z_95: f64 = 1.96;

/// A record attribute records can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Model,
    Dataset,
    ShotCount,
    Seed,
    Subtask,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Model => "model",
            Dimension::Dataset => "dataset",
            Dimension::ShotCount => "shot_count",
            Dimension::Seed => "seed",
            Dimension::Subtask => "subtask",
        }
    }

    pub fn value_of(&self, record: &RunRecord) -> DimensionValue {
        match self {
            Dimension::Model => DimensionValue::Text(record.model.clone()),
            Dimension::Dataset => DimensionValue::Text(record.dataset.clone()),
            Dimension::ShotCount => DimensionValue::Shots(record.shot_count),
            Dimension::Seed => DimensionValue::Seed(record.seed),
            Dimension::Subtask => DimensionValue::Subtask(record.subtask),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = ShotlogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" | "trainer" => Ok(Dimension::Model),
            "dataset" => Ok(Dimension::Dataset),
            "shot_count" | "shot" | "shots" => Ok(Dimension::ShotCount),
            "seed" => Ok(Dimension::Seed),
            "subtask" => Ok(Dimension::Subtask),
            other => Err(ShotlogError::InvalidDimension(other.to_string())),
        }
    }
}

/// Parse a comma-separated dimension list, dropping repeats.
pub fn parse_dimensions(raw: &str) -> Result<Vec<Dimension>> {
    let mut dims = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let dim: Dimension = part.parse()?;
        if !dims.contains(&dim) {
            dims.push(dim);
        }
    }
    Ok(dims)
}

/// Value of one dimension for a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum DimensionValue {
    Text(String),
    Shots(ShotCount),
    Seed(u32),
    Subtask(Subtask),
}

impl fmt::Display for DimensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionValue::Text(s) => f.write_str(s),
            DimensionValue::Shots(k) => write!(f, "{k}"),
            DimensionValue::Seed(n) => write!(f, "{n}"),
            DimensionValue::Subtask(s) => write!(f, "{s}"),
        }
    }
}

/// Spread statistic reported next to the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Spread {
    StdDev,
    Ci95,
}

impl Spread {
    pub fn as_str(&self) -> &'static str {
        match self {
            Spread::StdDev => "std",
            Spread::Ci95 => "ci95",
        }
    }

    pub fn compute(&self, values: &[f64]) -> Option<f64> {
        match self {
            Spread::StdDev => population_std(values),
            Spread::Ci95 => ci95_half_width(values),
        }
    }
}

impl FromStr for Spread {
    type Err = ShotlogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "std" | "stddev" | "sd" => Ok(Spread::StdDev),
            "ci" | "ci95" => Ok(Spread::Ci95),
            other => Err(ShotlogError::InvalidSpread(other.to_string())),
        }
    }
}

/// How groups are ordered in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOrder {
    /// Order in which each key first appears in the input records.
    #[default]
    FirstSeen,
    /// Ascending by key (shot counts numerically, `N/A` last).
    Sorted,
}

impl GroupOrder {
    pub fn describe(&self) -> &'static str {
        match self {
            GroupOrder::FirstSeen => "groups in order of first appearance",
            GroupOrder::Sorted => "groups sorted by key",
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divisor `n`).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Normal-approximation 95% confidence half-width.
pub fn ci95_half_width(values: &[f64]) -> Option<f64> {
    let std = population_std(values)?;
    Some(Z_95 * std / (values.len() as f64).sqrt())
}

/// Statistics of one metric within one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub n: usize,
    pub mean: f64,
    pub spread: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    pub fn from_values(values: &[f64], spread: Spread) -> Option<Self> {
        Some(Self {
            n: values.len(),
            mean: mean(values)?,
            spread: spread.compute(values)?,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// One component of a group key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KeyPart {
    pub dimension: Dimension,
    pub value: DimensionValue,
}

/// Summary of one partition of the records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub key: Vec<KeyPart>,
    pub count: usize,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl GroupSummary {
    pub fn value(&self, dimension: Dimension) -> Option<&DimensionValue> {
        self.key
            .iter()
            .find(|p| p.dimension == dimension)
            .map(|p| &p.value)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }
}

/// Parameters of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRequest {
    pub group_by: Vec<Dimension>,
    pub spread: Spread,
    /// Metrics to summarise; `None` means every metric seen in the records.
    pub metrics: Option<Vec<String>>,
    pub order: GroupOrder,
}

impl AggregateRequest {
    pub fn new(group_by: Vec<Dimension>, spread: Spread) -> Self {
        Self {
            group_by,
            spread,
            metrics: None,
            order: GroupOrder::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Vec<String>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_order(mut self, order: GroupOrder) -> Self {
        self.order = order;
        self
    }
}

/// Result of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub group_by: Vec<Dimension>,
    pub spread: Spread,
    pub order: GroupOrder,
    /// Metric columns, in report order.
    pub metrics: Vec<String>,
    pub total_records: usize,
    pub groups: Vec<GroupSummary>,
}

impl AggregateReport {
    /// True when no records matched, reported as `N/A`.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn metric_names(records: &[RunRecord]) -> Vec<String> {
    let names: BTreeSet<&String> = records.iter().flat_map(|r| r.metric_values.keys()).collect();
    names.into_iter().cloned().collect()
}

/// Partition `records` by `request.group_by` and summarise each metric.
pub fn aggregate(records: &[RunRecord], request: &AggregateRequest) -> AggregateReport {
    let metrics = request
        .metrics
        .clone()
        .unwrap_or_else(|| metric_names(records));

    let mut index: HashMap<Vec<DimensionValue>, usize> = HashMap::new();
    let mut partitions: Vec<(Vec<DimensionValue>, Vec<&RunRecord>)> = Vec::new();
    for record in records {
        let key: Vec<DimensionValue> = request
            .group_by
            .iter()
            .map(|d| d.value_of(record))
            .collect();
        match index.get(&key) {
            Some(&i) => partitions[i].1.push(record),
            None => {
                index.insert(key.clone(), partitions.len());
                partitions.push((key, vec![record]));
            }
        }
    }

    if request.order == GroupOrder::Sorted {
        partitions.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let groups = partitions
        .into_iter()
        .map(|(key, members)| {
            let mut summaries = BTreeMap::new();
            for name in &metrics {
                let values: Option<Vec<f64>> = members.iter().map(|r| r.metric(name)).collect();
                let summary = values.and_then(|v| MetricSummary::from_values(&v, request.spread));
                if let Some(summary) = summary {
                    summaries.insert(name.clone(), summary);
                }
            }
            GroupSummary {
                key: request
                    .group_by
                    .iter()
                    .zip(key)
                    .map(|(d, v)| KeyPart {
                        dimension: *d,
                        value: v,
                    })
                    .collect(),
                count: members.len(),
                metrics: summaries,
            }
        })
        .collect();

    AggregateReport {
        group_by: request.group_by.clone(),
        spread: request.spread,
        order: request.order,
        metrics,
        total_records: records.len(),
        groups,
    }
}

/// Second-level aggregation over the group means of `report`.
///
/// Groups are re-partitioned by `by`, which must be a subset of the report's
/// dimensions. `count` of a roll-up group is the number of input groups that
/// carried `metric`.
pub fn rollup(
    report: &AggregateReport,
    by: &[Dimension],
    metric: &str,
    spread: Spread,
) -> Result<AggregateReport> {
    if let Some(d) = by.iter().find(|d| !report.group_by.contains(d)) {
        return Err(ShotlogError::InvalidDimension(format!(
            "{d} is not a dimension of the input report"
        )));
    }

    let mut index: HashMap<Vec<DimensionValue>, usize> = HashMap::new();
    let mut partitions: Vec<(Vec<DimensionValue>, Vec<f64>)> = Vec::new();
    for group in &report.groups {
        let Some(summary) = group.metric(metric) else {
            continue;
        };
        let key: Vec<DimensionValue> = by
            .iter()
            .filter_map(|d| group.value(*d).cloned())
            .collect();
        match index.get(&key) {
            Some(&i) => partitions[i].1.push(summary.mean),
            None => {
                index.insert(key.clone(), partitions.len());
                partitions.push((key, vec![summary.mean]));
            }
        }
    }

    if report.order == GroupOrder::Sorted {
        partitions.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let groups = partitions
        .into_iter()
        .map(|(key, means)| {
            let mut metrics = BTreeMap::new();
            if let Some(summary) = MetricSummary::from_values(&means, spread) {
                metrics.insert(metric.to_string(), summary);
            }
            GroupSummary {
                key: by
                    .iter()
                    .zip(key)
                    .map(|(d, v)| KeyPart {
                        dimension: *d,
                        value: v,
                    })
                    .collect(),
                count: means.len(),
                metrics,
            }
        })
        .collect();

    Ok(AggregateReport {
        group_by: by.to_vec(),
        spread,
        order: report.order,
        metrics: vec![metric.to_string()],
        total_records: report.total_records,
        groups,
    })
}

/// Dataset × shot-count table of one metric's group means.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotTable {
    pub metric: String,
    pub columns: Vec<ShotCount>,
    /// `(dataset, cell per column)`; `None` cells are absent.
    pub rows: Vec<(String, Vec<Option<f64>>)>,
    /// Mean across datasets per column.
    pub average: Vec<Option<f64>>,
}

/// Build a [`PivotTable`] of `metric`, rows and columns sorted.
pub fn pivot(records: &[RunRecord], metric: &str) -> PivotTable {
    let request = AggregateRequest::new(
        vec![Dimension::Dataset, Dimension::ShotCount],
        Spread::StdDev,
    )
    .with_metrics(vec![metric.to_string()])
    .with_order(GroupOrder::Sorted);
    let report = aggregate(records, &request);

    let mut columns: BTreeSet<ShotCount> = BTreeSet::new();
    let mut cells: BTreeMap<String, BTreeMap<ShotCount, f64>> = BTreeMap::new();
    for group in &report.groups {
        let (Some(DimensionValue::Text(dataset)), Some(DimensionValue::Shots(shots))) =
            (group.value(Dimension::Dataset), group.value(Dimension::ShotCount))
        else {
            continue;
        };
        columns.insert(*shots);
        if let Some(summary) = group.metric(metric) {
            cells
                .entry(dataset.clone())
                .or_default()
                .insert(*shots, summary.mean);
        }
    }

    let columns: Vec<ShotCount> = columns.into_iter().collect();
    let rows: Vec<(String, Vec<Option<f64>>)> = cells
        .into_iter()
        .map(|(dataset, by_shot)| {
            let row = columns.iter().map(|k| by_shot.get(k).copied()).collect();
            (dataset, row)
        })
        .collect();
    let average = (0..columns.len())
        .map(|i| {
            let present: Vec<f64> = rows.iter().filter_map(|(_, row)| row[i]).collect();
            mean(&present)
        })
        .collect();

    PivotTable {
        metric: metric.to_string(),
        columns,
        rows,
        average,
    }
}

/// Evaluation-time statistics over the records that carry a time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingReport {
    /// Records with an evaluation time.
    pub timed: usize,
    /// Records without one, left out of every figure.
    pub untimed: usize,
    pub total_seconds: f64,
    pub overall: Option<MetricSummary>,
    pub by_group: AggregateReport,
}

/// Summarise `eval_time_seconds`, overall and per `group_by` group.
pub fn timing(records: &[RunRecord], group_by: Vec<Dimension>) -> TimingReport {
    let timed: Vec<RunRecord> = records
        .iter()
        .filter(|r| r.eval_time_seconds.is_some())
        .cloned()
        .collect();
    let seconds: Vec<f64> = timed.iter().filter_map(|r| r.eval_time_seconds).collect();

    let request = AggregateRequest::new(group_by, Spread::StdDev)
        .with_metrics(vec![crate::domain::metric::EVAL_TIME_SECONDS.to_string()]);
    TimingReport {
        timed: timed.len(),
        untimed: records.len() - timed.len(),
        total_seconds: seconds.iter().sum(),
        overall: MetricSummary::from_values(&seconds, Spread::StdDev),
        by_group: aggregate(&timed, &request),
    }
}
