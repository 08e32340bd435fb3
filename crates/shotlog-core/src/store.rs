//! Append-only run record stores.
//!
//! [`CsvRecordStore`] keeps one comma-separated file per run kind with a fixed
//! header. Rows are only ever appended; re-parsing a run adds a new row.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::domain::{Result, RunKind, RunRecord, ShotCount, ShotlogError, Subtask};

/// Placeholder written for absent optional values.
pub const NOT_AVAILABLE: &str = "N/A";

const LEADING_COLUMNS: [&str; 6] = [
    "model",
    "checkpoint_path",
    "dataset",
    "shot_count",
    "seed",
    "subtask",
];
const TRAILING_COLUMNS: [&str; 3] = ["eval_time_seconds", "timestamp", "notes"];

/// Legacy column names accepted when loading.
const COLUMN_ALIASES: [(&str, &str); 6] = [
    ("checkpoint_name", "checkpoint_path"),
    ("shot", "shot_count"),
    ("shots", "shot_count"),
    ("eval_time", "eval_time_seconds"),
    ("base_acc", "base_accuracy"),
    ("new_acc", "new_accuracy"),
];

/// Durable, append-only storage of run records.
pub trait RecordStore: Send + Sync {
    /// Append one record. Duplicates are never rejected.
    fn append(&self, record: &RunRecord) -> Result<()>;

    /// Read back every stored record in append order.
    fn load(&self) -> Result<Vec<RunRecord>>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Default store file name, e.g. `few_shot_CoOp.csv`.
pub fn store_file_name(kind: RunKind, model: Option<&str>) -> String {
    match model {
        Some(m) if !m.is_empty() => format!("{}_{m}.csv", kind.as_str()),
        _ => format!("{}.csv", kind.as_str()),
    }
}

/// Header row of a store of `kind`.
pub fn header_for(kind: RunKind) -> Vec<&'static str> {
    LEADING_COLUMNS
        .iter()
        .chain(kind.metric_columns())
        .chain(TRAILING_COLUMNS.iter())
        .copied()
        .collect()
}

/// CSV file store for one run kind.
pub struct CsvRecordStore {
    path: PathBuf,
    kind: RunKind,
}

impl CsvRecordStore {
    pub fn new(path: impl AsRef<Path>, kind: RunKind) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind,
        }
    }

    /// Store under `dir` named by [`store_file_name`].
    pub fn in_dir(dir: impl AsRef<Path>, kind: RunKind, model: Option<&str>) -> Self {
        Self::new(dir.as_ref().join(store_file_name(kind, model)), kind)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    fn write_failure(&self, source: std::io::Error) -> ShotlogError {
        ShotlogError::StoreWriteFailure {
            path: self.path.clone(),
            source,
        }
    }

    fn read_failure(&self, detail: impl ToString) -> ShotlogError {
        ShotlogError::StoreReadFailure {
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }

    fn check_header(&self, expected: &[&str]) -> Result<()> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.read_failure(e))?;
        let mut first = csv::StringRecord::new();
        reader
            .read_record(&mut first)
            .map_err(|e| self.read_failure(e))?;
        let found: Vec<&str> = first.iter().collect();
        if found != expected {
            return Err(ShotlogError::StoreSchemaMismatch {
                path: self.path.clone(),
                expected: expected.join(","),
                found: found.join(","),
            });
        }
        Ok(())
    }

    fn row(&self, record: &RunRecord) -> Vec<String> {
        let mut row = vec![
            record.model.clone(),
            record
                .checkpoint_path
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            record.dataset.clone(),
            record.shot_count.to_string(),
            record.seed.to_string(),
            record.subtask.to_string(),
        ];
        for column in self.kind.metric_columns() {
            row.push(
                record
                    .metric_values
                    .get(*column)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        row.push(
            record
                .eval_time_seconds
                .map(|t| t.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        );
        row.push(record.timestamp.to_rfc3339());
        row.push(record.notes.clone().unwrap_or_default());
        row
    }
}

impl RecordStore for CsvRecordStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        record.validate(self.kind)?;
        let header = header_for(self.kind);

        let has_content = fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if has_content {
            self.check_header(&header)?;
        } else if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.write_failure(e))?;
        }

        // Encode header (if new) and row up front so the file sees one write.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if !has_content {
            writer
                .write_record(&header)
                .map_err(|e| self.write_failure(e.into()))?;
        }
        writer
            .write_record(self.row(record))
            .map_err(|e| self.write_failure(e.into()))?;
        let bytes = writer
            .into_inner()
            .map_err(|e| self.write_failure(e.into_error()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_failure(e))?;
        file.write_all(&bytes).map_err(|e| self.write_failure(e))?;
        file.flush().map_err(|e| self.write_failure(e))?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Err(ShotlogError::PathNotFound(self.path.clone()));
        }
        read_records(&self.path)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Load records from any store file, whatever its run kind.
///
/// Columns are matched by header name; unknown columns are read as metrics.
/// Rows that cannot be decoded are skipped with a warning.
pub fn read_records(path: &Path) -> Result<Vec<RunRecord>> {
    let read_failure = |detail: String| ShotlogError::StoreReadFailure {
        path: path.to_path_buf(),
        detail,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| read_failure(e.to_string()))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| read_failure(e.to_string()))?
        .iter()
        .map(canonical_column)
        .collect();

    for required in ["model", "dataset", "shot_count", "seed"] {
        if !headers.iter().any(|h| h == required) {
            return Err(read_failure(format!("missing column '{required}'")));
        }
    }

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        // Line 1 is the header.
        let line = idx + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(path = %path.display(), line, error = %e, "skipping unreadable row");
                continue;
            }
        };
        let fields: BTreeMap<&str, &str> = headers
            .iter()
            .map(String::as_str)
            .zip(row.iter())
            .collect();
        match decode_row(&fields) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), line, error = %e, "skipping invalid row"),
        }
    }
    Ok(records)
}

fn canonical_column(name: &str) -> String {
    let name = name.trim();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| name.to_string())
}

fn optional(value: Option<&&str>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != NOT_AVAILABLE)
        .map(str::to_string)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        })
}

fn decode_row(fields: &BTreeMap<&str, &str>) -> Result<RunRecord> {
    let field = |name: &str| fields.get(name).copied().unwrap_or("");

    let model = field("model").to_string();
    let dataset = field("dataset").to_string();
    if dataset.is_empty() {
        return Err(ShotlogError::InvalidRecord("empty dataset".into()));
    }
    let shot_count: ShotCount = field("shot_count").parse()?;
    let seed = field("seed")
        .parse::<u32>()
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| ShotlogError::InvalidRecord(format!("invalid seed: {}", field("seed"))))?;
    let subtask: Subtask = field("subtask").parse()?;

    let eval_time_seconds = match optional(fields.get("eval_time_seconds")) {
        Some(raw) => Some(raw.parse::<f64>().map_err(|_| {
            ShotlogError::InvalidRecord(format!("invalid eval time: {raw}"))
        })?),
        None => None,
    };

    let timestamp = match optional(fields.get("timestamp")) {
        Some(raw) => parse_timestamp(&raw)
            .ok_or_else(|| ShotlogError::InvalidRecord(format!("invalid timestamp: {raw}")))?,
        None => DateTime::<Utc>::default(),
    };

    let mut metric_values = BTreeMap::new();
    for (name, raw) in fields {
        if LEADING_COLUMNS.contains(name) || TRAILING_COLUMNS.contains(name) {
            continue;
        }
        let Some(raw) = optional(Some(raw)) else {
            continue;
        };
        let value = raw.parse::<f64>().map_err(|_| ShotlogError::MalformedNumber {
            metric: name.to_string(),
            raw: raw.clone(),
        })?;
        metric_values.insert(name.to_string(), value);
    }

    Ok(RunRecord {
        model,
        checkpoint_path: optional(fields.get("checkpoint_path")),
        dataset,
        shot_count,
        seed,
        subtask,
        metric_values,
        eval_time_seconds,
        timestamp,
        notes: optional(fields.get("notes")),
    })
}

/// In-memory store, used by tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<RunRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|e| ShotlogError::InvalidRecord(format!("store lock poisoned: {e}")))?
            .push(record.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<RunRecord>> {
        Ok(self
            .records
            .lock()
            .map_err(|e| ShotlogError::InvalidRecord(format!("store lock poisoned: {e}")))?
            .clone())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{metric, RunCoordinates};

    fn few_shot(seed: u32, acc: f64) -> RunRecord {
        let coords = RunCoordinates::new("CoOp", "btmri", ShotCount::Shots(1), seed);
        let mut metrics = BTreeMap::new();
        metrics.insert(metric::ACCURACY.to_string(), acc);
        RunRecord::new(&coords, metrics)
    }

    #[test]
    fn header_written_once_and_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvRecordStore::in_dir(dir.path(), RunKind::FewShot, Some("CoOp"));
        store.append(&few_shot(1, 92.0)).unwrap();
        store.append(&few_shot(1, 92.0)).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], header_for(RunKind::FewShot).join(","));
        assert!(store.path().ends_with("few_shot_CoOp.csv"));
    }

    #[test]
    fn load_roundtrips_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvRecordStore::new(dir.path().join("nested/few_shot.csv"), RunKind::FewShot);
        let record = few_shot(2, 88.125)
            .with_eval_time(Some(12.5))
            .with_checkpoint(Some("ckpt/model-best.pth.tar".into()))
            .with_notes(Some("rerun, after fix".into()));
        store.append(&record).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[test]
    fn absent_optionals_use_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvRecordStore::in_dir(dir.path(), RunKind::FewShot, None);
        store.append(&few_shot(1, 90.0)).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert!(row.starts_with("CoOp,N/A,btmri,1,1,none,90,,,,,,N/A,"));

        let loaded = store.load().unwrap();
        assert_eq!(loaded[0].checkpoint_path, None);
        assert_eq!(loaded[0].eval_time_seconds, None);
    }

    #[test]
    fn append_rejects_record_missing_required_metric() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvRecordStore::in_dir(dir.path(), RunKind::BaseToNew, None);
        let err = store.append(&few_shot(1, 90.0)).unwrap_err();
        assert!(matches!(err, ShotlogError::InvalidRecord(_)));
        assert!(!store.path().exists());
    }

    #[test]
    fn header_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.csv");
        std::fs::write(&path, "a,b,c\n1,2,3\n").unwrap();
        let store = CsvRecordStore::new(&path, RunKind::FewShot);
        assert!(matches!(
            store.append(&few_shot(1, 90.0)),
            Err(ShotlogError::StoreSchemaMismatch { .. })
        ));
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the open fail.
        let path = dir.path().join("few_shot.csv");
        std::fs::create_dir_all(&path).unwrap();
        let store = CsvRecordStore::new(&path, RunKind::FewShot);
        assert!(matches!(
            store.append(&few_shot(1, 90.0)),
            Err(ShotlogError::StoreWriteFailure { .. })
        ));
    }

    #[test]
    fn loads_legacy_columns_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base2new_CoOp.csv");
        std::fs::write(
            &path,
            "model,checkpoint_name,dataset,shot,seed,base_acc,new_acc,harmonic_mean,eval_time,timestamp,notes\n\
             CoOp,N/A,busi,16,1,80.0,60.0,68.57,N/A,2025-03-01 10:00:00,\n\
             CoOp,N/A,busi,sixteen,2,80.0,60.0,68.57,N/A,2025-03-01 10:00:00,\n",
        )
        .unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.shot_count, ShotCount::Shots(16));
        assert_eq!(r.metric(metric::BASE_ACCURACY), Some(80.0));
        assert_eq!(r.metric(metric::NEW_ACCURACY), Some(60.0));
        assert_eq!(r.timestamp.to_rfc3339(), "2025-03-01T10:00:00+00:00");
    }

    #[test]
    fn load_missing_store_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvRecordStore::in_dir(dir.path(), RunKind::FewShot, None);
        assert!(matches!(store.load(), Err(ShotlogError::PathNotFound(_))));
    }

    #[test]
    fn memory_store_appends() {
        let store = MemoryRecordStore::new();
        store.append(&few_shot(1, 90.0)).unwrap();
        store.append(&few_shot(1, 90.0)).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn rows_with_seed_zero_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("few_shot.csv");
        std::fs::write(
            &path,
            "model,dataset,shot_count,seed,accuracy\n\
             CoOp,btmri,1,0,90.0\n\
             CoOp,btmri,1,1,91.0\n",
        )
        .unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].seed, 1);
    }
}
