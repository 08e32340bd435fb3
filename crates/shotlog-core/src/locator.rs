//! Discovery of run logs under a results root.
//!
//! [`LogLocator`] walks the conventional results tree and yields every
//! `log.txt` whose path decodes to [`RunCoordinates`]. Absent directories and
//! stray files are skipped without error: a partially-run sweep is normal.
//!
//! The sequence is lazy. A caller aborts production by dropping the iterator
//! (or using `take_while`), which is checked once per discovered log.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::domain::{RunCoordinates, RunKind, LOG_FILE_NAME};

/// Depth of `log.txt` below the root for few-shot runs.
const FEW_SHOT_DEPTH: usize = 6;

/// Depth of `log.txt` below the root for base-to-new runs.
const BASE2NEW_DEPTH: usize = 8;

/// A discovered log file and the coordinates decoded from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedLog {
    pub path: PathBuf,
    pub coords: RunCoordinates,
}

/// Walks a results root for logs of one run kind.
#[derive(Debug, Clone)]
pub struct LogLocator {
    root: PathBuf,
    kind: RunKind,
    model: Option<String>,
    datasets: Vec<String>,
}

impl LogLocator {
    pub fn new(root: impl AsRef<Path>, kind: RunKind) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            kind,
            model: None,
            datasets: Vec::new(),
        }
    }

    /// Only yield runs of this model directory.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Only yield runs of these datasets. Empty accepts all.
    pub fn with_datasets(mut self, datasets: Vec<String>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// Lazily enumerate matching logs in file-name order.
    pub fn locate(&self) -> impl Iterator<Item = LocatedLog> + '_ {
        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "results root not found, nothing to scan");
        }

        // A root pointing inside `base2new/` sits closer to the logs.
        let (min_depth, max_depth) = match self.kind {
            RunKind::FewShot => (FEW_SHOT_DEPTH, FEW_SHOT_DEPTH),
            RunKind::BaseToNew => (FEW_SHOT_DEPTH, BASE2NEW_DEPTH),
        };

        WalkDir::new(&self.root)
            .min_depth(min_depth)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    match err.io_error().map(|e| e.kind()) {
                        Some(std::io::ErrorKind::NotFound) => {
                            debug!(error = %err, "skipping vanished path");
                        }
                        _ => warn!(error = %err, "skipping unreadable path"),
                    }
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && e.file_name() == LOG_FILE_NAME)
            .filter_map(move |e| self.accept(e.into_path()))
    }

    fn accept(&self, path: PathBuf) -> Option<LocatedLog> {
        let Some(coords) = RunCoordinates::from_log_path(&path, self.kind) else {
            debug!(path = %path.display(), "ignoring log outside the {} layout", self.kind);
            return None;
        };
        if let Some(model) = &self.model {
            if &coords.model != model {
                return None;
            }
        }
        if !self.datasets.is_empty() && !self.datasets.contains(&coords.dataset) {
            warn!(dataset = %coords.dataset, path = %path.display(), "dataset not in configured list, log ignored");
            return None;
        }
        Some(LocatedLog { path, coords })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
