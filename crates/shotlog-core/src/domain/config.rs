//! Sweep configuration: which datasets and shot counts an evaluation sweep covers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{Result, ShotlogError};
use super::run::{RunKind, ShotCount, BASE2NEW_SHOTS};

/// Datasets evaluated by the default sweep.
pub const DEFAULT_DATASETS: [&str; 11] = [
    "btmri",
    "busi",
    "chmnist",
    "covid",
    "ctkidney",
    "dermamnist",
    "kneexray",
    "kvasir",
    "lungcolon",
    "octmnist",
    "retina",
];

/// Shot counts evaluated by the default few-shot sweep.
pub const DEFAULT_SHOTS: [u32; 5] = [1, 2, 4, 8, 16];

/// Description of an evaluation sweep, loaded from JSON.
///
/// Every field is optional in the file; missing fields take the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    /// Datasets a scan accepts. Empty means "accept any dataset directory".
    pub datasets: Vec<String>,

    /// Shot counts expected in a few-shot sweep.
    pub shots: Vec<u32>,

    /// Shot count of base-to-new runs.
    pub base2new_shots: u32,

    /// Only consider runs of this model (trainer) directory.
    pub model: Option<String>,

    /// Directory holding the CSV record stores.
    pub store_dir: PathBuf,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            datasets: DEFAULT_DATASETS.iter().map(|d| d.to_string()).collect(),
            shots: DEFAULT_SHOTS.to_vec(),
            base2new_shots: BASE2NEW_SHOTS,
            model: None,
            store_dir: PathBuf::from("."),
        }
    }
}

impl SweepConfig {
    /// Load a config file. Unknown fields are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ShotlogError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shots.contains(&0) {
            return Err(ShotlogError::Config("shot counts must be positive".into()));
        }
        if self.base2new_shots == 0 {
            return Err(ShotlogError::Config("base2new_shots must be positive".into()));
        }
        Ok(())
    }

    /// The (dataset, shot count) cells a complete sweep of `kind` produces.
    pub fn expected_cells(&self, kind: RunKind) -> Vec<(String, ShotCount)> {
        let shots: Vec<u32> = match kind {
            RunKind::FewShot => self.shots.clone(),
            RunKind::BaseToNew => vec![self.base2new_shots],
        };
        self.datasets
            .iter()
            .flat_map(|d| shots.iter().map(move |k| (d.clone(), ShotCount::Shots(*k))))
            .collect()
    }
}
