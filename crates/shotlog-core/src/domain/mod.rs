//! Domain models for shotlog.
//!
//! Canonical definitions for the core entities:
//! - `RunCoordinates`: where a run sits in the results tree
//! - `RunRecord`: one persisted evaluation run
//! - `SweepConfig`: the datasets and shot counts a sweep covers

pub mod config;
pub mod error;
pub mod run;

pub use config::SweepConfig;
pub use error::{Result, ShotlogError, SkipReason};
pub use run::{
    harmonic_mean, metric, RunCoordinates, RunKind, RunRecord, ShotCount, Subtask,
    BASE2NEW_SHOTS, LOG_FILE_NAME,
};
