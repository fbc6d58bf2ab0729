//! Error taxonomy for vault conversion and replay verification.
//!
//! Every variant names the offending path and the specific element that was
//! missing or mismatched, so a failed partition can be diagnosed from the
//! message alone.

use std::path::PathBuf;

use thiserror::Error;

use crate::planner::Batch;

/// Errors raised while discovering, reading, converting or verifying vault data.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Vault or partition path (or one of its required files) is absent.
    #[error("not found: {path} ({what})")]
    NotFound { path: PathBuf, what: String },

    /// Path exists but does not look like a vault directory.
    #[error("invalid vault path {path}: {reason}")]
    InvalidVaultPath { path: PathBuf, reason: String },

    /// Vault contains no quality partitions.
    #[error("vault {path} contains no quality partitions (no sub-directory holds a metadata.json)")]
    EmptyVault { path: PathBuf },

    /// Requested quality is not part of the catalog.
    #[error("quality '{requested}' not found in {path} (available: {})", available.join(", "))]
    QualityNotFound {
        path: PathBuf,
        requested: String,
        available: Vec<String>,
    },

    /// Chunk manifest is unreadable or structurally broken.
    #[error("corrupt column store {path}: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    /// metadata.json is unreadable or missing required entries.
    #[error("invalid metadata {path}: {reason}")]
    InvalidMetadata { path: PathBuf, reason: String },

    /// A column disagrees with the partition's declared time axis or shape.
    #[error("schema mismatch in {path}: column '{column}' has {actual} timesteps, expected {expected}")]
    SchemaMismatch {
        path: PathBuf,
        column: String,
        expected: usize,
        actual: usize,
    },

    /// A column's trailing shape or dtype disagrees between metadata and manifest.
    #[error("schema mismatch in {path}: column '{column}' {detail}")]
    ColumnLayoutMismatch {
        path: PathBuf,
        column: String,
        detail: String,
    },

    /// Column is absent from the store.
    #[error("column '{column}' not found in {path}")]
    ColumnNotFound { path: PathBuf, column: String },

    /// Read range falls outside `[0, T)`.
    #[error("range [{start}, {end}) out of bounds for column '{column}' with {len} timesteps in {path}")]
    Range {
        path: PathBuf,
        column: String,
        start: usize,
        end: usize,
        len: usize,
    },

    /// A float value that JSON cannot represent.
    #[error("non-finite value {value} in column '{column}' at timestep {t} ({path})")]
    NonFiniteValue {
        path: PathBuf,
        column: String,
        t: usize,
        value: f64,
    },

    /// A failure while streaming batches; wraps the underlying cause.
    #[error("conversion of quality '{quality}' failed at batch {batch}: {source}")]
    Conversion {
        quality: String,
        batch: Batch,
        #[source]
        source: Box<VaultError>,
    },

    /// Two partitions would write to the same artifact filename.
    #[error("qualities '{first}' and '{second}' both map to output file {path}")]
    OutputNameCollision {
        path: PathBuf,
        first: String,
        second: String,
    },

    /// Artifact file cannot be interpreted.
    #[error("invalid artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    /// Replayed data diverged from the stored data beyond tolerance.
    #[error(
        "replay mismatch for {path}: mean observation error {obs_error:.6}, \
         mean reward error {reward_error:.6} over {steps} steps (tolerance {tolerance})"
    )]
    ReplayMismatch {
        path: PathBuf,
        obs_error: f64,
        reward_error: f64,
        steps: usize,
        tolerance: f64,
    },

    /// The live environment failed.
    #[error("environment error: {0:#}")]
    Environment(#[from] anyhow::Error),

    /// I/O error with the path it concerns.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Writing an `.npz` member or its archive failed.
    #[error("NPZ write error on {path}: {source}")]
    NpzWrite {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpzError,
    },

    /// An `.npz` file could not be opened as an archive.
    #[error("NPZ read error on {path}: {source}")]
    NpzRead {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },
}

impl VaultError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn npz_write(path: impl Into<PathBuf>, source: ndarray_npy::WriteNpzError) -> Self {
        Self::NpzWrite {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn npz_read(path: impl Into<PathBuf>, source: ndarray_npy::ReadNpzError) -> Self {
        Self::NpzRead {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn not_found(path: impl Into<PathBuf>, what: impl Into<String>) -> Self {
        Self::NotFound {
            path: path.into(),
            what: what.into(),
        }
    }
}

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
