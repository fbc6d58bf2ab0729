//! Per-timestep trajectory records.
//!
//! This module provides:
//! - [`types::TimestepRecord`], [`types::RecordMetadata`],
//!   [`types::RecordDocument`] -- the bounded-record artifact's data model.
//! - [`types::RecordBuffer`] -- a capped accumulation buffer that turns batch
//!   slices into ordered records.
//! - [`replay::ReplayData`] -- a finished artifact (either kind) loaded back
//!   into per-timestep form for replay verification.

pub mod replay;
pub mod types;

// Re-export the most commonly used items at the module level.
pub use replay::{ArtifactKind, ReplayData};
pub use types::{BatchSlices, RecordBuffer, RecordDocument, RecordMetadata, TimestepRecord};
