//! vault-convert: memory-bounded conversion of chunked multi-agent trajectory
//! vaults into dense `.npz` and bounded JSON artifacts, plus replay
//! verification of the result against a simulator.
//!
//! A vault is a `<scenario>.vlt` directory of quality partitions, each a
//! column store of time-indexed arrays. Conversion resolves a partition's
//! schema, plans batches that fit a memory budget and streams them into an
//! artifact sink.

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod convert;
pub mod env;
pub mod error;
pub mod inspect;
pub mod planner;
pub mod schema;
pub mod store;
pub mod trajectory;
pub mod vault;
pub mod verify;

pub use error::{Result, VaultError};
