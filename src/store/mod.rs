//! Read access to a quality partition's chunked column store.
//!
//! - [`array`] -- dtype-tagged dense arrays ([`ColumnArray`]).
//! - [`manifest`] -- the `manifest.json` chunk index and its validation.
//! - [`handle`] -- the [`ColumnStore`] trait and the file-backed
//!   [`ChunkedStore`].

pub mod array;
pub mod handle;
pub mod manifest;

#[cfg(test)]
pub(crate) mod fixture;

pub use array::{ColumnArray, DType};
pub use handle::{ChunkedStore, ColumnStore};
pub use manifest::{ColumnLayout, DATA_DIR, MANIFEST_FILE};
