//! Chunk index (`manifest.json`) for a partition's column store.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use super::array::DType;
use crate::error::{Result, VaultError};

/// File name of the chunk index inside a partition directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Directory holding chunk payloads.
pub const DATA_DIR: &str = "d";
/// Manifest format version this crate understands.
pub const MANIFEST_VERSION: u32 = 1;

/// One chunk file holding rows `[start, end)` of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub start: usize,
    pub end: usize,
    /// Path relative to the partition directory.
    pub file: String,
}

impl ChunkRef {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Index entry for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnEntry {
    /// NumPy dtype name, e.g. `float32`.
    pub dtype: String,
    /// Full shape; axis 0 is time.
    pub shape: Vec<usize>,
    pub chunks: Vec<ChunkRef>,
}

/// Parsed `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Columns keyed by `/`-joined name (`observations`, `infos/state`).
    pub columns: BTreeMap<String, ColumnEntry>,
}

/// A manifest column after validation.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub chunks: Vec<ChunkRef>,
}

impl ColumnLayout {
    /// Length of the time axis.
    pub fn timesteps(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn row_bytes(&self) -> usize {
        self.shape.iter().skip(1).product::<usize>() * self.dtype.size()
    }
}

impl Manifest {
    /// Read and validate the manifest in `partition_dir`.
    ///
    /// Missing file is `NotFound`; anything unparseable or structurally
    /// inconsistent (unknown dtype, gaps or overlaps in the chunk index, chunk
    /// files outside the partition) is `CorruptStore`.
    pub fn load(partition_dir: &Path) -> Result<BTreeMap<String, ColumnLayout>> {
        let path = partition_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(VaultError::not_found(&path, "chunk manifest"));
        }
        let text = std::fs::read_to_string(&path).map_err(|e| VaultError::io(&path, e))?;
        let manifest: Manifest = serde_json::from_str(&text).map_err(|e| VaultError::CorruptStore {
            path: path.clone(),
            reason: format!("unparseable manifest: {e}"),
        })?;
        manifest.validate(&path)
    }

    fn validate(self, path: &Path) -> Result<BTreeMap<String, ColumnLayout>> {
        let corrupt = |reason: String| VaultError::CorruptStore {
            path: path.to_path_buf(),
            reason,
        };

        if self.version != MANIFEST_VERSION {
            return Err(corrupt(format!(
                "unsupported manifest version {} (supported: {MANIFEST_VERSION})",
                self.version
            )));
        }

        let mut layouts = BTreeMap::new();
        for (name, entry) in self.columns {
            let dtype = DType::parse(&entry.dtype)
                .ok_or_else(|| corrupt(format!("column '{name}' has unknown dtype '{}'", entry.dtype)))?;
            let Some(&len) = entry.shape.first() else {
                return Err(corrupt(format!("column '{name}' has an empty shape")));
            };

            let mut cursor = 0;
            for chunk in &entry.chunks {
                if !is_contained(&chunk.file) {
                    return Err(corrupt(format!(
                        "column '{name}' chunk file '{}' escapes the partition directory",
                        chunk.file
                    )));
                }
                if chunk.start != cursor || chunk.end <= chunk.start {
                    return Err(corrupt(format!(
                        "column '{name}' chunk {} covers [{}, {}), expected to start at {cursor}",
                        chunk.file, chunk.start, chunk.end
                    )));
                }
                cursor = chunk.end;
            }
            if cursor != len {
                return Err(corrupt(format!(
                    "column '{name}' chunks cover {cursor} timesteps, shape declares {len}"
                )));
            }

            layouts.insert(
                name,
                ColumnLayout {
                    dtype,
                    shape: entry.shape,
                    chunks: entry.chunks,
                },
            );
        }
        Ok(layouts)
    }
}

/// A chunk path must be relative and made only of plain components.
fn is_contained(file: &str) -> bool {
    let path = Path::new(file);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}
