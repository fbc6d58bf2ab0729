//! Random-access reads over a partition's chunked column store.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::array::ColumnArray;
use super::manifest::{ColumnLayout, Manifest};
use crate::error::{Result, VaultError};

/// The narrow read interface the conversion pipeline depends on.
///
/// How columns are chunked on disk is invisible behind this trait; any store
/// that can hand back a dense `[start, end)` slice of a named column plugs in.
pub trait ColumnStore {
    /// Partition directory backing this store.
    fn path(&self) -> &Path;

    /// Names of all columns, in lexical order.
    fn column_names(&self) -> Vec<&str>;

    /// Declared dtype/shape/chunking of a column.
    fn layout(&self, column: &str) -> Option<&ColumnLayout>;

    /// Read rows `[start, end)` of `column`.
    ///
    /// The returned array has shape `[end - start, ...]` and the column's
    /// native dtype. Repeated reads of the same range return identical values.
    fn read(&self, column: &str, start: usize, end: usize) -> Result<ColumnArray>;
}

/// A column store backed by `manifest.json` plus raw chunk files under `d/`.
#[derive(Debug)]
pub struct ChunkedStore {
    root: PathBuf,
    columns: BTreeMap<String, ColumnLayout>,
}

impl ChunkedStore {
    /// Open the store in `partition_dir`.
    ///
    /// Fails with `NotFound` if the directory or its manifest is missing, and
    /// with `CorruptStore` if the manifest cannot be parsed or its chunk index
    /// is inconsistent.
    pub fn open(partition_dir: &Path) -> Result<Self> {
        if !partition_dir.is_dir() {
            return Err(VaultError::not_found(partition_dir, "partition directory"));
        }
        let columns = Manifest::load(partition_dir)?;
        debug!(
            path = %partition_dir.display(),
            columns = columns.len(),
            "Opened column store"
        );
        Ok(Self {
            root: partition_dir.to_path_buf(),
            columns,
        })
    }

    fn read_chunk_rows(
        &self,
        file: &Path,
        skip_rows: usize,
        rows: usize,
        row_bytes: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let mut f = File::open(file).map_err(|e| VaultError::io(file, e))?;
        f.seek(SeekFrom::Start((skip_rows * row_bytes) as u64))
            .map_err(|e| VaultError::io(file, e))?;
        let offset = out.len();
        out.resize(offset + rows * row_bytes, 0);
        f.read_exact(&mut out[offset..])
            .map_err(|e| VaultError::io(file, e))?;
        Ok(())
    }
}

impl ColumnStore for ChunkedStore {
    fn path(&self) -> &Path {
        &self.root
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    fn layout(&self, column: &str) -> Option<&ColumnLayout> {
        self.columns.get(column)
    }

    fn read(&self, column: &str, start: usize, end: usize) -> Result<ColumnArray> {
        let layout = self.columns.get(column).ok_or_else(|| VaultError::ColumnNotFound {
            path: self.root.clone(),
            column: column.to_string(),
        })?;
        let len = layout.timesteps();
        if start > end || end > len {
            return Err(VaultError::Range {
                path: self.root.clone(),
                column: column.to_string(),
                start,
                end,
                len,
            });
        }

        let row_bytes = layout.row_bytes();
        let mut data = Vec::with_capacity((end - start) * row_bytes);

        // Chunks are contiguous and ascending (checked at open).
        let first = layout.chunks.partition_point(|c| c.end <= start);
        for chunk in layout.chunks[first..].iter().take_while(|c| c.start < end) {
            let lo = start.max(chunk.start);
            let hi = end.min(chunk.end);
            let file = self.root.join(&chunk.file);
            self.read_chunk_rows(&file, lo - chunk.start, hi - lo, row_bytes, &mut data)?;
        }

        let mut shape = layout.shape.clone();
        shape[0] = end - start;
        ColumnArray::from_le_bytes(layout.dtype, &shape, &data).ok_or_else(|| VaultError::CorruptStore {
            path: self.root.clone(),
            reason: format!("column '{column}' returned a short read for [{start}, {end})"),
        })
    }
}
