//! NumPy `.npz` bundles, written and read through `ndarray-npy`.
//!
//! The writer produces what `numpy.savez_compressed` produces (deflated
//! members named `<array>.npy`), so artifacts load with a plain `numpy.load`.
//! Arrays keep their element type end to end, which keeps the round trip
//! bit-exact. Text labels are stored as 1-d `uint8` arrays of UTF-8 bytes;
//! `bytes(a).decode()` recovers them in NumPy.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use ndarray::{arr0, Array1, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpyError, ReadNpzError};

use crate::error::{Result, VaultError};
use crate::store::array::with_array;
use crate::store::ColumnArray;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Streams named arrays into a compressed `.npz` archive.
pub struct NpzWriter<W: Write + Seek> {
    npz: ndarray_npy::NpzWriter<W>,
    path: PathBuf,
}

impl NpzWriter<BufWriter<File>> {
    /// Write to an already-created file; `path` is used for error messages.
    pub fn new(file: File, path: &Path) -> Self {
        Self::from_writer(BufWriter::new(file), path)
    }
}

impl<W: Write + Seek> NpzWriter<W> {
    pub fn from_writer(writer: W, path: &Path) -> Self {
        Self {
            npz: ndarray_npy::NpzWriter::new_compressed(writer),
            path: path.to_path_buf(),
        }
    }

    /// Add a dense array in its own dtype.
    pub fn add_array(&mut self, name: &str, array: &ColumnArray) -> Result<()> {
        with_array!(array, a => self.npz.add_array(name, a))
            .map_err(|e| VaultError::npz_write(&self.path, e))
    }

    /// Add a 0-d int64 array.
    pub fn add_i64(&mut self, name: &str, value: i64) -> Result<()> {
        self.npz
            .add_array(name, &arr0(value))
            .map_err(|e| VaultError::npz_write(&self.path, e))
    }

    /// Add a text label as a 1-d `uint8` array of its UTF-8 bytes.
    pub fn add_str(&mut self, name: &str, value: &str) -> Result<()> {
        self.npz
            .add_array(name, &Array1::from(value.as_bytes().to_vec()))
            .map_err(|e| VaultError::npz_write(&self.path, e))
    }

    /// Write the central directory and hand back the writer.
    pub fn finish(self) -> Result<W> {
        let path = self.path;
        self.npz.finish().map_err(|e| VaultError::npz_write(&path, e))
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

fn is_wrong_dtype(err: &ReadNpzError) -> bool {
    matches!(err, ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_)))
}

/// Read one member in whichever supported dtype it was stored with.
fn read_member<R: Read + Seek>(
    npz: &mut NpzReader<R>,
    name: &str,
) -> std::result::Result<ColumnArray, ReadNpzError> {
    macro_rules! attempt {
        ($t:ty) => {
            match npz.by_name::<OwnedRepr<$t>, IxDyn>(name) {
                Ok(array) => return Ok(ColumnArray::from(array)),
                Err(e) if is_wrong_dtype(&e) => {}
                Err(e) => return Err(e),
            }
        };
    }
    attempt!(f32);
    attempt!(f64);
    attempt!(i32);
    attempt!(i64);
    attempt!(u8);
    npz.by_name::<OwnedRepr<bool>, IxDyn>(name).map(ColumnArray::from)
}

/// A fully loaded `.npz` archive.
#[derive(Debug, Clone)]
pub struct NpzArchive {
    path: PathBuf,
    members: BTreeMap<String, ColumnArray>,
}

impl NpzArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VaultError::not_found(path, "artifact"),
            _ => VaultError::io(path, e),
        })?;
        let mut npz = NpzReader::new(BufReader::new(file)).map_err(|e| VaultError::npz_read(path, e))?;
        let names = npz.names().map_err(|e| VaultError::npz_read(path, e))?;

        let mut members = BTreeMap::new();
        for name in names {
            let key = name.strip_suffix(".npy").unwrap_or(&name).to_string();
            let array = read_member(&mut npz, &name).map_err(|e| VaultError::InvalidArtifact {
                path: path.to_path_buf(),
                reason: format!("member '{key}': {e}"),
            })?;
            members.insert(key, array);
        }
        Ok(Self {
            path: path.to_path_buf(),
            members,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn array(&self, name: &str) -> Option<&ColumnArray> {
        self.members.get(name)
    }

    /// A text label stored by [`NpzWriter::add_str`].
    pub fn string(&self, name: &str) -> Option<String> {
        match self.members.get(name)? {
            ColumnArray::Uint8(a) if a.ndim() == 1 => String::from_utf8(a.iter().copied().collect()).ok(),
            _ => None,
        }
    }

    /// A 0-d integer member.
    pub fn scalar(&self, name: &str) -> Option<i64> {
        let a = self.array(name)?;
        if a.dtype().is_float() {
            return None;
        }
        a.scalar_f64().map(|v| v as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DType;

    #[test]
    fn archive_round_trip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npz");
        let values: Vec<f32> = (0..24).map(|i| i as f32 * 0.1 - 1.0).collect();
        let obs = ColumnArray::from_f32(&[4, 2, 3], &values).unwrap();
        let flags = ColumnArray::from_le_bytes(DType::Bool, &[4], &[0, 1, 0, 1]).unwrap();

        let file = File::create(&path).unwrap();
        let mut writer = NpzWriter::new(file, &path);
        writer.add_array("observations", &obs).unwrap();
        writer.add_array("flags", &flags).unwrap();
        writer.add_i64("n_timesteps", 4).unwrap();
        writer.add_str("scenario", "2halfcheetah").unwrap();
        writer.add_str("quality", "").unwrap();
        writer.finish().unwrap().flush().unwrap();

        let archive = NpzArchive::open(&path).unwrap();
        assert_eq!(archive.array("observations"), Some(&obs));
        assert_eq!(archive.array("flags"), Some(&flags));
        assert_eq!(archive.scalar("n_timesteps"), Some(4));
        assert_eq!(archive.string("scenario").as_deref(), Some("2halfcheetah"));
        assert_eq!(archive.string("quality").as_deref(), Some(""));
        assert_eq!(archive.string("observations"), None);
        assert_eq!(archive.scalar("observations"), None);
        assert_eq!(archive.names().count(), 5);
    }

    #[test]
    fn members_keep_their_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npz");
        let ids: Vec<u8> = (0..6i32).flat_map(|v| v.to_le_bytes()).collect();
        let actions = ColumnArray::from_le_bytes(DType::Int32, &[3, 2, 1], &ids).unwrap();

        let mut writer = NpzWriter::new(File::create(&path).unwrap(), &path);
        writer.add_array("actions", &actions).unwrap();
        writer.finish().unwrap().flush().unwrap();

        let archive = NpzArchive::open(&path).unwrap();
        let loaded = archive.array("actions").unwrap();
        assert_eq!(loaded.dtype(), DType::Int32);
        assert_eq!(loaded.shape(), &[3, 2, 1]);
    }

    #[test]
    fn missing_archive_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = NpzArchive::open(&dir.path().join("x.npz")).unwrap_err();
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[test]
    fn non_zip_file_is_an_npz_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.npz");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = NpzArchive::open(&path).unwrap_err();
        assert!(matches!(err, VaultError::NpzRead { .. }), "{err}");
    }
}
