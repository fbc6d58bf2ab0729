//! Dense-array sink: full-length buffers filled by absolute time index.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::pipeline::{ArtifactLabels, ArtifactSink, BatchColumns};
use crate::artifact::{file_size, ArtifactInfo, NpzWriter, PartialFile};
use crate::error::{Result, VaultError};
use crate::schema::{ColumnRole, Schema};
use crate::store::ColumnArray;

/// Accumulates every column of a partition, then writes one `.npz`.
pub struct DenseSink {
    target: PathBuf,
    labels: ArtifactLabels,
    n_timesteps: usize,
    n_agents: usize,
    obs_dim: usize,
    act_dim: usize,
    buffers: Vec<(ColumnRole, ColumnArray)>,
}

impl DenseSink {
    /// Preallocate one `[T, ...]` buffer per resolved column.
    pub fn new(target: &Path, schema: &Schema, labels: ArtifactLabels) -> Self {
        let buffers = schema
            .columns
            .iter()
            .map(|spec| (spec.role, ColumnArray::zeros(spec.dtype, &spec.artifact_shape)))
            .collect();
        Self {
            target: target.to_path_buf(),
            labels,
            n_timesteps: schema.n_timesteps,
            n_agents: schema.n_agents,
            obs_dim: schema.obs_dim,
            act_dim: schema.act_dim,
            buffers,
        }
    }
}

impl ArtifactSink for DenseSink {
    type Output = ArtifactInfo;

    fn accept(&mut self, batch: &BatchColumns) -> Result<()> {
        for (role, slice) in &batch.columns {
            let Some((_, buffer)) = self.buffers.iter_mut().find(|(r, _)| r == role) else {
                continue;
            };
            buffer
                .write_rows(batch.batch.start, slice)
                .map_err(|detail| VaultError::ColumnLayoutMismatch {
                    path: self.labels.source.clone(),
                    column: role.store_name().to_string(),
                    detail,
                })?;
        }
        Ok(())
    }

    fn finish(self) -> Result<ArtifactInfo> {
        let (staged, file) = PartialFile::create(&self.target)?;
        let mut writer = NpzWriter::new(file, &self.target);

        for (role, buffer) in &self.buffers {
            writer.add_array(role.artifact_name(), buffer)?;
        }
        for (name, value) in [
            ("n_timesteps", self.n_timesteps),
            ("n_agents", self.n_agents),
            ("obs_dim", self.obs_dim),
            ("act_dim", self.act_dim),
        ] {
            writer.add_i64(name, value as i64)?;
        }
        writer.add_str("scenario", &self.labels.scenario)?;
        writer.add_str("quality", &self.labels.quality)?;
        writer.add_str("env", &self.labels.env)?;

        let mut out = writer.finish()?;
        out.flush().map_err(|e| VaultError::io(&self.target, e))?;
        drop(out);

        let path = staged.commit()?;
        let bytes = file_size(&path)?;
        debug!(path = %path.display(), bytes, "Wrote dense artifact");
        Ok(ArtifactInfo {
            path,
            bytes,
            timesteps: self.n_timesteps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::NpzArchive;
    use crate::convert::pipeline::ConversionPipeline;
    use crate::store::fixture::{PartitionFixture, VaultFixture};
    use crate::store::{ChunkedStore, ColumnStore, DType};

    fn labels(source: &Path) -> ArtifactLabels {
        ArtifactLabels {
            env: "gymnasium_mamujoco".into(),
            scenario: "2halfcheetah".into(),
            quality: "Good".into(),
            source: source.to_path_buf(),
        }
    }

    fn convert(spec: PartitionFixture, budget: usize) -> (tempfile::TempDir, ChunkedStore, NpzArchive) {
        let dir = tempfile::tempdir().unwrap();
        let vault = VaultFixture::new(dir.path(), "2halfcheetah");
        let path = vault.add_partition("Good", &spec);
        let store = ChunkedStore::open(&path).unwrap();
        let target = dir.path().join("2halfcheetah_Good.npz");

        let pipeline = ConversionPipeline::new(&store, "Good", budget).unwrap();
        let sink = DenseSink::new(&target, pipeline.schema(), labels(&path));
        let info = pipeline.run(sink).unwrap();
        assert_eq!(info.path, target);
        assert_eq!(info.timesteps, spec.timesteps);
        assert!(!dir.path().join("2halfcheetah_Good.npz.partial").exists());

        let archive = NpzArchive::open(&target).unwrap();
        (dir, store, archive)
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let spec = PartitionFixture::new(37, 2, 6, 3).chunk_timesteps(8);
        // Small budget forces many batches that straddle chunk boundaries.
        let (_dir, store, archive) = convert(spec, 200);

        for (column, array) in [
            ("observations", "observations"),
            ("actions", "actions"),
            ("rewards", "rewards"),
            ("terminals", "terminals"),
            ("truncations", "truncations"),
            ("infos/state", "states"),
        ] {
            let source = store.read(column, 0, 37).unwrap();
            assert_eq!(archive.array(array), Some(&source), "column {column}");
        }
        assert_eq!(archive.scalar("n_timesteps"), Some(37));
        assert_eq!(archive.scalar("n_agents"), Some(2));
        assert_eq!(archive.scalar("obs_dim"), Some(6));
        assert_eq!(archive.scalar("act_dim"), Some(3));
        assert_eq!(archive.string("scenario").as_deref(), Some("2halfcheetah"));
        assert_eq!(archive.string("quality").as_deref(), Some("Good"));
        assert_eq!(archive.string("env").as_deref(), Some("gymnasium_mamujoco"));
    }

    #[test]
    fn discrete_actions_gain_unit_axis() {
        let spec = PartitionFixture::new(12, 3, 4, 1).discrete_actions().without_state();
        let (_dir, store, archive) = convert(spec, 1 << 20);

        let actions = archive.array("actions").unwrap();
        assert_eq!(actions.shape(), &[12, 3, 1]);
        assert_eq!(actions.dtype(), DType::Int32);
        let source = store.read("actions", 0, 12).unwrap();
        assert_eq!(actions.to_f64_vec(), source.to_f64_vec());
        assert_eq!(archive.scalar("act_dim"), Some(1));
        assert!(archive.array("states").is_none());
    }

    #[test]
    fn failed_read_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let vault = VaultFixture::new(dir.path(), "s");
        let path = vault.add_partition("Good", &PartitionFixture::new(30, 1, 2, 1).chunk_timesteps(10));
        std::fs::remove_file(path.join("d").join("rewards.1")).unwrap();
        let store = ChunkedStore::open(&path).unwrap();
        let target = dir.path().join("s_Good.npz");

        let pipeline = ConversionPipeline::new(&store, "Good", 64).unwrap();
        let sink = DenseSink::new(&target, pipeline.schema(), labels(&path));
        let err = pipeline.run(sink).unwrap_err();
        assert!(matches!(err, VaultError::Conversion { .. }), "{err}");
        assert!(!target.exists());
        assert!(!dir.path().join("s_Good.npz.partial").exists());
    }
}
