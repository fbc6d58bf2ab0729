//! Read-only vault inspection.
//!
//! Builds a [`VaultReport`] describing every partition's on-disk layout and
//! resolved schema. A partition that fails to resolve is still reported,
//! with the error in place of the schema.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::schema::{self, METADATA_FILE};
use crate::store::{ChunkedStore, DATA_DIR, MANIFEST_FILE};
use crate::vault::Vault;

#[derive(Debug, Clone, Serialize)]
pub struct VaultReport {
    pub path: PathBuf,
    pub scenario: String,
    pub env: String,
    pub partitions: Vec<PartitionReport>,
}

impl VaultReport {
    /// Partitions whose schema resolved.
    pub fn healthy(&self) -> usize {
        self.partitions.iter().filter(|p| p.schema.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub quality: String,
    pub has_metadata: bool,
    pub has_manifest: bool,
    pub has_data_dir: bool,
    pub data_files: usize,
    pub version: Option<String>,
    pub schema: Option<SchemaSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub timesteps: usize,
    pub agents: usize,
    pub obs_dim: usize,
    pub act_dim: usize,
    pub state_dim: Option<usize>,
    pub discrete_actions: bool,
    /// Column name to dtype, for the columns a conversion carries.
    pub dtypes: BTreeMap<String, String>,
    /// Bytes one timestep occupies across those columns.
    pub bytes_per_step: usize,
}

/// Describe every partition of `vault`.
pub fn inspect(vault: &Vault) -> Result<VaultReport> {
    let catalog = vault.catalog()?;
    let partitions = catalog
        .names()
        .iter()
        .map(|quality| inspect_partition(quality, &vault.partition_path(quality)))
        .collect();
    Ok(VaultReport {
        path: vault.path().to_path_buf(),
        scenario: vault.scenario().to_string(),
        env: vault.env_name().to_string(),
        partitions,
    })
}

fn inspect_partition(quality: &str, dir: &Path) -> PartitionReport {
    let data_dir = dir.join(DATA_DIR);
    let data_files = std::fs::read_dir(&data_dir)
        .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_file()).count())
        .unwrap_or(0);

    let mut report = PartitionReport {
        quality: quality.to_string(),
        has_metadata: dir.join(METADATA_FILE).is_file(),
        has_manifest: dir.join(MANIFEST_FILE).is_file(),
        has_data_dir: data_dir.is_dir(),
        data_files,
        version: None,
        schema: None,
        error: None,
    };

    let resolved = ChunkedStore::open(dir).and_then(|store| schema::resolve(&store));
    match resolved {
        Ok(schema) => {
            report.version = schema.version.clone();
            report.schema = Some(SchemaSummary {
                timesteps: schema.n_timesteps,
                agents: schema.n_agents,
                obs_dim: schema.obs_dim,
                act_dim: schema.act_dim,
                state_dim: schema.state_dim,
                discrete_actions: schema.discrete_actions,
                dtypes: schema
                    .columns
                    .iter()
                    .map(|c| (c.role.store_name().to_string(), c.dtype.name().to_string()))
                    .collect(),
                bytes_per_step: schema.per_step_bytes(),
            });
        }
        Err(e) => {
            warn!(%quality, error = %e, "Partition failed to resolve");
            report.version = schema::VaultMetadata::load(dir).ok().and_then(|m| m.version);
            report.error = Some(e.to_string());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixture::{PartitionFixture, VaultFixture};

    #[test]
    fn reports_healthy_and_broken_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = VaultFixture::new(&dir.path().join("smac_v1"), "3m");
        fixture.add_partition("Good", &PartitionFixture::new(30, 3, 10, 1).discrete_actions().chunk_timesteps(10));
        fixture.add_partition("Poor", &PartitionFixture::new(30, 3, 10, 1));
        fixture.corrupt_manifest("Poor");

        let vault = Vault::open(fixture.path(), None).unwrap();
        let report = inspect(&vault).unwrap();
        assert_eq!(report.scenario, "3m");
        assert_eq!(report.env, "smac_v1");
        assert_eq!(report.partitions.len(), 2);
        assert_eq!(report.healthy(), 1);

        let good = &report.partitions[0];
        assert_eq!(good.quality, "Good");
        assert!(good.has_metadata && good.has_manifest && good.has_data_dir);
        assert_eq!(good.version.as_deref(), Some("0.1.2"));
        // 3 chunks each for six columns.
        assert_eq!(good.data_files, 18);
        let schema = good.schema.as_ref().unwrap();
        assert_eq!(schema.timesteps, 30);
        assert_eq!(schema.agents, 3);
        assert!(schema.discrete_actions);
        assert_eq!(schema.dtypes["actions"], "int32");

        let poor = &report.partitions[1];
        assert!(poor.schema.is_none());
        assert!(poor.error.as_deref().unwrap().contains("corrupt"), "{:?}", poor.error);
        assert_eq!(poor.version.as_deref(), Some("0.1.2"));
    }

    #[test]
    fn report_serializes_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = VaultFixture::new(dir.path(), "s");
        fixture.add_partition("Good", &PartitionFixture::new(4, 1, 2, 1));
        let vault = Vault::open(fixture.path(), Some("mamujoco")).unwrap();

        let json = serde_json::to_value(inspect(&vault).unwrap()).unwrap();
        assert_eq!(json["env"], "mamujoco");
        assert_eq!(json["partitions"][0]["schema"]["timesteps"], 4);
        assert!(json["partitions"][0]["error"].is_null());
    }
}
