//! Vault root handling: path validation, naming and partition access.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::{self, QualityCatalog};
use crate::error::{Result, VaultError};
use crate::store::ChunkedStore;

/// Extension every vault directory carries.
pub const VAULT_EXTENSION: &str = "vlt";

/// An opened `<scenario>.vlt` directory.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    scenario: String,
    env_name: String,
}

impl Vault {
    /// Validate `path` as a vault root.
    ///
    /// The environment label is `env_override` when given, otherwise the name
    /// of the directory that holds the vault (vaults are conventionally laid
    /// out as `<env>/<scenario>.vlt`).
    pub fn open(path: &Path, env_override: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(VaultError::not_found(path, "vault directory"));
        }
        if !path.is_dir() {
            return Err(VaultError::InvalidVaultPath {
                path: path.to_path_buf(),
                reason: "not a directory".into(),
            });
        }
        if path.extension().and_then(|e| e.to_str()) != Some(VAULT_EXTENSION) {
            return Err(VaultError::InvalidVaultPath {
                path: path.to_path_buf(),
                reason: format!("expected a directory ending in .{VAULT_EXTENSION}"),
            });
        }

        let scenario = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VaultError::InvalidVaultPath {
                path: path.to_path_buf(),
                reason: "cannot derive a scenario name".into(),
            })?
            .to_string();

        let env_name = env_override
            .map(str::to_string)
            .or_else(|| {
                std::fs::canonicalize(path)
                    .ok()?
                    .parent()?
                    .file_name()?
                    .to_str()
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());

        debug!(path = %path.display(), %scenario, env = %env_name, "Opened vault");
        Ok(Self {
            root: path.to_path_buf(),
            scenario,
            env_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    /// Enumerate the vault's quality partitions.
    pub fn catalog(&self) -> Result<QualityCatalog> {
        catalog::list(&self.root)
    }

    pub fn partition_path(&self, quality: &str) -> PathBuf {
        self.root.join(quality)
    }

    /// Open the column store of one partition.
    pub fn open_partition(&self, quality: &str) -> Result<ChunkedStore> {
        ChunkedStore::open(&self.partition_path(quality))
    }

    /// Shared file stem of a partition's action exports.
    pub fn actions_file_stem(&self, quality: &str) -> String {
        format!("{}_{}_actions", self.scenario, quality)
    }

    /// Artifact file name for `quality` with the given extension.
    pub fn artifact_file_name(&self, quality: &str, extension: &str) -> String {
        format!("{}_{}.{}", self.scenario, quality, extension)
    }
}
