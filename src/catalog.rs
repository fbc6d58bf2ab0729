//! Quality partition discovery and selection.
//!
//! Discovery ([`list`]) and user intent ([`select`]) are kept apart: the
//! catalog is a plain ordered list of names, and selection is a pure function
//! over it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, VaultError};
use crate::schema::METADATA_FILE;

/// Ordered (lexical) quality names found under a vault root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityCatalog {
    vault: PathBuf,
    names: Vec<String>,
}

impl QualityCatalog {
    /// Build a catalog from names; they are sorted and deduplicated.
    pub fn new(vault: impl Into<PathBuf>, names: impl IntoIterator<Item = String>) -> Result<Self> {
        let vault = vault.into();
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(VaultError::EmptyVault { path: vault });
        }
        Ok(Self { vault, names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn vault(&self) -> &Path {
        &self.vault
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Which partitions the caller wants converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualitySelection {
    Named(String),
    FirstAvailable,
    All,
}

impl QualitySelection {
    /// Map the CLI's `--quality` / `--all-qualities` pair to a selection.
    pub fn from_flags(quality: Option<String>, all: bool) -> Self {
        match (quality, all) {
            (_, true) => Self::All,
            (Some(name), false) => Self::Named(name),
            (None, false) => Self::FirstAvailable,
        }
    }
}

/// Enumerate quality partitions: sub-directories that hold a `metadata.json`.
pub fn list(vault_path: &Path) -> Result<QualityCatalog> {
    let entries = std::fs::read_dir(vault_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => VaultError::not_found(vault_path, "vault directory"),
        _ => VaultError::io(vault_path, e),
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VaultError::io(vault_path, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Skipping partition with non UTF-8 name");
            continue;
        };
        if path.join(METADATA_FILE).is_file() {
            names.push(name.to_string());
        } else {
            warn!(path = %path.display(), "Skipping directory without {METADATA_FILE}");
        }
    }
    QualityCatalog::new(vault_path, names)
}

/// Resolve a selection against the catalog.
pub fn select(catalog: &QualityCatalog, requested: &QualitySelection) -> Result<Vec<String>> {
    match requested {
        QualitySelection::All => Ok(catalog.names.clone()),
        QualitySelection::FirstAvailable => catalog
            .names
            .first()
            .map(|n| vec![n.clone()])
            .ok_or_else(|| VaultError::EmptyVault {
                path: catalog.vault.clone(),
            }),
        QualitySelection::Named(name) if catalog.contains(name) => Ok(vec![name.clone()]),
        QualitySelection::Named(name) => Err(VaultError::QualityNotFound {
            path: catalog.vault.clone(),
            requested: name.clone(),
            available: catalog.names.clone(),
        }),
    }
}

/// Reject selections where two qualities would produce the same artifact file
/// (compared case-insensitively, since output may land on such a filesystem).
pub fn check_output_names(output_dir: &Path, file_names: &[(String, String)]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for (quality, file) in file_names {
        if let Some(first) = seen.insert(file.to_lowercase(), quality.as_str()) {
            return Err(VaultError::OutputNameCollision {
                path: output_dir.join(file),
                first: first.to_string(),
                second: quality.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> QualityCatalog {
        QualityCatalog::new(
            "/data/3trains.vlt",
            ["Poor", "Good", "Medium"].map(String::from),
        )
        .unwrap()
    }

    #[test]
    fn catalog_is_lexically_ordered() {
        assert_eq!(catalog().names(), &["Good", "Medium", "Poor"]);
    }

    #[test]
    fn select_all_returns_catalog_order() {
        let selected = select(&catalog(), &QualitySelection::All).unwrap();
        assert_eq!(selected, vec!["Good", "Medium", "Poor"]);
    }

    #[test]
    fn select_first_available_returns_one() {
        let selected = select(&catalog(), &QualitySelection::FirstAvailable).unwrap();
        assert_eq!(selected, vec!["Good"]);
    }

    #[test]
    fn select_named() {
        let selected = select(&catalog(), &QualitySelection::Named("Medium".into())).unwrap();
        assert_eq!(selected, vec!["Medium"]);
    }

    #[test]
    fn select_absent_name_fails() {
        let err = select(&catalog(), &QualitySelection::Named("Expert".into())).unwrap_err();
        match err {
            VaultError::QualityNotFound {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, "Expert");
                assert_eq!(available.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let err = QualityCatalog::new("/data/empty.vlt", Vec::new()).unwrap_err();
        assert!(matches!(err, VaultError::EmptyVault { .. }));
    }

    #[test]
    fn flags_map_to_selection() {
        assert_eq!(QualitySelection::from_flags(None, false), QualitySelection::FirstAvailable);
        assert_eq!(QualitySelection::from_flags(Some("Good".into()), true), QualitySelection::All);
        assert_eq!(
            QualitySelection::from_flags(Some("Good".into()), false),
            QualitySelection::Named("Good".into())
        );
    }

    #[test]
    fn list_skips_non_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("s.vlt");
        for q in ["Medium", "Good"] {
            std::fs::create_dir_all(root.join(q)).unwrap();
            std::fs::write(root.join(q).join(METADATA_FILE), "{}").unwrap();
        }
        std::fs::create_dir_all(root.join("scratch")).unwrap();
        std::fs::write(root.join("README"), "x").unwrap();

        let catalog = list(&root).unwrap();
        assert_eq!(catalog.names(), &["Good", "Medium"]);
    }

    #[test]
    fn list_missing_vault_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = list(&dir.path().join("nope.vlt")).unwrap_err();
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[test]
    fn list_vault_without_partitions_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let err = list(dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::EmptyVault { .. }));
    }

    #[test]
    fn case_insensitive_collisions_are_rejected() {
        let names = vec![
            ("Good".to_string(), "s_Good.npz".to_string()),
            ("good".to_string(), "s_good.npz".to_string()),
        ];
        let err = check_output_names(Path::new("/out"), &names).unwrap_err();
        assert!(matches!(err, VaultError::OutputNameCollision { .. }), "{err}");

        let distinct = vec![
            ("Good".to_string(), "s_Good.npz".to_string()),
            ("Poor".to_string(), "s_Poor.npz".to_string()),
        ];
        assert!(check_output_names(Path::new("/out"), &distinct).is_ok());
    }
}
