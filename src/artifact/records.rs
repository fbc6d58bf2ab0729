//! Bounded-record JSON documents.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use super::{file_size, ArtifactInfo, PartialFile};
use crate::error::{Result, VaultError};
use crate::trajectory::RecordDocument;

/// First value JSON cannot represent, as `(field, t, value)`.
fn first_non_finite(document: &RecordDocument) -> Option<(&'static str, usize, f64)> {
    document.trajectories.iter().find_map(|r| {
        let fields: [(&'static str, Box<dyn Iterator<Item = &f64> + '_>); 4] = [
            ("obs", Box::new(r.obs.iter().flatten())),
            ("act", Box::new(r.act.iter().flatten())),
            ("rew", Box::new(r.rew.iter())),
            ("state", Box::new(r.state.iter().flatten())),
        ];
        fields
            .into_iter()
            .find_map(|(name, mut values)| values.find(|v| !v.is_finite()).map(|&v| (name, r.t, v)))
    })
}

/// Serialize `document` to `target` through a staged `.partial` file.
///
/// NaN and infinite values are rejected with `NonFiniteValue` before anything
/// is written, since they would otherwise serialize as `null`.
pub fn write(target: &Path, document: &RecordDocument, pretty: bool) -> Result<ArtifactInfo> {
    if let Some((column, t, value)) = first_non_finite(document) {
        return Err(VaultError::NonFiniteValue {
            path: target.to_path_buf(),
            column: column.to_string(),
            t,
            value,
        });
    }
    let (staged, file) = PartialFile::create(target)?;
    let mut writer = BufWriter::new(file);
    let encoded = if pretty {
        serde_json::to_writer_pretty(&mut writer, document)
    } else {
        serde_json::to_writer(&mut writer, document)
    };
    encoded.map_err(|e| VaultError::json(target, e))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| VaultError::io(target, e))?;
    drop(writer);

    let path = staged.commit()?;
    let bytes = file_size(&path)?;
    debug!(path = %path.display(), bytes, records = document.trajectories.len(), "Wrote record document");
    Ok(ArtifactInfo {
        path,
        bytes,
        timesteps: document.trajectories.len(),
    })
}

/// Load a record document written by [`write`].
pub fn load(path: &Path) -> Result<RecordDocument> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => VaultError::not_found(path, "artifact"),
        _ => VaultError::io(path, e),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| VaultError::json(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{RecordMetadata, TimestepRecord};

    fn document(records: usize) -> RecordDocument {
        RecordDocument {
            metadata: RecordMetadata {
                env: "mamujoco".into(),
                scenario: "2halfcheetah".into(),
                quality: "Good".into(),
                n_agents: 1,
                n_timesteps: 10_000,
                n_exported: records,
                obs_dim: 2,
                act_dim: 1,
            },
            trajectories: (0..records)
                .map(|t| TimestepRecord {
                    t,
                    obs: vec![vec![t as f64, 0.25]],
                    act: vec![vec![-0.5]],
                    rew: vec![1.5],
                    state: Some(vec![t as f64]),
                })
                .collect(),
        }
    }

    #[test]
    fn written_document_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2halfcheetah_Good.json");
        let doc = document(3);

        let info = write(&target, &doc, true).unwrap();
        assert_eq!(info.timesteps, 3);
        assert!(info.bytes > 0);
        assert!(!dir.path().join("2halfcheetah_Good.json.partial").exists());

        let text = std::fs::read_to_string(&target).unwrap();
        assert!(text.contains("\n  \"metadata\""), "pretty output expected");
        assert_eq!(load(&target).unwrap(), doc);
    }

    #[test]
    fn compact_output_is_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("s.json");
        write(&target, &document(0), false).unwrap();
        let text = std::fs::read_to_string(&target).unwrap();
        assert_eq!(text.trim_end().lines().count(), 1);

        let loaded = load(&target).unwrap();
        assert!(loaded.trajectories.is_empty());
        assert_eq!(loaded.metadata.n_timesteps, 10_000);
    }

    #[test]
    fn missing_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&dir.path().join("x.json")),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn non_finite_values_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("s.json");
        let mut doc = document(3);
        doc.trajectories[2].rew[0] = f64::NAN;

        let err = write(&target, &doc, false).unwrap_err();
        assert!(
            matches!(err, VaultError::NonFiniteValue { ref column, t: 2, .. } if column == "rew"),
            "{err}"
        );
        assert!(!target.exists());
    }
}
