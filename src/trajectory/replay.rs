//! Replayable trajectory data loaded back from a finished artifact.
//!
//! Both artifact kinds normalise to the same per-timestep, per-agent layout
//! so the verifier does not care which writer produced the file. Only a
//! leading window of timesteps is widened to `f64`; the rest of the artifact
//! is counted but never expanded.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::artifact::{records, NpzArchive, JSON_EXTENSION, NPZ_EXTENSION};
use crate::error::{Result, VaultError};
use crate::schema::ColumnRole;
use crate::store::ColumnArray;

/// Which writer produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Npz,
    Json,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            NPZ_EXTENSION => Some(Self::Npz),
            JSON_EXTENSION => Some(Self::Json),
            _ => None,
        }
    }
}

/// The leading window of a stored trajectory, in replay order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayData {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub env: String,
    pub scenario: String,
    pub quality: String,
    pub n_agents: usize,
    pub obs_dim: usize,
    pub act_dim: usize,
    /// Timesteps in the source partition.
    pub source_timesteps: usize,
    /// Timesteps the artifact claims to hold.
    pub declared_timesteps: usize,
    /// Timesteps the artifact actually holds; the vectors below may cover
    /// fewer.
    pub stored_timesteps: usize,
    pub discrete_actions: bool,
    /// `[T][A][obs_dim]`
    pub observations: Vec<Vec<Vec<f64>>>,
    /// `[T][A][act_dim]`
    pub actions: Vec<Vec<Vec<f64>>>,
    /// `[T][A]`
    pub rewards: Vec<Vec<f64>>,
    /// `[T][state_dim]`
    pub states: Option<Vec<Vec<f64>>>,
}

impl ReplayData {
    /// Load an artifact, dispatching on its extension, and widen its first
    /// `window` timesteps.
    pub fn load(path: &Path, window: usize) -> Result<Self> {
        let data = match ArtifactKind::from_path(path) {
            Some(ArtifactKind::Npz) => Self::from_npz(&NpzArchive::open(path)?, window)?,
            Some(ArtifactKind::Json) => Self::from_json(path, window)?,
            None => {
                return Err(VaultError::InvalidArtifact {
                    path: path.to_path_buf(),
                    reason: format!("expected a .{NPZ_EXTENSION} or .{JSON_EXTENSION} file"),
                })
            }
        };
        debug!(
            path = %path.display(),
            stored = data.stored_timesteps,
            loaded = data.len(),
            agents = data.n_agents,
            "Loaded replay data"
        );
        Ok(data)
    }

    /// Timesteps loaded into the window.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    fn from_npz(archive: &NpzArchive, window: usize) -> Result<Self> {
        let path = archive.path();
        let invalid = |reason: String| VaultError::InvalidArtifact {
            path: path.to_path_buf(),
            reason,
        };
        let array = |role: ColumnRole| {
            archive
                .array(role.artifact_name())
                .ok_or_else(|| invalid(format!("missing array '{}'", role.artifact_name())))
        };
        let scalar = |name: &str| {
            archive
                .scalar(name)
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| invalid(format!("missing integer scalar '{name}'")))
        };

        let observations = array(ColumnRole::Observations)?;
        let actions = array(ColumnRole::Actions)?;
        let rewards = array(ColumnRole::Rewards)?;
        let n_agents = scalar("n_agents")?;
        let n_timesteps = scalar("n_timesteps")?;
        if n_agents == 0 {
            return Err(invalid("n_agents is 0".into()));
        }
        if actions.len() != observations.len() || rewards.len() != observations.len() {
            return Err(invalid(format!(
                "arrays disagree on length: observations {}, actions {}, rewards {}",
                observations.len(),
                actions.len(),
                rewards.len()
            )));
        }

        let stored_timesteps = observations.len();
        let loaded = window.min(stored_timesteps);
        let grouped = |a: &ColumnArray| (0..loaded).map(|t| a.row_grouped(t, n_agents)).collect::<Vec<_>>();
        let flat = |a: &ColumnArray| {
            (0..loaded.min(a.len())).map(|t| a.row_f64(t)).collect::<Vec<_>>()
        };

        Ok(Self {
            path: path.to_path_buf(),
            kind: ArtifactKind::Npz,
            env: archive.string("env").unwrap_or_default(),
            scenario: archive.string("scenario").unwrap_or_default(),
            quality: archive.string("quality").unwrap_or_default(),
            n_agents,
            obs_dim: scalar("obs_dim")?,
            act_dim: scalar("act_dim")?,
            source_timesteps: n_timesteps,
            declared_timesteps: n_timesteps,
            stored_timesteps,
            discrete_actions: !actions.dtype().is_float(),
            observations: grouped(observations),
            actions: grouped(actions),
            rewards: flat(rewards),
            states: archive.array(ColumnRole::State.artifact_name()).map(flat),
        })
    }

    fn from_json(path: &Path, window: usize) -> Result<Self> {
        let mut document = records::load(path)?;
        let meta = document.metadata;
        let stored_timesteps = document.trajectories.len();
        document.trajectories.truncate(window);

        // Integer-valued single-component actions are treated as discrete ids.
        let discrete_actions = meta.act_dim == 1
            && !document.trajectories.is_empty()
            && document
                .trajectories
                .iter()
                .flat_map(|r| r.act.iter().flatten())
                .all(|a| a.fract() == 0.0);

        let states = document
            .trajectories
            .iter()
            .map(|r| r.state.clone())
            .collect::<Option<Vec<_>>>()
            .filter(|s| !s.is_empty());

        let mut observations = Vec::with_capacity(document.trajectories.len());
        let mut actions = Vec::with_capacity(document.trajectories.len());
        let mut rewards = Vec::with_capacity(document.trajectories.len());
        for record in document.trajectories {
            observations.push(record.obs);
            actions.push(record.act);
            rewards.push(record.rew);
        }

        Ok(Self {
            path: path.to_path_buf(),
            kind: ArtifactKind::Json,
            env: meta.env,
            scenario: meta.scenario,
            quality: meta.quality,
            n_agents: meta.n_agents,
            obs_dim: meta.obs_dim,
            act_dim: meta.act_dim,
            source_timesteps: meta.n_timesteps,
            declared_timesteps: meta.n_exported,
            stored_timesteps,
            discrete_actions,
            observations,
            actions,
            rewards,
            states,
        })
    }
}
