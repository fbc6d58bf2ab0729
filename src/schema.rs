//! Schema resolution for a quality partition.
//!
//! A partition's `metadata.json` declares every column's shape as a string
//! such as `"(1, 50000, 20, 238)"` (leading batch axis, then time). The
//! resolver parses those declarations, cross-checks them against the column
//! store's manifest and derives the canonical [`Schema`]: agent count,
//! timestep count, feature dimensions and the set of optional columns.
//!
//! Resolution is the single gate before any batch read: every column must
//! agree on the time axis, otherwise the partition is rejected here.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::store::{ColumnStore, DType};

/// File name of the partition descriptor.
pub const METADATA_FILE: &str = "metadata.json";

// ---------------------------------------------------------------------------
// metadata.json
// ---------------------------------------------------------------------------

/// A leaf string or a nested mapping (e.g. `infos: { state: ... }`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Node {
    Leaf(String),
    Nested(BTreeMap<String, Node>),
}

fn flatten(prefix: &str, nodes: BTreeMap<String, Node>, out: &mut BTreeMap<String, String>) {
    for (key, node) in nodes {
        let name = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}/{key}")
        };
        match node {
            Node::Leaf(value) => {
                out.insert(name, value);
            }
            Node::Nested(children) => flatten(&name, children, out),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    version: Option<serde_json::Value>,
    structure_shape: BTreeMap<String, Node>,
    #[serde(default)]
    structure_dtype: BTreeMap<String, Node>,
}

/// Parsed partition descriptor with nested keys flattened to `a/b` names.
#[derive(Debug, Clone)]
pub struct VaultMetadata {
    pub version: Option<String>,
    /// Declared shapes with the batch axis stripped (axis 0 is time).
    pub shapes: BTreeMap<String, Vec<usize>>,
    /// Declared dtype names.
    pub dtypes: BTreeMap<String, String>,
}

impl VaultMetadata {
    /// Read `metadata.json` from a partition directory.
    pub fn load(partition_dir: &Path) -> Result<Self> {
        let path = partition_dir.join(METADATA_FILE);
        if !path.is_file() {
            return Err(VaultError::not_found(&path, "partition metadata"));
        }
        let text = std::fs::read_to_string(&path).map_err(|e| VaultError::io(&path, e))?;
        let raw: RawMetadata = serde_json::from_str(&text).map_err(|e| VaultError::InvalidMetadata {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut shape_strings = BTreeMap::new();
        flatten("", raw.structure_shape, &mut shape_strings);
        let mut dtypes = BTreeMap::new();
        flatten("", raw.structure_dtype, &mut dtypes);

        let mut shapes = BTreeMap::new();
        for (name, text) in shape_strings {
            let shape = parse_shape(&text).ok_or_else(|| VaultError::InvalidMetadata {
                path: path.clone(),
                reason: format!("column '{name}' has unparseable shape '{text}'"),
            })?;
            match shape.split_first() {
                Some((1, rest)) if !rest.is_empty() => {
                    shapes.insert(name, rest.to_vec());
                }
                _ => {
                    return Err(VaultError::InvalidMetadata {
                        path: path.clone(),
                        reason: format!(
                            "column '{name}' shape '{text}' must be (1, T, ...) with a batch axis of 1"
                        ),
                    })
                }
            }
        }

        let version = raw.version.map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        Ok(Self {
            version,
            shapes,
            dtypes,
        })
    }
}

/// Parse a Python tuple literal like `(1, 100, 2, 8)` or `(3,)`.
pub fn parse_shape(text: &str) -> Option<Vec<usize>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// The canonical columns a conversion knows how to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Observations,
    Actions,
    Rewards,
    Terminals,
    Truncations,
    State,
}

impl ColumnRole {
    pub const ALL: [ColumnRole; 6] = [
        Self::Observations,
        Self::Actions,
        Self::Rewards,
        Self::Terminals,
        Self::Truncations,
        Self::State,
    ];

    /// Column name inside the store.
    pub fn store_name(&self) -> &'static str {
        match self {
            Self::Observations => "observations",
            Self::Actions => "actions",
            Self::Rewards => "rewards",
            Self::Terminals => "terminals",
            Self::Truncations => "truncations",
            Self::State => "infos/state",
        }
    }

    /// Array name inside a dense artifact.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::State => "states",
            other => other.store_name(),
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Self::Observations | Self::Actions | Self::Rewards)
    }
}

/// One resolved column.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub role: ColumnRole,
    pub dtype: DType,
    /// Shape in the store, `[T, ...]`.
    pub shape: Vec<usize>,
    /// Shape in the dense artifact (discrete actions gain a trailing 1).
    pub artifact_shape: Vec<usize>,
}

impl ColumnSpec {
    pub fn row_bytes(&self) -> usize {
        self.shape.iter().skip(1).product::<usize>() * self.dtype.size()
    }
}

/// Resolved shape information for one partition.
#[derive(Debug, Clone)]
pub struct Schema {
    pub n_agents: usize,
    pub n_timesteps: usize,
    pub obs_dim: usize,
    pub act_dim: usize,
    pub state_dim: Option<usize>,
    pub discrete_actions: bool,
    pub version: Option<String>,
    /// Present columns in [`ColumnRole::ALL`] order.
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn column(&self, role: ColumnRole) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.role == role)
    }

    pub fn has(&self, role: ColumnRole) -> bool {
        self.column(role).is_some()
    }

    /// Bytes one timestep occupies across all converted columns.
    pub fn per_step_bytes(&self) -> usize {
        self.columns.iter().map(ColumnSpec::row_bytes).sum()
    }
}

/// Derive and validate the schema of the partition behind `store`.
pub fn resolve<S: ColumnStore + ?Sized>(store: &S) -> Result<Schema> {
    let dir = store.path();
    let metadata = VaultMetadata::load(dir)?;
    let meta_path = dir.join(METADATA_FILE);

    let obs_shape = metadata
        .shapes
        .get(ColumnRole::Observations.store_name())
        .ok_or_else(|| VaultError::InvalidMetadata {
            path: meta_path.clone(),
            reason: "no 'observations' entry in structure_shape".into(),
        })?;
    let &[n_timesteps, n_agents, obs_dim] = obs_shape.as_slice() else {
        return Err(VaultError::InvalidMetadata {
            path: meta_path,
            reason: format!("observations shape {obs_shape:?} is not [T, agents, obs_dim]"),
        });
    };

    let mut columns = Vec::new();
    for role in ColumnRole::ALL {
        let name = role.store_name();
        let Some(declared) = metadata.shapes.get(name) else {
            if role.is_required() {
                return Err(VaultError::InvalidMetadata {
                    path: meta_path,
                    reason: format!("no '{name}' entry in structure_shape"),
                });
            }
            continue;
        };
        if declared[0] != n_timesteps {
            return Err(VaultError::SchemaMismatch {
                path: meta_path,
                column: name.to_string(),
                expected: n_timesteps,
                actual: declared[0],
            });
        }

        let layout = store.layout(name).ok_or_else(|| VaultError::ColumnNotFound {
            path: dir.to_path_buf(),
            column: name.to_string(),
        })?;
        if layout.timesteps() != n_timesteps {
            return Err(VaultError::SchemaMismatch {
                path: dir.to_path_buf(),
                column: name.to_string(),
                expected: n_timesteps,
                actual: layout.timesteps(),
            });
        }
        if layout.shape[1..] != declared[1..] {
            return Err(VaultError::ColumnLayoutMismatch {
                path: dir.to_path_buf(),
                column: name.to_string(),
                detail: format!(
                    "store shape {:?} disagrees with metadata shape {:?}",
                    layout.shape, declared
                ),
            });
        }
        if let Some(dtype_name) = metadata.dtypes.get(name) {
            if DType::parse(dtype_name) != Some(layout.dtype) {
                return Err(VaultError::ColumnLayoutMismatch {
                    path: dir.to_path_buf(),
                    column: name.to_string(),
                    detail: format!(
                        "store dtype {} disagrees with metadata dtype '{dtype_name}'",
                        layout.dtype
                    ),
                });
            }
        }

        let per_agent = matches!(
            role,
            ColumnRole::Actions | ColumnRole::Rewards | ColumnRole::Terminals | ColumnRole::Truncations
        );
        if per_agent && declared.get(1) != Some(&n_agents) {
            return Err(VaultError::ColumnLayoutMismatch {
                path: meta_path,
                column: name.to_string(),
                detail: format!("shape {declared:?} does not have {n_agents} agents on axis 1"),
            });
        }

        let artifact_shape = match (role, declared.len()) {
            (ColumnRole::Actions, 2) => vec![n_timesteps, n_agents, 1],
            _ => declared.clone(),
        };
        columns.push(ColumnSpec {
            role,
            dtype: layout.dtype,
            shape: declared.clone(),
            artifact_shape,
        });
    }

    let actions = columns
        .iter()
        .find(|c| c.role == ColumnRole::Actions)
        .ok_or_else(|| VaultError::ColumnNotFound {
            path: dir.to_path_buf(),
            column: "actions".into(),
        })?;
    let (act_dim, discrete_actions) = match actions.shape.len() {
        2 => (1, true),
        3 => (actions.shape[2], false),
        _ => {
            return Err(VaultError::ColumnLayoutMismatch {
                path: dir.to_path_buf(),
                column: "actions".into(),
                detail: format!("shape {:?} is neither [T, A] nor [T, A, act_dim]", actions.shape),
            })
        }
    };
    let state_dim = columns
        .iter()
        .find(|c| c.role == ColumnRole::State)
        .map(|c| c.shape.iter().skip(1).product());

    for extra in store
        .column_names()
        .into_iter()
        .filter(|n| ColumnRole::ALL.iter().all(|r| r.store_name() != *n))
    {
        debug!(column = extra, path = %dir.display(), "Ignoring non-canonical column");
    }

    Ok(Schema {
        n_agents,
        n_timesteps,
        obs_dim,
        act_dim,
        state_dim,
        discrete_actions,
        version: metadata.version,
        columns,
    })
}
