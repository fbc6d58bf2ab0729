//! Synthetic on-disk vaults for tests.
//!
//! Values are pure functions of `(timestep, element)` so tests can check any
//! slice without keeping the source arrays around.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::json;

use super::array::DType;
use super::manifest::{ChunkRef, ColumnEntry, Manifest, DATA_DIR, MANIFEST_FILE, MANIFEST_VERSION};
use crate::schema::METADATA_FILE;

/// A `<scenario>.vlt` directory under a temp root.
pub struct VaultFixture {
    root: PathBuf,
}

impl VaultFixture {
    pub fn new(parent: &Path, scenario: &str) -> Self {
        let root = parent.join(format!("{scenario}.vlt"));
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write one quality partition and return its directory.
    pub fn add_partition(&self, quality: &str, spec: &PartitionFixture) -> PathBuf {
        let dir = self.root.join(quality);
        spec.write(&dir);
        dir
    }

    /// Replace a partition's manifest with unparseable bytes.
    pub fn corrupt_manifest(&self, quality: &str) {
        std::fs::write(self.root.join(quality).join(MANIFEST_FILE), b"{\"version\": 1, \"columns\": [").unwrap();
    }
}

/// Shape and layout of one synthetic partition.
#[derive(Debug, Clone)]
pub struct PartitionFixture {
    pub timesteps: usize,
    pub agents: usize,
    pub obs_dim: usize,
    pub act_dim: usize,
    pub state_dim: Option<usize>,
    pub chunk_timesteps: usize,
    pub discrete: bool,
    overrides: BTreeMap<String, usize>,
    manifest_overrides: BTreeMap<String, usize>,
    pokes: Vec<(String, usize, f64)>,
}

impl PartitionFixture {
    pub fn new(timesteps: usize, agents: usize, obs_dim: usize, act_dim: usize) -> Self {
        Self {
            timesteps,
            agents,
            obs_dim,
            act_dim,
            state_dim: Some(4),
            chunk_timesteps: 16,
            discrete: false,
            overrides: BTreeMap::new(),
            manifest_overrides: BTreeMap::new(),
            pokes: Vec::new(),
        }
    }

    pub fn chunk_timesteps(mut self, n: usize) -> Self {
        self.chunk_timesteps = n.max(1);
        self
    }

    pub fn without_state(mut self) -> Self {
        self.state_dim = None;
        self
    }

    pub fn discrete_actions(mut self) -> Self {
        self.discrete = true;
        self
    }

    /// Give `column` a different time length (in both metadata and manifest).
    pub fn column_timesteps(mut self, column: &str, n: usize) -> Self {
        self.overrides.insert(column.to_string(), n);
        self
    }

    /// Give `column` a different time length in the manifest only; metadata
    /// keeps the partition's length.
    pub fn manifest_timesteps(mut self, column: &str, n: usize) -> Self {
        self.manifest_overrides.insert(column.to_string(), n);
        self
    }

    /// Overwrite the first element of row `t` of `column` with `value`.
    pub fn with_value(mut self, column: &str, t: usize, value: f64) -> Self {
        self.pokes.push((column.to_string(), t, value));
        self
    }

    fn poked(&self, column: &str, t: usize, i: usize) -> Option<f64> {
        self.pokes
            .iter()
            .find(|(c, pt, _)| i == 0 && *pt == t && c == column)
            .map(|&(_, _, v)| v)
    }

    pub fn observation_value(t: usize, i: usize) -> f32 {
        t as f32 * 0.5 + i as f32 * 0.01
    }

    pub fn action_value(t: usize, i: usize) -> f32 {
        ((t + i) % 7) as f32 / 7.0 - 0.5
    }

    pub fn reward_value(t: usize, agent: usize) -> f32 {
        (t % 10) as f32 * 0.1 + agent as f32 * 0.01
    }

    pub fn state_value(t: usize, i: usize) -> f32 {
        t as f32 + i as f32 * 0.001
    }

    fn columns(&self) -> Vec<(String, DType, Vec<usize>, Gen)> {
        let t = self.timesteps;
        let a = self.agents;
        let mut cols = vec![
            (
                "observations".to_string(),
                DType::Float32,
                vec![t, a, self.obs_dim],
                Gen::Observation,
            ),
            ("rewards".to_string(), DType::Float32, vec![t, a], Gen::Reward),
            ("terminals".to_string(), DType::Float32, vec![t, a], Gen::Terminal),
            ("truncations".to_string(), DType::Float32, vec![t, a], Gen::Zero),
        ];
        if self.discrete {
            cols.push(("actions".to_string(), DType::Int32, vec![t, a], Gen::DiscreteAction));
        } else {
            cols.push((
                "actions".to_string(),
                DType::Float32,
                vec![t, a, self.act_dim],
                Gen::Action,
            ));
        }
        if let Some(sd) = self.state_dim {
            cols.push(("infos/state".to_string(), DType::Float32, vec![t, sd], Gen::State));
        }
        for (name, _, shape, _) in cols.iter_mut() {
            if let Some(&n) = self.overrides.get(name.as_str()) {
                shape[0] = n;
            }
        }
        cols
    }

    fn write(&self, dir: &Path) {
        std::fs::create_dir_all(dir.join(DATA_DIR)).unwrap();

        let mut shapes = serde_json::Map::new();
        let mut dtypes = serde_json::Map::new();
        let mut infos_shapes = serde_json::Map::new();
        let mut infos_dtypes = serde_json::Map::new();
        let mut entries = BTreeMap::new();

        for (name, dtype, mut shape, values) in self.columns() {
            let shape_str = format!(
                "(1, {})",
                shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            );
            match name.strip_prefix("infos/") {
                Some(sub) => {
                    infos_shapes.insert(sub.to_string(), json!(shape_str));
                    infos_dtypes.insert(sub.to_string(), json!(dtype.name()));
                }
                None => {
                    shapes.insert(name.clone(), json!(shape_str));
                    dtypes.insert(name.clone(), json!(dtype.name()));
                }
            }

            if let Some(&n) = self.manifest_overrides.get(name.as_str()) {
                shape[0] = n;
            }
            let row_elems: usize = shape.iter().skip(1).product();
            let file_stem = name.replace('/', ".");
            let mut chunks = Vec::new();
            let mut start = 0;
            while start < shape[0] {
                let end = (start + self.chunk_timesteps).min(shape[0]);
                let file = format!("{DATA_DIR}/{file_stem}.{}", chunks.len());
                let mut bytes = Vec::new();
                for t in start..end {
                    for i in 0..row_elems {
                        let v = self.poked(&name, t, i).unwrap_or_else(|| values.value(t, i));
                        encode(dtype, v, &mut bytes);
                    }
                }
                std::fs::write(dir.join(&file), bytes).unwrap();
                chunks.push(ChunkRef { start, end, file });
                start = end;
            }
            entries.insert(
                name,
                ColumnEntry {
                    dtype: dtype.name().to_string(),
                    shape,
                    chunks,
                },
            );
        }

        if !infos_shapes.is_empty() {
            shapes.insert("infos".into(), serde_json::Value::Object(infos_shapes));
            dtypes.insert("infos".into(), serde_json::Value::Object(infos_dtypes));
        }
        let metadata = json!({
            "version": "0.1.2",
            "structure_shape": shapes,
            "structure_dtype": dtypes,
        });
        std::fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata).unwrap(),
        )
        .unwrap();

        let manifest = Manifest {
            version: MANIFEST_VERSION,
            columns: entries,
        };
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
    }
}

#[derive(Debug, Clone, Copy)]
enum Gen {
    Observation,
    Action,
    DiscreteAction,
    Reward,
    Terminal,
    Zero,
    State,
}

impl Gen {
    fn value(self, t: usize, i: usize) -> f64 {
        match self {
            Self::Observation => PartitionFixture::observation_value(t, i) as f64,
            Self::Action => PartitionFixture::action_value(t, i) as f64,
            Self::DiscreteAction => ((t + i) % 5) as f64,
            Self::Reward => PartitionFixture::reward_value(t, i) as f64,
            Self::Terminal => {
                if t % 10 == 9 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Zero => 0.0,
            Self::State => PartitionFixture::state_value(t, i) as f64,
        }
    }
}

fn encode(dtype: DType, v: f64, out: &mut Vec<u8>) {
    match dtype {
        DType::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
        DType::Float64 => out.extend_from_slice(&v.to_le_bytes()),
        DType::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
        DType::Int64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
        DType::Uint8 => out.push(v as u8),
        DType::Bool => out.push(u8::from(v != 0.0)),
    }
}
