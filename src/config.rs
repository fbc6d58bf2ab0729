use serde::{Deserialize, Serialize};

use crate::convert::ActionsFormat;

/// Complete configuration for conversion, export and replay verification.
///
/// Every section has defaults, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Environment label written into artifacts. Derived from the vault's
    /// parent directory when unset.
    pub env_name: Option<String>,
    pub conversion: ConversionConfig,
    pub export: ExportConfig,
    pub actions: ActionsConfig,
    pub verify: VerifyConfig,
}

/// Dense conversion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Upper bound on bytes read per batch, across all columns (default: 256 MiB).
    pub memory_budget_bytes: usize,
}

/// Bounded-record export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Maximum records per document (default: 10000).
    pub max_timesteps: usize,
    /// Indent the JSON output (default: true).
    pub pretty: bool,
}

/// Episode-segmented action export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Files to write (default: json only).
    pub formats: Vec<ActionsFormat>,
    /// Episodes spelled out in the text summary (default: 10).
    pub max_text_episodes: usize,
}

/// Replay verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Timesteps to replay (default: 100).
    pub steps: usize,
    /// Largest acceptable mean absolute error (default: 0.05).
    pub tolerance: f64,
    /// Base URL of the simulator server.
    pub env_url: String,
    /// Seed passed to the environment reset (default: 42).
    pub seed: u64,
    /// Episode length cap honoured by the environment (default: 1000).
    pub max_episode_steps: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_timesteps: 10_000,
            pretty: true,
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            formats: vec![ActionsFormat::Json],
            max_text_episodes: 10,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            tolerance: 0.05,
            env_url: "http://localhost:5000".into(),
            seed: 42,
            max_episode_steps: 1000,
        }
    }
}
