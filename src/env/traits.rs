//! Core replay-environment trait and shared types.
//!
//! Every simulator backend implements [`ReplayEnvironment`] so the replay
//! verifier can drive it uniformly with stored joint actions.

use serde::{Deserialize, Serialize};

/// Result of one joint step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvStep {
    /// Per-agent observations after the step, `[A][obs_dim]`.
    pub observations: Vec<Vec<f64>>,
    /// Per-agent rewards for the transition.
    pub rewards: Vec<f64>,
    #[serde(default)]
    pub terminated: bool,
    #[serde(default)]
    pub truncated: bool,
}

impl EnvStep {
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }

    /// Mean reward across agents.
    pub fn mean_reward(&self) -> f64 {
        if self.rewards.is_empty() {
            return 0.0;
        }
        self.rewards.iter().sum::<f64>() / self.rewards.len() as f64
    }
}

/// What the verifier asks a backend to instantiate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Environment family (e.g. "gymnasium_mamujoco").
    pub env: String,
    pub scenario: String,
    pub seed: u64,
    pub max_episode_steps: usize,
    /// Ask the simulator to render while stepping.
    pub render: bool,
}

/// The replay environment trait.
///
/// Implementations own their simulator instance; callers must invoke
/// [`close`](ReplayEnvironment::close) when done, including after errors.
#[allow(async_fn_in_trait)]
pub trait ReplayEnvironment: Send {
    /// Start a new episode and return the initial per-agent observations.
    async fn reset(&mut self, seed: u64) -> anyhow::Result<Vec<Vec<f64>>>;

    /// Apply one joint action (`[A][act_dim]`).
    async fn step(&mut self, actions: &[Vec<f64>]) -> anyhow::Result<EnvStep>;

    /// Release the simulator and any rendering resources. Idempotent.
    async fn close(&mut self) -> anyhow::Result<()>;

    /// Whether the current episode has ended.
    fn is_done(&self) -> bool;
}
