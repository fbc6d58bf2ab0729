//! Offline environment that plays back an artifact's own trajectory.
//!
//! Stepping ignores the action and yields the stored next observation and
//! stored reward, so a replay against it measures only artifact
//! self-consistency. Used by `verify --mock` and by tests.

use anyhow::Result;

use super::traits::{EnvStep, ReplayEnvironment};
use crate::trajectory::ReplayData;

#[derive(Debug, Clone)]
pub struct RecordedReplayEnv {
    observations: Vec<Vec<Vec<f64>>>,
    rewards: Vec<Vec<f64>>,
    /// Index of the next step to play.
    cursor: usize,
    max_episode_steps: usize,
    obs_offset: f64,
    reward_offset: f64,
    done: bool,
    closed: bool,
}

impl RecordedReplayEnv {
    pub fn new(data: &ReplayData, max_episode_steps: usize) -> Self {
        Self {
            observations: data.observations.clone(),
            rewards: data.rewards.clone(),
            cursor: 0,
            max_episode_steps,
            obs_offset: 0.0,
            reward_offset: 0.0,
            done: false,
            closed: false,
        }
    }

    /// Add a constant to every emitted observation and reward value.
    pub fn with_offsets(mut self, obs_offset: f64, reward_offset: f64) -> Self {
        self.obs_offset = obs_offset;
        self.reward_offset = reward_offset;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn shifted(&self, obs: &[Vec<f64>]) -> Vec<Vec<f64>> {
        obs.iter()
            .map(|agent| agent.iter().map(|v| v + self.obs_offset).collect())
            .collect()
    }
}

impl ReplayEnvironment for RecordedReplayEnv {
    async fn reset(&mut self, _seed: u64) -> Result<Vec<Vec<f64>>> {
        self.cursor = 0;
        self.done = false;
        self.closed = false;
        let first = self
            .observations
            .first()
            .ok_or_else(|| anyhow::anyhow!("recorded trajectory is empty"))?;
        Ok(self.shifted(first))
    }

    async fn step(&mut self, _actions: &[Vec<f64>]) -> Result<EnvStep> {
        if self.done {
            anyhow::bail!("cannot step in a terminated episode");
        }
        let t = self.cursor;
        let rewards = self
            .rewards
            .get(t)
            .ok_or_else(|| anyhow::anyhow!("no recorded reward for step {t}"))?
            .iter()
            .map(|r| r + self.reward_offset)
            .collect();
        self.cursor += 1;

        // Past the last stored observation the episode is over; repeat the
        // final one.
        let next = self.observations.get(t + 1).or_else(|| self.observations.last());
        let observations = next.map(|o| self.shifted(o)).unwrap_or_default();
        let terminated = t + 1 >= self.observations.len();
        let truncated = self.cursor >= self.max_episode_steps;
        self.done = terminated || truncated;

        Ok(EnvStep {
            observations,
            rewards,
            terminated,
            truncated,
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
