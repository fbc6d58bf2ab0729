//! Replay verification of finished artifacts.
//!
//! The verifier resets an environment, steps it with the stored joint
//! actions and compares what the environment returns against the stored
//! data: the environment's reward with `rew[t]` and its next observation
//! with `obs[t + 1]`. The environment is closed on every exit path.

pub mod checks;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::env::ReplayEnvironment;
use crate::error::{Result, VaultError};
use crate::trajectory::ReplayData;

pub use checks::{check_consistency, ConsistencyCheck, ConsistencyReport, ValueRange};

/// Knobs for one replay.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    /// Timesteps to replay at most.
    pub steps: usize,
    /// Largest acceptable mean absolute error.
    pub tolerance: f64,
    pub seed: u64,
}

/// Outcome of a replay that stayed within tolerance.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub steps_replayed: usize,
    /// Steps where a stored next observation existed to compare against.
    pub observations_compared: usize,
    pub obs_error: f64,
    pub reward_error: f64,
    pub stored_mean_reward: f64,
    pub env_mean_reward: f64,
    /// The environment ended the episode before `steps` were replayed.
    pub ended_early: bool,
    pub tolerance: f64,
}

pub struct ReplayVerifier<'a> {
    data: &'a ReplayData,
    options: VerifyOptions,
}

impl<'a> ReplayVerifier<'a> {
    pub fn new(data: &'a ReplayData, options: VerifyOptions) -> Self {
        Self { data, options }
    }

    /// Replay against `env`, then close it.
    ///
    /// Fails with [`VaultError::ReplayMismatch`] when either mean error
    /// exceeds the tolerance.
    pub async fn verify<E: ReplayEnvironment>(&self, env: &mut E) -> Result<VerificationReport> {
        let outcome = self.replay(env).await;
        let closed = env.close().await;

        let report = match (outcome, closed) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(e)) => return Err(VaultError::Environment(e.context("failed to close environment"))),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "Failed to close environment after replay error");
                }
                return Err(e);
            }
        };

        info!(
            artifact = %self.data.path.display(),
            steps = report.steps_replayed,
            obs_error = report.obs_error,
            reward_error = report.reward_error,
            "Replay finished"
        );
        if report.obs_error > self.options.tolerance || report.reward_error > self.options.tolerance {
            return Err(VaultError::ReplayMismatch {
                path: self.data.path.clone(),
                obs_error: report.obs_error,
                reward_error: report.reward_error,
                steps: report.steps_replayed,
                tolerance: self.options.tolerance,
            });
        }
        Ok(report)
    }

    async fn replay<E: ReplayEnvironment>(&self, env: &mut E) -> Result<VerificationReport> {
        let data = self.data;
        let steps = self.options.steps.min(data.len());
        if steps == 0 {
            return Err(VaultError::InvalidArtifact {
                path: data.path.clone(),
                reason: "artifact holds no timesteps to replay".into(),
            });
        }

        let initial = env.reset(self.options.seed).await?;
        if initial.len() != data.n_agents {
            return Err(VaultError::Environment(anyhow::anyhow!(
                "environment reset returned {} agents, artifact has {}",
                initial.len(),
                data.n_agents
            )));
        }

        let mut obs_error_sum = 0.0;
        let mut observations_compared = 0;
        let mut reward_error_sum = 0.0;
        let mut stored_reward_sum = 0.0;
        let mut env_reward_sum = 0.0;
        let mut replayed = 0;
        let mut ended_early = false;

        for t in 0..steps {
            let step = env.step(&data.actions[t]).await?;
            replayed += 1;

            let stored = &data.rewards[t];
            reward_error_sum += if step.rewards.len() == stored.len() {
                mean_abs_diff(step.rewards.iter(), stored.iter())
            } else {
                (step.mean_reward() - mean(stored)).abs()
            };
            stored_reward_sum += mean(stored);
            env_reward_sum += step.mean_reward();

            if let Some(expected) = data.observations.get(t + 1) {
                if step.observations.len() != expected.len()
                    || step.observations.iter().zip(expected).any(|(a, b)| a.len() != b.len())
                {
                    return Err(VaultError::Environment(anyhow::anyhow!(
                        "environment observation shape differs from the artifact at step {t}"
                    )));
                }
                obs_error_sum += mean_abs_diff(
                    step.observations.iter().flatten(),
                    expected.iter().flatten(),
                );
                observations_compared += 1;
            }

            debug!(t, reward = step.mean_reward(), done = step.is_done(), "Replayed step");
            if step.is_done() {
                ended_early = t + 1 < steps;
                if ended_early {
                    warn!(t, "Episode ended before the requested replay length");
                }
                break;
            }
        }

        let n = replayed as f64;
        Ok(VerificationReport {
            steps_replayed: replayed,
            observations_compared,
            obs_error: if observations_compared == 0 {
                0.0
            } else {
                obs_error_sum / observations_compared as f64
            },
            reward_error: reward_error_sum / n,
            stored_mean_reward: stored_reward_sum / n,
            env_mean_reward: env_reward_sum / n,
            ended_early,
            tolerance: self.options.tolerance,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn mean_abs_diff<'a>(a: impl Iterator<Item = &'a f64>, b: impl Iterator<Item = &'a f64>) -> f64 {
    let (sum, count) = a
        .zip(b)
        .fold((0.0, 0usize), |(s, n), (x, y)| (s + (x - y).abs(), n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvStep, RecordedReplayEnv};
    use crate::trajectory::ArtifactKind;
    use std::path::PathBuf;

    fn data(steps: usize) -> ReplayData {
        ReplayData {
            path: PathBuf::from("s_Good.npz"),
            kind: ArtifactKind::Npz,
            env: "mamujoco".into(),
            scenario: "s".into(),
            quality: "Good".into(),
            n_agents: 2,
            obs_dim: 2,
            act_dim: 1,
            source_timesteps: steps,
            declared_timesteps: steps,
            stored_timesteps: steps,
            discrete_actions: false,
            observations: (0..steps)
                .map(|t| vec![vec![t as f64, 1.0], vec![0.0, -(t as f64)]])
                .collect(),
            actions: vec![vec![vec![0.1], vec![-0.1]]; steps],
            rewards: (0..steps).map(|t| vec![t as f64 * 0.01, 0.5]).collect(),
            states: None,
        }
    }

    fn options(steps: usize) -> VerifyOptions {
        VerifyOptions {
            steps,
            tolerance: 0.05,
            seed: 42,
        }
    }

    /// Fails every step and records whether it was closed.
    struct FailingEnv {
        closed: bool,
    }

    impl ReplayEnvironment for FailingEnv {
        async fn reset(&mut self, _seed: u64) -> anyhow::Result<Vec<Vec<f64>>> {
            Ok(vec![vec![0.0, 0.0]; 2])
        }
        async fn step(&mut self, _actions: &[Vec<f64>]) -> anyhow::Result<EnvStep> {
            anyhow::bail!("simulator crashed")
        }
        async fn close(&mut self) -> anyhow::Result<()> {
            self.closed = true;
            Ok(())
        }
        fn is_done(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn self_replay_has_zero_error() {
        let data = data(20);
        let mut env = RecordedReplayEnv::new(&data, 1000);
        let report = ReplayVerifier::new(&data, options(10)).verify(&mut env).await.unwrap();
        assert_eq!(report.steps_replayed, 10);
        assert_eq!(report.observations_compared, 10);
        assert_eq!(report.obs_error, 0.0);
        assert_eq!(report.reward_error, 0.0);
        assert!(!report.ended_early);
        assert!(env.is_closed());
    }

    #[tokio::test]
    async fn replay_past_the_end_stops_at_episode_end() {
        let data = data(5);
        let mut env = RecordedReplayEnv::new(&data, 1000);
        let report = ReplayVerifier::new(&data, options(100)).verify(&mut env).await.unwrap();
        assert_eq!(report.steps_replayed, 5);
        assert_eq!(report.observations_compared, 4);
        assert!(!report.ended_early);
    }

    #[tokio::test]
    async fn early_episode_end_is_flagged() {
        let data = data(20);
        let mut env = RecordedReplayEnv::new(&data, 3);
        let report = ReplayVerifier::new(&data, options(10)).verify(&mut env).await.unwrap();
        assert_eq!(report.steps_replayed, 3);
        assert!(report.ended_early);
    }

    #[tokio::test]
    async fn divergence_beyond_tolerance_is_a_mismatch() {
        let data = data(20);
        let mut env = RecordedReplayEnv::new(&data, 1000).with_offsets(0.0, 0.2);
        let err = ReplayVerifier::new(&data, options(10))
            .verify(&mut env)
            .await
            .unwrap_err();
        match err {
            VaultError::ReplayMismatch {
                reward_error,
                obs_error,
                steps,
                ..
            } => {
                assert!((reward_error - 0.2).abs() < 1e-9);
                assert_eq!(obs_error, 0.0);
                assert_eq!(steps, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(env.is_closed());
    }

    #[tokio::test]
    async fn environment_failure_still_closes() {
        let data = data(5);
        let mut env = FailingEnv { closed: false };
        let err = ReplayVerifier::new(&data, options(5)).verify(&mut env).await.unwrap_err();
        assert!(matches!(err, VaultError::Environment(_)), "{err}");
        assert!(env.closed);
    }

    #[tokio::test]
    async fn empty_artifact_is_invalid() {
        let data = data(0);
        let mut env = RecordedReplayEnv::new(&data, 10);
        let err = ReplayVerifier::new(&data, options(10)).verify(&mut env).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidArtifact { .. }), "{err}");
        assert!(env.is_closed());
    }
}
