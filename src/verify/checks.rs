//! Static consistency checks on loaded replay data.

use serde::Serialize;

use crate::trajectory::ReplayData;

/// Largest magnitude a continuous action may have.
pub const ACTION_LIMIT: f64 = 1.5;
/// Mean stored reward beyond which the data is considered implausible.
pub const REWARD_MAGNITUDE_LIMIT: f64 = 10.0;

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Observed min/max of a value family over the sampled steps.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    fn of<'a>(values: impl Iterator<Item = &'a f64>) -> Option<Self> {
        values.fold(None, |acc, &v| match acc {
            None => Some(Self { min: v, max: v }),
            Some(r) => Some(Self {
                min: r.min.min(v),
                max: r.max.max(v),
            }),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub sampled_steps: usize,
    pub observations: Option<ValueRange>,
    pub actions: Option<ValueRange>,
    pub rewards: Option<ValueRange>,
    pub checks: Vec<ConsistencyCheck>,
}

impl ConsistencyReport {
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// Inspect the first `sample_steps` timesteps, shapes over the loaded window,
/// and the artifact's stored count against its declared count.
pub fn check_consistency(data: &ReplayData, sample_steps: usize) -> ConsistencyReport {
    let sample = sample_steps.min(data.len());
    let obs = ValueRange::of(data.observations.iter().take(sample).flatten().flatten());
    let act = ValueRange::of(data.actions.iter().take(sample).flatten().flatten());
    let rew = ValueRange::of(data.rewards.iter().take(sample).flatten());

    let mut checks = Vec::with_capacity(5);

    let bad_shape = (0..data.len()).find_map(|t| {
        let obs_ok = data.observations[t].len() == data.n_agents
            && data.observations[t].iter().all(|o| o.len() == data.obs_dim);
        let act_ok = data.actions.get(t).is_some_and(|act| {
            act.len() == data.n_agents && act.iter().all(|a| a.len() == data.act_dim)
        });
        let rew_ok = data.rewards.get(t).is_some_and(|r| r.len() == data.n_agents);
        match (obs_ok, act_ok, rew_ok) {
            (false, _, _) => Some(format!("observation shape differs from [{}, {}] at step {t}", data.n_agents, data.obs_dim)),
            (_, false, _) => Some(format!("action shape differs from [{}, {}] at step {t}", data.n_agents, data.act_dim)),
            (_, _, false) => Some(format!("reward count differs from {} at step {t}", data.n_agents)),
            _ => None,
        }
    });
    checks.push(ConsistencyCheck {
        name: "shapes",
        passed: bad_shape.is_none(),
        detail: bad_shape.unwrap_or_else(|| "all shapes consistent".into()),
    });

    checks.push(match (data.discrete_actions, act) {
        (true, _) => ConsistencyCheck {
            name: "action_range",
            passed: true,
            detail: "discrete actions, range not checked".into(),
        },
        (false, Some(r)) => ConsistencyCheck {
            name: "action_range",
            passed: r.min >= -ACTION_LIMIT && r.max <= ACTION_LIMIT,
            detail: format!("actions in [{:.3}, {:.3}], limit +/-{ACTION_LIMIT}", r.min, r.max),
        },
        (false, None) => ConsistencyCheck {
            name: "action_range",
            passed: false,
            detail: "no actions to check".into(),
        },
    });

    checks.push(ConsistencyCheck {
        name: "state",
        passed: data.states.is_some(),
        detail: match &data.states {
            Some(s) => format!("state dimension {}", s.first().map_or(0, Vec::len)),
            None => "no state information in data".into(),
        },
    });

    let step_means: Vec<f64> = data
        .rewards
        .iter()
        .take(sample)
        .filter(|r| !r.is_empty())
        .map(|r| r.iter().sum::<f64>() / r.len() as f64)
        .collect();
    let mean_reward = if step_means.is_empty() {
        None
    } else {
        Some(step_means.iter().sum::<f64>() / step_means.len() as f64)
    };
    checks.push(ConsistencyCheck {
        name: "reward_magnitude",
        passed: mean_reward.is_some_and(|m| m.abs() < REWARD_MAGNITUDE_LIMIT),
        detail: match mean_reward {
            Some(m) => format!("mean stored reward {m:.3} over {sample} steps"),
            None => "no rewards to check".into(),
        },
    });

    checks.push(ConsistencyCheck {
        name: "count",
        passed: data.stored_timesteps == data.declared_timesteps,
        detail: format!(
            "{} stored timesteps, {} declared ({} in source)",
            data.stored_timesteps,
            data.declared_timesteps,
            data.source_timesteps
        ),
    });

    ConsistencyReport {
        sampled_steps: sample,
        observations: obs,
        actions: act,
        rewards: rew,
        checks,
    }
}
