//! Simulator server reached over HTTP.
//!
//! The server hosts the actual physics environment (e.g. a MAMuJoCo scenario
//! behind a small Python shim) and exposes three endpoints:
//! - `POST {base_url}/reset` -- body: [`EnvSpec`]; returns `{"observations": [[..]]}`
//! - `POST {base_url}/step`  -- body: `{"actions": [[..]]}`; returns [`EnvStep`]
//! - `POST {base_url}/close` -- body: `{}`

use anyhow::{Context, Result};
use serde::Deserialize;

use super::traits::{EnvSpec, EnvStep, ReplayEnvironment};

#[derive(Debug)]
pub struct HttpReplayEnv {
    /// Base URL of the simulator server (e.g. `http://localhost:5000`).
    base_url: String,
    http: reqwest::Client,
    spec: EnvSpec,
    current_step: usize,
    done: bool,
    open: bool,
}

#[derive(Debug, Deserialize)]
struct ResetResponse {
    observations: Vec<Vec<f64>>,
}

impl HttpReplayEnv {
    pub fn new(base_url: &str, spec: EnvSpec) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            spec,
            current_step: 0,
            done: false,
            open: false,
        }
    }
}

impl ReplayEnvironment for HttpReplayEnv {
    async fn reset(&mut self, seed: u64) -> Result<Vec<Vec<f64>>> {
        self.current_step = 0;
        self.done = false;
        self.spec.seed = seed;
        self.open = true;

        let resp: ResetResponse = self
            .http
            .post(format!("{}/reset", self.base_url))
            .json(&self.spec)
            .send()
            .await
            .context("failed to reach simulator server on reset")?
            .error_for_status()
            .context("simulator server rejected reset")?
            .json()
            .await
            .context("failed to parse simulator reset response")?;

        tracing::debug!(
            scenario = %self.spec.scenario,
            seed,
            agents = resp.observations.len(),
            "Simulator env reset"
        );
        Ok(resp.observations)
    }

    async fn step(&mut self, actions: &[Vec<f64>]) -> Result<EnvStep> {
        if self.done {
            anyhow::bail!("cannot step in a terminated episode");
        }
        self.current_step += 1;

        let body = serde_json::json!({ "actions": actions });
        let mut resp: EnvStep = self
            .http
            .post(format!("{}/step", self.base_url))
            .json(&body)
            .send()
            .await
            .context("failed to reach simulator server on step")?
            .error_for_status()
            .context("simulator server rejected step")?
            .json()
            .await
            .context("failed to parse simulator step response")?;

        if self.current_step >= self.spec.max_episode_steps {
            resp.truncated = true;
        }
        self.done = resp.is_done();
        Ok(resp)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.http
            .post(format!("{}/close", self.base_url))
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("failed to reach simulator server on close")?
            .error_for_status()
            .context("simulator server rejected close")?;
        tracing::debug!(scenario = %self.spec.scenario, "Simulator env closed");
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
