//! Replay environment abstractions and concrete implementations.
//!
//! Every backend implements the [`ReplayEnvironment`] trait so that the
//! replay verifier can drive it uniformly.
//!
//! Included environments:
//! - **HTTP simulator** ([`http`]) -- a live physics simulator behind a small
//!   JSON server.
//! - **Recorded** ([`recorded`]) -- plays an artifact's own trajectory back,
//!   for offline self-checks and tests.

pub mod http;
pub mod recorded;
pub mod traits;

// Re-export the core trait and step type at the module level.
pub use http::HttpReplayEnv;
pub use recorded::RecordedReplayEnv;
pub use traits::{EnvSpec, EnvStep, ReplayEnvironment};

// ---------------------------------------------------------------------------
// AnyReplayEnv: enum dispatch wrapper for dynamic environment selection
// ---------------------------------------------------------------------------

/// An enum wrapper around all concrete environment types, enabling runtime
/// backend selection without `dyn` (which is incompatible with async trait
/// methods).
pub enum AnyReplayEnv {
    Http(HttpReplayEnv),
    Recorded(RecordedReplayEnv),
}

impl ReplayEnvironment for AnyReplayEnv {
    async fn reset(&mut self, seed: u64) -> anyhow::Result<Vec<Vec<f64>>> {
        match self {
            Self::Http(e) => e.reset(seed).await,
            Self::Recorded(e) => e.reset(seed).await,
        }
    }

    async fn step(&mut self, actions: &[Vec<f64>]) -> anyhow::Result<EnvStep> {
        match self {
            Self::Http(e) => e.step(actions).await,
            Self::Recorded(e) => e.step(actions).await,
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        match self {
            Self::Http(e) => e.close().await,
            Self::Recorded(e) => e.close().await,
        }
    }

    fn is_done(&self) -> bool {
        match self {
            Self::Http(e) => e.is_done(),
            Self::Recorded(e) => e.is_done(),
        }
    }
}
