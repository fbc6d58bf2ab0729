//! vault-convert: chunked trajectory vaults to NumPy / JSON artifacts
//!
//! Provides subcommands for each stage:
//!
//! - `convert`     -- Dense `.npz` artifacts, one per quality partition
//! - `export-json` -- Bounded per-timestep JSON documents
//! - `export-actions` -- Episode-segmented actions as JSON / CSV / text
//! - `inspect`     -- Catalog and schema of a vault
//! - `verify`      -- Replay an artifact against a simulator

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use vault_convert::catalog::QualitySelection;
use vault_convert::config::ConverterConfig;
use vault_convert::convert::{self, ActionsFormat, ConversionSummary};
use vault_convert::env::{AnyReplayEnv, EnvSpec, HttpReplayEnv, RecordedReplayEnv};
use vault_convert::inspect;
use vault_convert::trajectory::ReplayData;
use vault_convert::vault::Vault;
use vault_convert::verify::{self, ReplayVerifier, VerifyOptions};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Convert multi-agent trajectory vaults into NumPy / JSON artifacts.
#[derive(Parser)]
#[command(name = "vault-convert", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment label written into artifacts (default: the vault's parent
    /// directory name).
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert quality partitions to dense `.npz` artifacts.
    Convert {
        /// Path to the `<scenario>.vlt` directory.
        vault: PathBuf,

        /// Directory the artifacts are written to.
        output_dir: PathBuf,

        /// Quality partition to convert (default: the first available).
        #[arg(long, conflicts_with = "all_qualities")]
        quality: Option<String>,

        /// Convert every quality partition.
        #[arg(long)]
        all_qualities: bool,

        /// Override `conversion.memory_budget_bytes`.
        #[arg(long)]
        memory_budget: Option<usize>,
    },

    /// Print a vault's partitions and their schemas.
    Inspect {
        /// Path to the `<scenario>.vlt` directory.
        vault: PathBuf,

        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export the first timesteps of a partition as a JSON document.
    ExportJson {
        /// Path to the `<scenario>.vlt` directory.
        vault: PathBuf,

        /// Directory the document is written to.
        output_dir: PathBuf,

        /// Quality partition to export (default: the first available).
        #[arg(long)]
        quality: Option<String>,

        /// Maximum timesteps to export.
        #[arg(long)]
        max_timesteps: Option<usize>,

        /// Write compact JSON.
        #[arg(long)]
        compact: bool,
    },

    /// Export a partition's actions split into episodes at terminal steps.
    ExportActions {
        /// Path to the `<scenario>.vlt` directory.
        vault: PathBuf,

        /// Directory the files are written to.
        output_dir: PathBuf,

        /// Quality partition to export (default: the first available).
        #[arg(long, conflicts_with = "all_qualities")]
        quality: Option<String>,

        /// Export every quality partition.
        #[arg(long)]
        all_qualities: bool,

        /// Output format (default: `actions.formats` from the config).
        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// Episodes spelled out in the text summary.
        #[arg(long)]
        max_episodes: Option<usize>,
    },

    /// Replay an artifact against a simulator and compare the results.
    Verify {
        /// Path to a `.npz` or `.json` artifact.
        artifact: PathBuf,

        /// Number of steps to replay.
        steps: Option<usize>,

        /// Ask the simulator to render while replaying.
        #[arg(long)]
        render: bool,

        /// Replay against the artifact itself instead of a live simulator.
        #[arg(long)]
        mock: bool,

        /// Simulator server URL.
        #[arg(long)]
        env_url: Option<String>,

        /// Largest acceptable mean absolute error.
        #[arg(long)]
        tolerance: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
    Txt,
    All,
}

impl FormatArg {
    fn formats(self) -> Vec<ActionsFormat> {
        match self {
            Self::Json => vec![ActionsFormat::Json],
            Self::Csv => vec![ActionsFormat::Csv],
            Self::Txt => vec![ActionsFormat::Txt],
            Self::All => ActionsFormat::ALL.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load or create configuration.
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<ConverterConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => ConverterConfig::default(),
    };
    if cli.env.is_some() {
        config.env_name = cli.env.clone();
    }

    match cli.command {
        Commands::Convert {
            vault,
            output_dir,
            quality,
            all_qualities,
            memory_budget,
        } => {
            if let Some(budget) = memory_budget {
                config.conversion.memory_budget_bytes = budget;
            }
            let selection = QualitySelection::from_flags(quality, all_qualities);
            cmd_convert(&config, &vault, &output_dir, &selection)
        }
        Commands::Inspect { vault, json } => cmd_inspect(&config, &vault, json),
        Commands::ExportJson {
            vault,
            output_dir,
            quality,
            max_timesteps,
            compact,
        } => {
            if let Some(max) = max_timesteps {
                config.export.max_timesteps = max;
            }
            if compact {
                config.export.pretty = false;
            }
            let selection = QualitySelection::from_flags(quality, false);
            cmd_export_json(&config, &vault, &output_dir, &selection)
        }
        Commands::ExportActions {
            vault,
            output_dir,
            quality,
            all_qualities,
            format,
            max_episodes,
        } => {
            if let Some(format) = format {
                config.actions.formats = format.formats();
            }
            if let Some(max) = max_episodes {
                config.actions.max_text_episodes = max;
            }
            let selection = QualitySelection::from_flags(quality, all_qualities);
            cmd_export_actions(&config, &vault, &output_dir, &selection)
        }
        Commands::Verify {
            artifact,
            steps,
            render,
            mock,
            env_url,
            tolerance,
        } => {
            if let Some(steps) = steps {
                config.verify.steps = steps;
            }
            if let Some(url) = env_url {
                config.verify.env_url = url;
            }
            if let Some(tolerance) = tolerance {
                config.verify.tolerance = tolerance;
            }
            cmd_verify(&config, &artifact, render, mock).await
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_convert(
    config: &ConverterConfig,
    vault_path: &Path,
    output_dir: &Path,
    selection: &QualitySelection,
) -> Result<()> {
    let vault = Vault::open(vault_path, config.env_name.as_deref())?;
    tracing::info!(
        vault = %vault.path().display(),
        scenario = vault.scenario(),
        budget = config.conversion.memory_budget_bytes,
        "Converting vault to NPZ"
    );
    let summary = convert::convert_vault(&vault, selection, output_dir, config)?;
    report_summary(&summary)
}

fn cmd_export_json(
    config: &ConverterConfig,
    vault_path: &Path,
    output_dir: &Path,
    selection: &QualitySelection,
) -> Result<()> {
    let vault = Vault::open(vault_path, config.env_name.as_deref())?;
    tracing::info!(
        vault = %vault.path().display(),
        max_timesteps = config.export.max_timesteps,
        "Exporting vault to JSON"
    );
    let summary = convert::export_vault(&vault, selection, output_dir, config)?;
    report_summary(&summary)
}

fn cmd_export_actions(
    config: &ConverterConfig,
    vault_path: &Path,
    output_dir: &Path,
    selection: &QualitySelection,
) -> Result<()> {
    if config.actions.formats.is_empty() {
        bail!("No action export formats selected");
    }
    let vault = Vault::open(vault_path, config.env_name.as_deref())?;
    tracing::info!(
        vault = %vault.path().display(),
        formats = ?config.actions.formats,
        "Exporting vault actions"
    );
    let summary = convert::export_actions(&vault, selection, output_dir, config)?;
    report_summary(&summary)
}

fn report_summary(summary: &ConversionSummary) -> Result<()> {
    for (quality, artifact) in summary.succeeded() {
        println!(
            "  ok    {quality}: {} ({} timesteps, {:.2} MB)",
            artifact.path.display(),
            artifact.timesteps,
            artifact.bytes as f64 / (1024.0 * 1024.0)
        );
    }
    for (quality, error) in summary.failed() {
        println!("  FAIL  {quality}: {error}");
    }

    let failed = summary.failed().count();
    if failed > 0 {
        bail!(
            "{failed} of {} partitions failed for {}",
            summary.outcomes.len(),
            summary.vault.display()
        );
    }
    tracing::info!(partitions = summary.outcomes.len(), "All partitions converted");
    Ok(())
}

fn cmd_inspect(config: &ConverterConfig, vault_path: &Path, json: bool) -> Result<()> {
    let vault = Vault::open(vault_path, config.env_name.as_deref())?;
    let report = inspect::inspect(&vault)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Vault: {}", report.path.display());
    println!("  Scenario: {}", report.scenario);
    println!("  Environment: {}", report.env);
    println!(
        "  Partitions: {} ({} resolvable)",
        report.partitions.len(),
        report.healthy()
    );
    println!();

    for p in &report.partitions {
        println!("[{}]", p.quality);
        println!(
            "  metadata.json: {}  manifest.json: {}  data dir: {} ({} files)",
            yes_no(p.has_metadata),
            yes_no(p.has_manifest),
            yes_no(p.has_data_dir),
            p.data_files
        );
        if let Some(version) = &p.version {
            println!("  Version: {version}");
        }
        match (&p.schema, &p.error) {
            (Some(s), _) => {
                println!("  Timesteps: {}", s.timesteps);
                println!("  Agents: {}", s.agents);
                println!(
                    "  Obs dim: {}, Act dim: {}{}",
                    s.obs_dim,
                    s.act_dim,
                    if s.discrete_actions { " (discrete)" } else { "" }
                );
                match s.state_dim {
                    Some(d) => println!("  State dim: {d}"),
                    None => println!("  State: absent"),
                }
                for (column, dtype) in &s.dtypes {
                    println!("    {column}: {dtype}");
                }
                println!(
                    "  Size: {:.2} MB",
                    (s.bytes_per_step * s.timesteps) as f64 / (1024.0 * 1024.0)
                );
            }
            (None, Some(error)) => println!("  Error: {error}"),
            (None, None) => {}
        }
        println!();
    }
    Ok(())
}

async fn cmd_verify(config: &ConverterConfig, artifact: &Path, render: bool, mock: bool) -> Result<()> {
    // One extra row for the observation after the last replayed step.
    let data = ReplayData::load(artifact, config.verify.steps.saturating_add(1))?;

    println!("Artifact: {}", artifact.display());
    println!("  Environment: {}", data.env);
    println!("  Scenario: {}", data.scenario);
    println!("  Quality: {}", data.quality);
    println!("  Agents: {}", data.n_agents);
    println!(
        "  Timesteps: {} stored, {} in source ({} loaded)",
        data.stored_timesteps,
        data.source_timesteps,
        data.len()
    );
    println!("  Obs dim: {}, Act dim: {}", data.obs_dim, data.act_dim);
    println!();

    let consistency = verify::check_consistency(&data, config.verify.steps);
    println!("Data validation ({} steps sampled):", consistency.sampled_steps);
    for (label, range) in [
        ("Actions", consistency.actions),
        ("Observations", consistency.observations),
        ("Rewards", consistency.rewards),
    ] {
        if let Some(r) = range {
            println!("  {label}: min={:.3}, max={:.3}", r.min, r.max);
        }
    }
    for check in &consistency.checks {
        println!("  [{}] {}: {}", if check.passed { "ok" } else { "!!" }, check.name, check.detail);
    }
    println!(
        "  {}/{} checks passed",
        consistency.passed(),
        consistency.checks.len()
    );
    if !consistency.all_passed() {
        tracing::warn!(artifact = %artifact.display(), "Consistency checks reported issues");
    }
    println!();

    let mut env = create_env(config, &data, render, mock);
    let options = VerifyOptions {
        steps: config.verify.steps,
        tolerance: config.verify.tolerance,
        seed: config.verify.seed,
    };
    let report = ReplayVerifier::new(&data, options).verify(&mut env).await?;

    println!("Replay ({} steps):", report.steps_replayed);
    println!("  Mean observation error: {:.6}", report.obs_error);
    println!("  Mean reward error: {:.6}", report.reward_error);
    println!(
        "  Stored mean reward: {:.3}, environment mean reward: {:.3}",
        report.stored_mean_reward, report.env_mean_reward
    );
    if report.ended_early {
        println!("  Episode ended early");
    }
    println!("Verification PASSED (tolerance {})", report.tolerance);
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

// ---------------------------------------------------------------------------
// Environment construction
// ---------------------------------------------------------------------------

fn create_env(config: &ConverterConfig, data: &ReplayData, render: bool, mock: bool) -> AnyReplayEnv {
    if mock {
        tracing::info!("Using recorded replay environment");
        return AnyReplayEnv::Recorded(RecordedReplayEnv::new(data, config.verify.max_episode_steps));
    }
    tracing::info!(url = %config.verify.env_url, "Using live simulator environment");
    let spec = EnvSpec {
        env: config.env_name.clone().unwrap_or_else(|| data.env.clone()),
        scenario: data.scenario.clone(),
        seed: config.verify.seed,
        max_episode_steps: config.verify.max_episode_steps,
        render,
    };
    AnyReplayEnv::Http(HttpReplayEnv::new(&config.verify.env_url, spec))
}
