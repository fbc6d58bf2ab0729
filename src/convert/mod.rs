//! Vault-to-artifact conversion.
//!
//! - [`pipeline`] -- schema-gated, memory-bounded batch streaming.
//! - [`dense`] -- the `.npz` sink.
//! - [`records`] -- the bounded JSON sink.
//! - [`actions`] -- the episode-segmented action sink.
//!
//! [`convert_vault`], [`export_vault`] and [`export_actions`] run one pipeline per selected
//! quality partition. Partitions are independent: a failure is recorded in
//! the [`ConversionSummary`] and the remaining partitions still run.

pub mod actions;
pub mod dense;
pub mod pipeline;
pub mod records;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::artifact::{ArtifactInfo, JSON_EXTENSION, NPZ_EXTENSION};
use crate::catalog::{self, QualitySelection};
use crate::config::ConverterConfig;
use crate::error::{Result, VaultError};
use crate::vault::Vault;

pub use actions::{ActionsFormat, ActionsSink};
pub use dense::DenseSink;
pub use pipeline::{ArtifactLabels, ArtifactSink, BatchColumns, ConversionPipeline};
pub use records::RecordSink;

/// Which artifact a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Npz,
    Json,
    /// Episode-segmented actions, one or more files per partition.
    Actions,
}

impl ArtifactFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Npz => NPZ_EXTENSION,
            Self::Json => JSON_EXTENSION,
            Self::Actions => "actions",
        }
    }

    /// Output file name, or file stem for [`Self::Actions`].
    fn output_name(&self, vault: &Vault, quality: &str) -> String {
        match self {
            Self::Npz => vault.artifact_file_name(quality, NPZ_EXTENSION),
            Self::Json => vault.artifact_file_name(quality, JSON_EXTENSION),
            Self::Actions => vault.actions_file_stem(quality),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of converting one partition.
#[derive(Debug)]
pub struct PartitionOutcome {
    pub quality: String,
    /// Files written for the partition.
    pub result: std::result::Result<Vec<ArtifactInfo>, VaultError>,
}

impl PartitionOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-partition results of one invocation, in catalog order.
#[derive(Debug)]
pub struct ConversionSummary {
    pub vault: PathBuf,
    pub format: ArtifactFormat,
    pub outcomes: Vec<PartitionOutcome>,
}

impl ConversionSummary {
    /// Every file written, with the partition it came from.
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &ArtifactInfo)> {
        self.outcomes.iter().flat_map(|o| {
            o.result
                .iter()
                .flatten()
                .map(move |info| (o.quality.as_str(), info))
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &VaultError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.quality.as_str(), e)))
    }

    /// True when every selected partition converted.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(PartitionOutcome::is_success)
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Convert the selected partitions to `.npz` artifacts in `output_dir`.
pub fn convert_vault(
    vault: &Vault,
    selection: &QualitySelection,
    output_dir: &Path,
    config: &ConverterConfig,
) -> Result<ConversionSummary> {
    run_selected(vault, selection, output_dir, ArtifactFormat::Npz, config)
}

/// Export the selected partitions as bounded JSON documents in `output_dir`.
pub fn export_vault(
    vault: &Vault,
    selection: &QualitySelection,
    output_dir: &Path,
    config: &ConverterConfig,
) -> Result<ConversionSummary> {
    run_selected(vault, selection, output_dir, ArtifactFormat::Json, config)
}

/// Export the selected partitions' actions, segmented into episodes, in the
/// formats listed in `config.actions`.
pub fn export_actions(
    vault: &Vault,
    selection: &QualitySelection,
    output_dir: &Path,
    config: &ConverterConfig,
) -> Result<ConversionSummary> {
    run_selected(vault, selection, output_dir, ArtifactFormat::Actions, config)
}

/// Catalog, selection and name-collision errors abort the whole run; anything
/// after that is scoped to its partition.
fn run_selected(
    vault: &Vault,
    selection: &QualitySelection,
    output_dir: &Path,
    format: ArtifactFormat,
    config: &ConverterConfig,
) -> Result<ConversionSummary> {
    let catalog = vault.catalog()?;
    let qualities = catalog::select(&catalog, selection)?;

    let targets: Vec<(String, String)> = qualities
        .iter()
        .map(|q| (q.clone(), format.output_name(vault, q)))
        .collect();
    catalog::check_output_names(output_dir, &targets)?;
    std::fs::create_dir_all(output_dir).map_err(|e| VaultError::io(output_dir, e))?;

    info!(
        vault = %vault.path().display(),
        partitions = targets.len(),
        format = format.name(),
        "Starting conversion"
    );

    let mut outcomes = Vec::with_capacity(targets.len());
    for (quality, file_name) in targets {
        let result = convert_partition(vault, &quality, output_dir, &file_name, format, config);
        match &result {
            Ok(artifacts) => {
                for artifact in artifacts {
                    info!(
                        %quality,
                        path = %artifact.path.display(),
                        bytes = artifact.bytes,
                        timesteps = artifact.timesteps,
                        "Partition converted"
                    );
                }
            }
            Err(e) => warn!(%quality, error = %e, "Partition failed"),
        }
        outcomes.push(PartitionOutcome { quality, result });
    }

    Ok(ConversionSummary {
        vault: vault.path().to_path_buf(),
        format,
        outcomes,
    })
}

fn convert_partition(
    vault: &Vault,
    quality: &str,
    output_dir: &Path,
    name: &str,
    format: ArtifactFormat,
    config: &ConverterConfig,
) -> Result<Vec<ArtifactInfo>> {
    let target = output_dir.join(name);
    let store = vault.open_partition(quality)?;
    let pipeline = ConversionPipeline::new(&store, quality, config.conversion.memory_budget_bytes)?;
    let labels = ArtifactLabels {
        env: vault.env_name().to_string(),
        scenario: vault.scenario().to_string(),
        quality: quality.to_string(),
        source: vault.partition_path(quality),
    };
    match format {
        ArtifactFormat::Npz => pipeline.run(DenseSink::new(&target, pipeline.schema(), labels)).map(|a| vec![a]),
        ArtifactFormat::Json => pipeline
            .run(RecordSink::new(
                &target,
                pipeline.schema(),
                labels,
                config.export.max_timesteps,
                config.export.pretty,
            ))
            .map(|a| vec![a]),
        ArtifactFormat::Actions => {
            let sink = ActionsSink::new(
                output_dir,
                name,
                pipeline.schema(),
                &labels.source,
                &config.actions.formats,
                config.actions.max_text_episodes,
            )?;
            pipeline.run(sink)
        }
    }
}
