//! Bounded-record sink: the first `max_timesteps` steps as a JSON document.

use std::path::{Path, PathBuf};

use super::pipeline::{ArtifactLabels, ArtifactSink, BatchColumns};
use crate::artifact::{records, ArtifactInfo};
use crate::error::{Result, VaultError};
use crate::schema::{ColumnRole, Schema};
use crate::trajectory::{BatchSlices, RecordBuffer, RecordDocument, RecordMetadata};

pub struct RecordSink {
    target: PathBuf,
    pretty: bool,
    metadata: RecordMetadata,
    buffer: RecordBuffer,
    source: PathBuf,
}

impl RecordSink {
    pub fn new(target: &Path, schema: &Schema, labels: ArtifactLabels, max_timesteps: usize, pretty: bool) -> Self {
        let metadata = RecordMetadata {
            env: labels.env,
            scenario: labels.scenario,
            quality: labels.quality,
            n_agents: schema.n_agents,
            n_timesteps: schema.n_timesteps,
            n_exported: 0,
            obs_dim: schema.obs_dim,
            act_dim: schema.act_dim,
        };
        Self {
            target: target.to_path_buf(),
            pretty,
            metadata,
            buffer: RecordBuffer::new(schema.n_agents, max_timesteps.min(schema.n_timesteps)),
            source: labels.source,
        }
    }
}

impl ArtifactSink for RecordSink {
    type Output = ArtifactInfo;

    fn capacity(&self) -> Option<usize> {
        Some(self.buffer.remaining())
    }

    fn accept(&mut self, batch: &BatchColumns) -> Result<()> {
        let required = |role: ColumnRole| {
            batch.get(role).ok_or_else(|| VaultError::ColumnNotFound {
                path: self.source.clone(),
                column: role.store_name().to_string(),
            })
        };
        let slices = BatchSlices {
            start: batch.batch.start,
            observations: required(ColumnRole::Observations)?,
            actions: required(ColumnRole::Actions)?,
            rewards: required(ColumnRole::Rewards)?,
            states: batch.get(ColumnRole::State),
        };

        // JSON has no NaN or infinity; refuse rather than write nulls.
        let rows = slices.observations.len().min(self.buffer.remaining());
        for (role, array) in &batch.columns {
            if let Some((row, value)) = array.first_non_finite().filter(|(row, _)| *row < rows) {
                return Err(VaultError::NonFiniteValue {
                    path: self.source.clone(),
                    column: role.store_name().to_string(),
                    t: batch.batch.start + row,
                    value,
                });
            }
        }
        self.buffer.push_batch(slices);
        Ok(())
    }

    fn finish(self) -> Result<ArtifactInfo> {
        let trajectories = self.buffer.into_records();
        let document = RecordDocument {
            metadata: RecordMetadata {
                n_exported: trajectories.len(),
                ..self.metadata
            },
            trajectories,
        };
        records::write(&self.target, &document, self.pretty)
    }
}
