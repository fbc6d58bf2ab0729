//! Batch-by-batch streaming from a column store into an artifact sink.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{Result, VaultError};
use crate::planner::{self, Batch};
use crate::schema::{self, ColumnRole, ColumnSpec, Schema};
use crate::store::{ColumnArray, ColumnStore};

// ---------------------------------------------------------------------------
// Batch payload
// ---------------------------------------------------------------------------

/// The resolved columns a sink asked for, read over one batch range.
#[derive(Debug)]
pub struct BatchColumns {
    pub batch: Batch,
    /// In [`ColumnRole::ALL`] order, present columns only.
    pub columns: Vec<(ColumnRole, ColumnArray)>,
}

impl BatchColumns {
    pub fn get(&self, role: ColumnRole) -> Option<&ColumnArray> {
        self.columns.iter().find(|(r, _)| *r == role).map(|(_, a)| a)
    }
}

/// Labels written into an artifact alongside the data.
#[derive(Debug, Clone)]
pub struct ArtifactLabels {
    pub env: String,
    pub scenario: String,
    pub quality: String,
    /// Partition directory the data came from.
    pub source: PathBuf,
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Destination of a conversion run.
pub trait ArtifactSink {
    type Output;

    /// Timesteps the sink still wants, or `None` when unbounded.
    ///
    /// A sink reporting `Some(0)` ends the run before the next read.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Whether the sink needs `role` at all. Unwanted columns are never read.
    fn wants(&self, _role: ColumnRole) -> bool {
        true
    }

    /// Take one batch. Batches arrive in ascending order, but sinks place
    /// data by `batch.start` and must not rely on arrival order.
    fn accept(&mut self, batch: &BatchColumns) -> Result<()>;

    /// Write the artifact.
    fn finish(self) -> Result<Self::Output>;
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Converts one quality partition.
pub struct ConversionPipeline<'a, S: ColumnStore + ?Sized> {
    store: &'a S,
    schema: Schema,
    quality: String,
    memory_budget_bytes: usize,
}

impl<'a, S: ColumnStore + ?Sized> ConversionPipeline<'a, S> {
    /// Resolve the partition schema. Nothing is read from the column data
    /// until [`run`](Self::run).
    pub fn new(store: &'a S, quality: &str, memory_budget_bytes: usize) -> Result<Self> {
        let schema = schema::resolve(store)?;
        Ok(Self {
            store,
            schema,
            quality: quality.to_string(),
            memory_budget_bytes,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Stream every planned batch into `sink`, then finish it.
    ///
    /// A read or sink failure aborts the run with [`VaultError::Conversion`];
    /// the sink is dropped unfinished, so no artifact is produced.
    pub fn run<K: ArtifactSink>(&self, mut sink: K) -> Result<K::Output> {
        let selected: Vec<&ColumnSpec> = self.schema.columns.iter().filter(|c| sink.wants(c.role)).collect();
        let per_step_bytes = selected.iter().map(|c| c.row_bytes()).sum::<usize>();
        let batches = planner::plan(self.schema.n_timesteps, per_step_bytes, self.memory_budget_bytes);
        info!(
            quality = %self.quality,
            timesteps = self.schema.n_timesteps,
            agents = self.schema.n_agents,
            columns = selected.len(),
            batches = batches.len(),
            "Converting partition"
        );

        for planned in batches {
            let batch = match sink.capacity() {
                Some(0) => {
                    debug!(quality = %self.quality, at = planned.start, "Sink is full, stopping early");
                    break;
                }
                Some(remaining) => planned.truncate(remaining),
                None => planned,
            };
            let wrap = |source: VaultError| VaultError::Conversion {
                quality: self.quality.clone(),
                batch,
                source: Box::new(source),
            };
            let columns = self.read_batch(&selected, batch).map_err(wrap)?;
            sink.accept(&columns).map_err(wrap)?;
            debug!(quality = %self.quality, %batch, "Batch converted");
        }

        sink.finish()
    }

    fn read_batch(&self, selected: &[&ColumnSpec], batch: Batch) -> Result<BatchColumns> {
        let columns = selected
            .iter()
            .map(|spec| {
                self.store
                    .read(spec.role.store_name(), batch.start, batch.end)
                    .map(|array| (spec.role, array))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BatchColumns { batch, columns })
    }
}
