//! Memory-bounded batch planning over the time axis.
//!
//! A conversion never reads more than one [`Batch`] worth of rows from the
//! column store at a time. The planner sizes batches so that one batch of
//! every column fits inside the configured memory budget, falling back to
//! single-timestep batches when even one row exceeds it.

use std::fmt;

/// A half-open time range `[start, end)` processed in one read/accumulate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Batch {
    pub start: usize,
    pub end: usize,
}

impl Batch {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "batch start {start} > end {end}");
        Self { start, end }
    }

    /// Number of timesteps covered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Shrink the batch so it covers at most `max_len` timesteps.
    pub fn truncate(self, max_len: usize) -> Self {
        Self::new(self.start, self.end.min(self.start + max_len))
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Number of timesteps per batch for the given row width and budget.
///
/// Always at least 1: a row wider than the budget still gets processed, one
/// timestep at a time. A zero-width row puts everything in one batch.
pub fn batch_len(total_timesteps: usize, per_step_bytes: usize, memory_budget_bytes: usize) -> usize {
    if per_step_bytes == 0 {
        return total_timesteps.max(1);
    }
    (memory_budget_bytes / per_step_bytes).max(1)
}

/// Partition `[0, total_timesteps)` into ascending, disjoint, gap-free batches.
pub fn plan(total_timesteps: usize, per_step_bytes: usize, memory_budget_bytes: usize) -> Vec<Batch> {
    let step = batch_len(total_timesteps, per_step_bytes, memory_budget_bytes);
    let mut batches = Vec::with_capacity(total_timesteps.div_ceil(step));
    let mut start = 0;
    while start < total_timesteps {
        let end = start.saturating_add(step).min(total_timesteps);
        batches.push(Batch::new(start, end));
        start = end;
    }
    batches
}
