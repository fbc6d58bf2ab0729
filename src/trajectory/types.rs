//! Core record types for the bounded-record (JSON) artifact.
//!
//! A record document is meant for small-sample inspection: it carries the
//! first `n_exported` timesteps of a partition, while its metadata always
//! describes the full source partition.

use serde::{Deserialize, Serialize};

use crate::store::ColumnArray;

// ---------------------------------------------------------------------------
// Single timestep
// ---------------------------------------------------------------------------

/// One timestep of joint (all-agent) experience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepRecord {
    /// Absolute timestep index in the source partition.
    pub t: usize,
    /// Per-agent observation vectors, `[A][obs_dim]`.
    pub obs: Vec<Vec<f64>>,
    /// Per-agent action vectors, `[A][act_dim]`.
    pub act: Vec<Vec<f64>>,
    /// Per-agent reward.
    pub rew: Vec<f64>,
    /// Global environment state, when the vault records one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Vec<f64>>,
}

// ---------------------------------------------------------------------------
// Document metadata
// ---------------------------------------------------------------------------

/// Metadata block of a record document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Environment family (e.g. "gymnasium_mamujoco").
    pub env: String,
    pub scenario: String,
    pub quality: String,
    pub n_agents: usize,
    /// Timesteps in the source partition (not in this document).
    pub n_timesteps: usize,
    /// Timesteps actually present in `trajectories`.
    #[serde(default)]
    pub n_exported: usize,
    pub obs_dim: usize,
    pub act_dim: usize,
}

/// The complete bounded-record artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDocument {
    pub metadata: RecordMetadata,
    /// Records in ascending `t`.
    pub trajectories: Vec<TimestepRecord>,
}

// ---------------------------------------------------------------------------
// Record buffer
// ---------------------------------------------------------------------------

/// Column slices for one batch, as handed to [`RecordBuffer::push_batch`].
#[derive(Debug, Clone, Copy)]
pub struct BatchSlices<'a> {
    /// Absolute timestep of row 0.
    pub start: usize,
    pub observations: &'a ColumnArray,
    pub actions: &'a ColumnArray,
    pub rewards: &'a ColumnArray,
    pub states: Option<&'a ColumnArray>,
}

/// An accumulation buffer that stops growing at a fixed record count.
#[derive(Debug, Clone)]
pub struct RecordBuffer {
    records: Vec<TimestepRecord>,
    n_agents: usize,
    max_records: usize,
}

impl RecordBuffer {
    /// Create a buffer holding at most `max_records` records.
    pub fn new(n_agents: usize, max_records: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_records.min(1 << 16)),
            n_agents,
            max_records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records still accepted before the cap is reached.
    pub fn remaining(&self) -> usize {
        self.max_records - self.records.len()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Append one record per row of `slices`, up to the cap.
    ///
    /// Returns how many records were appended.
    pub fn push_batch(&mut self, slices: BatchSlices<'_>) -> usize {
        let rows = slices.observations.len().min(self.remaining());
        for row in 0..rows {
            self.records.push(TimestepRecord {
                t: slices.start + row,
                obs: slices.observations.row_grouped(row, self.n_agents),
                act: slices.actions.row_grouped(row, self.n_agents),
                rew: slices.rewards.row_f64(row),
                state: slices.states.map(|s| s.row_f64(row)),
            });
        }
        rows
    }

    /// Consume the buffer, yielding records in insertion order.
    pub fn into_records(self) -> Vec<TimestepRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slices(n: usize) -> (ColumnArray, ColumnArray, ColumnArray) {
        let obs: Vec<f32> = (0..n * 2 * 2).map(|i| i as f32).collect();
        let act: Vec<f32> = (0..n * 2).map(|i| -(i as f32)).collect();
        let rew: Vec<f32> = (0..n * 2).map(|i| i as f32 * 0.5).collect();
        (
            ColumnArray::from_f32(&[n, 2, 2], &obs).unwrap(),
            ColumnArray::from_f32(&[n, 2, 1], &act).unwrap(),
            ColumnArray::from_f32(&[n, 2], &rew).unwrap(),
        )
    }

    #[test]
    fn push_batch_builds_per_agent_records() {
        let (obs, act, rew) = slices(3);
        let mut buf = RecordBuffer::new(2, 10);
        let pushed = buf.push_batch(BatchSlices {
            start: 100,
            observations: &obs,
            actions: &act,
            rewards: &rew,
            states: None,
        });
        assert_eq!(pushed, 3);
        let records = buf.into_records();
        assert_eq!(records[0].t, 100);
        assert_eq!(records[1].obs, vec![vec![4.0, 5.0], vec![6.0, 7.0]]);
        assert_eq!(records[1].act, vec![vec![-2.0], vec![-3.0]]);
        assert_eq!(records[2].rew, vec![2.0, 2.5]);
        assert!(records[2].state.is_none());
    }

    #[test]
    fn buffer_stops_at_cap() {
        let (obs, act, rew) = slices(4);
        let mut buf = RecordBuffer::new(2, 5);
        let batch = |start| BatchSlices {
            start,
            observations: &obs,
            actions: &act,
            rewards: &rew,
            states: None,
        };
        assert_eq!(buf.push_batch(batch(0)), 4);
        assert_eq!(buf.push_batch(batch(4)), 1);
        assert!(buf.is_full());
        assert_eq!(buf.push_batch(batch(8)), 0);
        let ts: Vec<usize> = buf.into_records().iter().map(|r| r.t).collect();
        assert_eq!(ts, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn zero_cap_accepts_nothing() {
        let (obs, act, rew) = slices(2);
        let mut buf = RecordBuffer::new(2, 0);
        assert!(buf.is_full());
        let pushed = buf.push_batch(BatchSlices {
            start: 0,
            observations: &obs,
            actions: &act,
            rewards: &rew,
            states: None,
        });
        assert_eq!(pushed, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn state_is_omitted_from_json_when_absent() {
        let record = TimestepRecord {
            t: 0,
            obs: vec![vec![1.0]],
            act: vec![vec![0.5]],
            rew: vec![1.0],
            state: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("state").is_none());
        assert_eq!(json["t"], 0);
    }
}
