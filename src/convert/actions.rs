//! Episode-segmented action export.
//!
//! Streams a partition's joint actions into JSON, CSV and/or plain-text
//! files. An episode ends at every timestep whose terminal flags hold any
//! non-zero value; a trailing run without a terminal is kept and marked
//! incomplete. Only the actions, terminals and (for text) rewards columns
//! are read, and at most one episode is held in memory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pipeline::{ArtifactSink, BatchColumns};
use crate::artifact::{file_size, ArtifactInfo, PartialFile};
use crate::error::{Result, VaultError};
use crate::schema::{ColumnRole, Schema};

/// One output flavour of the action export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionsFormat {
    Json,
    Csv,
    Txt,
}

impl ActionsFormat {
    pub const ALL: [ActionsFormat; 3] = [Self::Json, Self::Csv, Self::Txt];

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Txt => "txt",
        }
    }
}

const RULE: &str = "================================================================================";

// ---------------------------------------------------------------------------
// Staged output file
// ---------------------------------------------------------------------------

/// Fields drop in order: the writer closes before the staged file is removed.
struct Output {
    writer: BufWriter<File>,
    staged: PartialFile,
    target: PathBuf,
}

impl Output {
    fn create(target: PathBuf) -> Result<Self> {
        let (staged, file) = PartialFile::create(&target)?;
        Ok(Self {
            writer: BufWriter::new(file),
            staged,
            target,
        })
    }

    fn put(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_all(text.as_bytes())
            .map_err(|e| VaultError::io(&self.target, e))
    }

    fn finish(mut self, timesteps: usize) -> Result<ArtifactInfo> {
        self.writer.flush().map_err(|e| VaultError::io(&self.target, e))?;
        drop(self.writer);
        let path = self.staged.commit()?;
        let bytes = file_size(&path)?;
        debug!(path = %path.display(), bytes, "Wrote action export");
        Ok(ArtifactInfo { path, bytes, timesteps })
    }
}

#[derive(Serialize)]
struct EpisodeRecord<'a> {
    episode_num: usize,
    length: usize,
    actions: &'a [Vec<Vec<f64>>],
    #[serde(skip_serializing_if = "is_false")]
    incomplete: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Writes `<stem>.json`, `<stem>.csv` and `<stem>.txt` as requested.
pub struct ActionsSink {
    source: PathBuf,
    n_agents: usize,
    has_terminals: bool,
    max_text_episodes: usize,
    json: Option<Output>,
    csv: Option<Output>,
    txt: Option<Output>,

    next_t: usize,
    episode: usize,
    episode_start: usize,
    /// Actions of the open episode; only kept for the JSON output.
    episode_actions: Vec<Vec<Vec<f64>>>,
    episode_return: Vec<f64>,
    json_episodes: usize,
    text_episodes: usize,
    text_done: bool,
}

impl ActionsSink {
    /// Create the requested files under `output_dir` as `<stem>.<ext>` and
    /// write their headers. Nothing is visible under the final names until
    /// [`finish`](ArtifactSink::finish).
    pub fn new(
        output_dir: &Path,
        stem: &str,
        schema: &Schema,
        source: &Path,
        formats: &[ActionsFormat],
        max_text_episodes: usize,
    ) -> Result<Self> {
        let open = |format: ActionsFormat| -> Result<Option<Output>> {
            if !formats.contains(&format) {
                return Ok(None);
            }
            Output::create(output_dir.join(format!("{stem}.{}", format.extension()))).map(Some)
        };
        let mut sink = Self {
            source: source.to_path_buf(),
            n_agents: schema.n_agents,
            has_terminals: schema.has(ColumnRole::Terminals),
            max_text_episodes,
            json: open(ActionsFormat::Json)?,
            csv: open(ActionsFormat::Csv)?,
            txt: open(ActionsFormat::Txt)?,
            next_t: 0,
            episode: 0,
            episode_start: 0,
            episode_actions: Vec::new(),
            episode_return: vec![0.0; schema.n_agents],
            json_episodes: 0,
            text_episodes: 0,
            text_done: false,
        };
        sink.write_headers(schema)?;
        Ok(sink)
    }

    fn write_headers(&mut self, schema: &Schema) -> Result<()> {
        let (agents, act_dim) = (schema.n_agents, schema.act_dim);
        if let Some(json) = &mut self.json {
            json.put(&format!(
                "{{\"total_timesteps\": {}, \"num_agents\": {agents}, \"action_dim\": {act_dim}, \"episodes\": [",
                schema.n_timesteps
            ))?;
        }
        if let Some(csv) = &mut self.csv {
            let mut header = vec!["timestep".to_string(), "episode".to_string()];
            for agent in 0..agents {
                if act_dim > 1 {
                    header.extend((0..act_dim).map(|j| format!("agent_{agent}_action_{j}")));
                } else {
                    header.push(format!("agent_{agent}_action"));
                }
            }
            if self.has_terminals {
                header.push("episode_end".into());
            }
            csv.put(&header.join(","))?;
            csv.put("\n")?;
        }
        if let Some(txt) = &mut self.txt {
            txt.put(&format!(
                "{RULE}\nJOINT ACTION TRAJECTORIES\n{RULE}\nNumber of agents: {agents}\n\
                 Action dimension: {act_dim}\nTotal timesteps: {}\n{RULE}\n\n",
                schema.n_timesteps
            ))?;
        }
        Ok(())
    }

    fn step(&mut self, t: usize, actions: Vec<Vec<f64>>, rewards: Option<Vec<f64>>, terminal: bool) -> Result<()> {
        if let Some(csv) = &mut self.csv {
            let mut row = format!("{t},{}", self.episode);
            for value in actions.iter().flatten() {
                row.push_str(&format!(",{value}"));
            }
            if self.has_terminals {
                row.push_str(if terminal { ",true" } else { ",false" });
            }
            row.push('\n');
            csv.put(&row)?;
        }

        self.text_step(t, &actions, rewards.as_deref(), terminal)?;

        if self.json.is_some() {
            self.episode_actions.push(actions);
        }
        if terminal {
            self.close_episode(false)?;
            self.episode += 1;
            self.episode_start = t + 1;
        }
        Ok(())
    }

    fn text_step(&mut self, t: usize, actions: &[Vec<f64>], rewards: Option<&[f64]>, terminal: bool) -> Result<()> {
        let Some(txt) = self.txt.as_mut().filter(|_| !self.text_done) else {
            return Ok(());
        };
        if t == self.episode_start {
            if self.text_episodes >= self.max_text_episodes {
                txt.put(&format!(
                    "\n... (showing first {} episodes only) ...\n",
                    self.max_text_episodes
                ))?;
                self.text_done = true;
                return Ok(());
            }
            txt.put(&format!("\n{RULE}\nEPISODE {}\n{RULE}\n", self.episode))?;
        }

        let mut block = format!("\nTimestep {t} (Episode step {}):\n", t - self.episode_start);
        for (agent, action) in actions.iter().enumerate() {
            block.push_str(&format!("  Agent {agent} action: {action:?}\n"));
        }
        if let Some(rewards) = rewards {
            block.push_str(&format!("  Rewards: {rewards:?}\n"));
            for (total, r) in self.episode_return.iter_mut().zip(rewards) {
                *total += r;
            }
        }
        if terminal {
            block.push_str(&format!(
                "\n  >>> EPISODE END <<<\n  Episode Length: {}\n",
                t - self.episode_start + 1
            ));
            if rewards.is_some() {
                block.push_str(&format!("  Episode Return: {:?}\n", self.episode_return));
            }
            self.text_episodes += 1;
            self.episode_return = vec![0.0; self.n_agents];
        }
        txt.put(&block)
    }

    fn close_episode(&mut self, incomplete: bool) -> Result<()> {
        let Some(json) = &mut self.json else {
            return Ok(());
        };
        let record = EpisodeRecord {
            episode_num: self.json_episodes,
            length: self.episode_actions.len(),
            actions: &self.episode_actions,
            incomplete,
        };
        let encoded = serde_json::to_string(&record).map_err(|e| VaultError::json(&json.target, e))?;
        let separator = if self.json_episodes == 0 { "\n  " } else { ",\n  " };
        json.put(separator)?;
        json.put(&encoded)?;
        self.json_episodes += 1;
        self.episode_actions.clear();
        Ok(())
    }
}

impl ArtifactSink for ActionsSink {
    type Output = Vec<ArtifactInfo>;

    /// Once only a finished text summary is left, nothing more is needed.
    fn capacity(&self) -> Option<usize> {
        (self.json.is_none() && self.csv.is_none() && self.text_done).then_some(0)
    }

    fn wants(&self, role: ColumnRole) -> bool {
        match role {
            ColumnRole::Actions | ColumnRole::Terminals => true,
            ColumnRole::Rewards => self.txt.is_some(),
            _ => false,
        }
    }

    fn accept(&mut self, batch: &BatchColumns) -> Result<()> {
        let mismatch = |detail: String| VaultError::ColumnLayoutMismatch {
            path: self.source.clone(),
            column: ColumnRole::Actions.store_name().to_string(),
            detail,
        };
        if batch.batch.start != self.next_t {
            return Err(mismatch(format!(
                "batch starts at {}, episodes need timestep {} next",
                batch.batch.start, self.next_t
            )));
        }
        let actions = batch
            .get(ColumnRole::Actions)
            .ok_or_else(|| mismatch("no actions in batch".into()))?;
        if self.json.is_some() {
            if let Some((row, value)) = actions.first_non_finite() {
                return Err(VaultError::NonFiniteValue {
                    path: self.source.clone(),
                    column: ColumnRole::Actions.store_name().to_string(),
                    t: batch.batch.start + row,
                    value,
                });
            }
        }
        let terminals = batch.get(ColumnRole::Terminals);
        let rewards = batch.get(ColumnRole::Rewards);

        for row in 0..batch.batch.len() {
            let terminal = terminals.is_some_and(|a| a.row_f64(row).iter().any(|v| *v != 0.0));
            self.step(
                batch.batch.start + row,
                actions.row_grouped(row, self.n_agents),
                rewards.map(|r| r.row_f64(row)),
                terminal,
            )?;
        }
        self.next_t = batch.batch.end;
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<ArtifactInfo>> {
        if !self.episode_actions.is_empty() {
            self.close_episode(true)?;
        }
        let timesteps = self.next_t;
        let mut written = Vec::new();
        if let Some(mut json) = self.json.take() {
            json.put(&format!("\n], \"num_episodes\": {}}}\n", self.json_episodes))?;
            written.push(json.finish(timesteps)?);
        }
        if let Some(csv) = self.csv.take() {
            written.push(csv.finish(timesteps)?);
        }
        if let Some(txt) = self.txt.take() {
            written.push(txt.finish(timesteps)?);
        }
        debug!(
            episodes = self.episode + usize::from(self.episode_start < timesteps),
            files = written.len(),
            "Exported actions"
        );
        Ok(written)
    }
}
