//! Append-only JSONL persistence of team state.
//!
//! One record per line: `{t, d, k?}` where `t` names the entity family and
//! `d` is the payload. Duplicates are allowed on disk; `load` deduplicates
//! (latest task per id, latest yolo snapshot, latest quality result per
//! key) and prunes expired knowledge entries, rewriting the file when any
//! pruning happened.

use crate::clock::SharedClock;
use crate::knowledge::{KNOWLEDGE_RETENTION_DAYS, KnowledgeEntry};
use crate::quality::QualityGateResult;
use crate::team::types::{ActivityEvent, Task, TeamMessage};
use crate::yolo::YoloSnapshot;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const STATE_FILE_NAME: &str = "team-state.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct RawRecord {
    t: String,
    d: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    k: Option<String>,
}

/// In-memory view of a loaded state file.
#[derive(Debug, Default, Clone)]
pub struct LoadedTeamState {
    pub messages: Vec<TeamMessage>,
    pub tasks: Vec<Task>,
    pub activity: Vec<ActivityEvent>,
    /// Latest quality result per entity key (teammate session id).
    pub quality: HashMap<String, QualityGateResult>,
    pub yolo: Option<YoloSnapshot>,
    pub knowledge: Vec<KnowledgeEntry>,
}

/// Append-only JSONL store for one team session.
pub struct TeamStateStore {
    path: PathBuf,
    clock: SharedClock,
}

impl TeamStateStore {
    pub fn new(session_dir: &Path, clock: SharedClock) -> Self {
        Self {
            path: session_dir.join(STATE_FILE_NAME),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, t: &str, d: serde_json::Value, k: Option<String>) -> Result<()> {
        let record = RawRecord {
            t: t.to_string(),
            d,
            k,
        };
        let line = serde_json::to_string(&record).context("Failed to serialize state record")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create session directory")?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open team state file")?;
        writeln!(file, "{}", line).context("Failed to write state record")?;
        Ok(())
    }

    pub fn append_message(&self, message: &TeamMessage) -> Result<()> {
        self.append("msg", serde_json::to_value(message)?, None)
    }

    pub fn append_task(&self, task: &Task) -> Result<()> {
        self.append("task", serde_json::to_value(task)?, None)
    }

    pub fn append_activity(&self, activity: &ActivityEvent) -> Result<()> {
        self.append("act", serde_json::to_value(activity)?, None)
    }

    pub fn append_quality(&self, key: &str, result: &QualityGateResult) -> Result<()> {
        self.append("qg", serde_json::to_value(result)?, Some(key.to_string()))
    }

    pub fn append_yolo(&self, snapshot: &YoloSnapshot) -> Result<()> {
        self.append("yolo", serde_json::to_value(snapshot)?, None)
    }

    pub fn append_knowledge(&self, entry: &KnowledgeEntry) -> Result<()> {
        self.append("kb", serde_json::to_value(entry)?, None)
    }

    /// Stream the file, deduplicate, prune expired knowledge. Malformed
    /// lines are dropped, not fatal. When knowledge pruning removed
    /// anything the file is rewritten in compact form.
    pub fn load(&self) -> Result<LoadedTeamState> {
        if !self.path.exists() {
            return Ok(LoadedTeamState::default());
        }
        let content =
            fs::read_to_string(&self.path).context("Failed to read team state file")?;

        let mut state = LoadedTeamState::default();
        let mut task_index: HashMap<String, usize> = HashMap::new();
        let mut kb_pruned = false;
        let now = self.clock.now();
        let retention = Duration::days(KNOWLEDGE_RETENTION_DAYS);

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<RawRecord>(line) else {
                tracing::debug!("skipping malformed state line");
                continue;
            };
            match record.t.as_str() {
                "msg" => {
                    if let Ok(message) = serde_json::from_value::<TeamMessage>(record.d) {
                        state.messages.push(message);
                    }
                }
                "task" => {
                    if let Ok(task) = serde_json::from_value::<Task>(record.d) {
                        match task_index.get(&task.id) {
                            Some(&index) => state.tasks[index] = task,
                            None => {
                                task_index.insert(task.id.clone(), state.tasks.len());
                                state.tasks.push(task);
                            }
                        }
                    }
                }
                "act" => {
                    if let Ok(activity) = serde_json::from_value::<ActivityEvent>(record.d) {
                        state.activity.push(activity);
                    }
                }
                "qg" => {
                    if let (Some(key), Ok(result)) = (
                        record.k,
                        serde_json::from_value::<QualityGateResult>(record.d),
                    ) {
                        state.quality.insert(key, result);
                    }
                }
                "yolo" => {
                    if let Ok(snapshot) = serde_json::from_value::<YoloSnapshot>(record.d) {
                        state.yolo = Some(snapshot);
                    }
                }
                "kb" => {
                    if let Ok(entry) = serde_json::from_value::<KnowledgeEntry>(record.d) {
                        if entry.is_expired(now, retention) {
                            kb_pruned = true;
                        } else {
                            state.knowledge.push(entry);
                        }
                    }
                }
                _ => {
                    tracing::debug!(t = %record.t, "skipping unknown state record kind");
                }
            }
        }

        if kb_pruned {
            self.rewrite(&state)?;
        }
        Ok(state)
    }

    /// Rewrite the file from the deduplicated in-memory state.
    pub fn compact(&self) -> Result<LoadedTeamState> {
        let state = self.load()?;
        self.rewrite(&state)?;
        Ok(state)
    }

    fn rewrite(&self, state: &LoadedTeamState) -> Result<()> {
        let mut lines = Vec::new();
        for message in &state.messages {
            lines.push(serde_json::to_string(&RawRecord {
                t: "msg".into(),
                d: serde_json::to_value(message)?,
                k: None,
            })?);
        }
        for task in &state.tasks {
            lines.push(serde_json::to_string(&RawRecord {
                t: "task".into(),
                d: serde_json::to_value(task)?,
                k: None,
            })?);
        }
        for activity in &state.activity {
            lines.push(serde_json::to_string(&RawRecord {
                t: "act".into(),
                d: serde_json::to_value(activity)?,
                k: None,
            })?);
        }
        for (key, result) in &state.quality {
            lines.push(serde_json::to_string(&RawRecord {
                t: "qg".into(),
                d: serde_json::to_value(result)?,
                k: Some(key.clone()),
            })?);
        }
        if let Some(snapshot) = &state.yolo {
            lines.push(serde_json::to_string(&RawRecord {
                t: "yolo".into(),
                d: serde_json::to_value(snapshot)?,
                k: None,
            })?);
        }
        for entry in &state.knowledge {
            lines.push(serde_json::to_string(&RawRecord {
                t: "kb".into(),
                d: serde_json::to_value(entry)?,
                k: None,
            })?);
        }

        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body).context("Failed to rewrite team state file")?;
        Ok(())
    }
}
