//! Append-only audit trail of orchestration events.
//!
//! One JSONL file per team. Entries are never mutated; summaries are
//! computed by walking the log.

pub mod logger;

pub use logger::{AuditFilter, AuditLogger, AuditSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of audited event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventKind {
    ReviewStarted,
    QualityGateCompleted,
    ReviewEscalated,
    ReviewSkipped,
    HealthStall,
    HealthRetryStorm,
    FileConflict,
    TaskCompleted,
    TaskFailed,
    TeamCleanup,
    YoloPhaseChanged,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AuditEventKind,
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teammate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_number: Option<u32>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl AuditEntry {
    pub fn new(kind: AuditEventKind, team_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind,
            team_id: team_id.into(),
            task_id: None,
            teammate_id: None,
            cycle_number: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_teammate(mut self, teammate_id: impl Into<String>) -> Self {
        self.teammate_id = Some(teammate_id.into());
        self
    }

    pub fn with_cycle(mut self, cycle: u32) -> Self {
        self.cycle_number = Some(cycle);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
