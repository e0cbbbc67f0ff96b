//! Per-task review state and cycle history.

use crate::quality::QualityGateResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much cycle history terminal reviews keep after eviction trimming.
pub const TERMINAL_HISTORY_KEEP: usize = 2;

/// Lifecycle of one task's review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Running,
    AwaitingRework,
    Passed,
    Failed,
    Escalated,
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Escalated)
    }
}

/// Review bookkeeping for one task; one instance per task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub team_id: String,
    pub task_id: String,
    pub teammate_id: String,
    pub cycle_count: u32,
    pub max_cycles: u32,
    pub cycle_history: Vec<QualityGateResult>,
    pub status: ReviewStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ReviewState {
    pub fn new(
        team_id: impl Into<String>,
        task_id: impl Into<String>,
        teammate_id: impl Into<String>,
        max_cycles: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            task_id: task_id.into(),
            teammate_id: teammate_id.into(),
            cycle_count: 0,
            max_cycles,
            cycle_history: Vec::new(),
            status: ReviewStatus::Pending,
            started_at,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a completed gate cycle.
    pub fn push_cycle(&mut self, result: QualityGateResult) {
        self.cycle_count = result.cycle_number;
        self.cycle_history.push(result);
    }

    /// Trim history to the last [`TERMINAL_HISTORY_KEEP`] entries.
    pub fn trim_history(&mut self) {
        if self.cycle_history.len() > TERMINAL_HISTORY_KEEP {
            let excess = self.cycle_history.len() - TERMINAL_HISTORY_KEEP;
            self.cycle_history.drain(0..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{QualityGateConfig, StageResult};
    use std::collections::HashMap;

    fn result(cycle: u32) -> QualityGateResult {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert("errors".to_string(), StageResult::passing(90));
        QualityGateResult::evaluate(&config, stages, cycle, Utc::now())
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ReviewStatus::Passed.is_terminal());
        assert!(ReviewStatus::Failed.is_terminal());
        assert!(ReviewStatus::Escalated.is_terminal());
        assert!(!ReviewStatus::AwaitingRework.is_terminal());
        assert!(!ReviewStatus::Running.is_terminal());
    }

    #[test]
    fn test_push_cycle_tracks_count() {
        let mut state = ReviewState::new("team", "task", "tm", 3, Utc::now());
        state.push_cycle(result(1));
        state.push_cycle(result(2));
        assert_eq!(state.cycle_count, 2);
        assert_eq!(state.cycle_history.len(), 2);
    }

    #[test]
    fn test_trim_history_keeps_last_two() {
        let mut state = ReviewState::new("team", "task", "tm", 5, Utc::now());
        for cycle in 1..=5 {
            state.push_cycle(result(cycle));
        }
        state.trim_history();
        assert_eq!(state.cycle_history.len(), 2);
        assert_eq!(state.cycle_history[0].cycle_number, 4);
        assert_eq!(state.cycle_history[1].cycle_number, 5);
    }
}
