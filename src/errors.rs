//! Typed error hierarchy for the Foreman orchestration core.
//!
//! Three top-level enums cover the three subsystems:
//! - `ForemanError` — registry and API-boundary failures
//! - `ReviewError` — review-loop and quality-gate pipeline failures
//! - `YoloError` — autonomous-run driver failures

use thiserror::Error;

/// Errors from the team registry and its API boundary.
#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("Unknown team: {id}")]
    UnknownTeam { id: String },

    #[error("Unknown task {task_id} in team {team_id}")]
    UnknownTask { team_id: String, task_id: String },

    #[error("Unknown teammate {teammate_id} in team {team_id}")]
    UnknownTeammate {
        team_id: String,
        teammate_id: String,
    },

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTaskTransition { from: String, to: String },

    #[error("Completion contract not satisfied for task {task_id}: missing {missing:?}")]
    ContractViolation {
        task_id: String,
        missing: Vec<std::path::PathBuf>,
    },

    #[error("Failed to persist team state at {path}: {source}")]
    StateWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the review loop and its injected pipeline.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Diff collection failed for task {task_id}: {message}")]
    DiffCollection { task_id: String, message: String },

    #[error("Quality gate pipeline failed on cycle {cycle}: {message}")]
    GatePipeline { cycle: u32, message: String },

    #[error("Escalation failed for task {task_id}: {message}")]
    Escalation { task_id: String, message: String },

    #[error("Review queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Registry(#[from] ForemanError),
}

/// Errors from the autonomous-run driver.
#[derive(Debug, Error)]
pub enum YoloError {
    #[error("Run already terminal in phase {phase}")]
    AlreadyTerminal { phase: String },

    #[error("Spec generation failed: {0}")]
    SpecGeneration(String),

    #[error("Task decomposition failed: {0}")]
    Decomposition(String),

    #[error(transparent)]
    Registry(#[from] ForemanError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_team_carries_id() {
        let err = ForemanError::UnknownTeam { id: "team-1".into() };
        assert!(err.to_string().contains("team-1"));
    }

    #[test]
    fn contract_violation_lists_missing_paths() {
        let err = ForemanError::ContractViolation {
            task_id: "task-9".into(),
            missing: vec!["docs/findings.md".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("task-9"));
        assert!(msg.contains("findings.md"));
    }

    #[test]
    fn review_error_converts_from_registry_error() {
        let inner = ForemanError::UnknownTask {
            team_id: "t".into(),
            task_id: "x".into(),
        };
        let review: ReviewError = inner.into();
        assert!(matches!(review, ReviewError::Registry(_)));
    }

    #[test]
    fn queue_full_mentions_capacity() {
        let err = ReviewError::QueueFull { capacity: 50 };
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ForemanError::UnknownTeam { id: "x".into() });
        assert_std_error(&ReviewError::QueueFull { capacity: 1 });
        assert_std_error(&YoloError::SpecGeneration("x".into()));
    }
}
