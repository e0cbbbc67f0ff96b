//! Review loop: the intercept on task completion.
//!
//! When an agent reports a task as completed, the team manager routes it
//! here instead of applying the status. The loop drives quality-gate
//! cycles, feedback, escalation, and the bypassed completion that closes
//! the cycle back through the manager.

pub mod orchestrator;
pub mod state;

pub use orchestrator::{EnqueueOutcome, ReviewLoop, ReviewLoopConfig};
pub use state::{ReviewState, ReviewStatus};

use crate::errors::ForemanError;
use crate::quality::QualityGateResult;
use crate::team::types::{TaskStatus, TaskType};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One task completion submitted for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub team_id: String,
    pub task_id: String,
    pub teammate_id: String,
    pub task_title: String,
    pub task_description: String,
    pub task_type: TaskType,
    /// Spec text for the spec-driven stages, when one is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
}

/// Structured diff handed to the quality gates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffBundle {
    /// Paths touched by the diff.
    pub files: Vec<PathBuf>,
    /// Unified diff text.
    pub unified: String,
}

impl DiffBundle {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.unified.trim().is_empty()
    }
}

/// Input to the quality-gate pipeline callback.
#[derive(Debug, Clone)]
pub struct GateInput {
    pub diff: DiffBundle,
    pub task_description: String,
    pub cycle_number: u32,
    pub spec: Option<String>,
}

/// Diagnosis produced by the escalation specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDiagnosis {
    pub diagnosis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
}

/// Checkpoint moments around a review cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLabel {
    PreReview,
    PostPass,
}

impl fmt::Display for CheckpointLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreReview => write!(f, "pre-review"),
            Self::PostPass => write!(f, "post-pass"),
        }
    }
}

/// Injected pipeline the review loop sequences. Every method may block on
/// IO or LLM calls; the loop serializes them per task.
#[async_trait]
pub trait ReviewPipeline: Send + Sync {
    /// Collect the diff for the task under review.
    async fn collect_diff(&self, request: &ReviewRequest) -> Result<DiffBundle>;

    /// Run the quality-gate pipeline over the diff.
    async fn run_quality_gates(&self, input: GateInput) -> Result<QualityGateResult>;

    /// Deliver feedback to the agent that owns the task.
    async fn send_feedback(&self, request: &ReviewRequest, content: String) -> Result<()>;

    /// Obtain a diagnosis from the escalation specialist.
    async fn escalate(
        &self,
        request: &ReviewRequest,
        history: &[QualityGateResult],
    ) -> Result<EscalationDiagnosis>;

    /// Snapshot the work tree. `None` when checkpointing is unavailable.
    async fn create_checkpoint(
        &self,
        request: &ReviewRequest,
        label: CheckpointLabel,
    ) -> Result<Option<String>>;

    /// Restore a previously created checkpoint.
    async fn rollback(&self, request: &ReviewRequest, checkpoint_id: &str) -> Result<()>;
}

/// Reflexive bridge back into the team manager. The bypass flag is what
/// lets the loop finalize a task without re-triggering itself.
pub trait TaskStatusBridge: Send + Sync {
    fn update_task_status(
        &self,
        team_id: &str,
        task_id: &str,
        status: TaskStatus,
        actor: Option<&str>,
        bypass_review: bool,
    ) -> Result<TaskStatus, ForemanError>;
}
