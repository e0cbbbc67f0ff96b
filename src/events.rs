//! Typed event surface.
//!
//! Every externally observable state change is a variant of one of four
//! event families, fanned out over a `tokio::sync::broadcast` bus. Each
//! subscriber holds its own [`tokio::sync::broadcast::Receiver`]; dropping
//! the receiver unsubscribes exactly that subscriber, which is what lets the
//! autonomous driver detach its own listeners without touching anyone
//! else's.

use crate::team::cost::CostSummary;
use crate::team::types::{ActivityEvent, Task, Team, TeamMessage, Teammate};
use crate::yolo::{SpecEvolutionProposal, YoloPhase};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events from the team manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TeamEvent {
    #[serde(rename = "team:created")]
    TeamCreated { team: Team },
    #[serde(rename = "team:updated")]
    TeamUpdated { team: Team },
    #[serde(rename = "team:cleanup")]
    TeamCleanup { team_id: String },
    #[serde(rename = "teammate:spawned")]
    TeammateSpawned { team_id: String, teammate: Teammate },
    #[serde(rename = "teammate:updated")]
    TeammateUpdated { team_id: String, teammate: Teammate },
    #[serde(rename = "teammate:shutdown")]
    TeammateShutdown { team_id: String, teammate_id: String },
    #[serde(rename = "task:created")]
    TaskCreated { team_id: String, task: Task },
    #[serde(rename = "task:updated")]
    TaskUpdated { team_id: String, task: Task },
    #[serde(rename = "message:sent")]
    MessageSent { team_id: String, message: TeamMessage },
    #[serde(rename = "activity")]
    Activity {
        team_id: String,
        activity: ActivityEvent,
    },
    #[serde(rename = "cost:updated")]
    CostUpdated { team_id: String, summary: CostSummary },
    #[serde(rename = "synthesis:requested")]
    SynthesisRequested {
        team_id: String,
        completed_tasks: Vec<Task>,
    },
}

/// Events from the review loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ReviewEvent {
    #[serde(rename = "review:started")]
    Started {
        team_id: String,
        task_id: String,
        teammate_id: String,
        cycle: u32,
    },
    #[serde(rename = "review:passed")]
    Passed {
        team_id: String,
        task_id: String,
        score: u8,
        cycle: u32,
        report: String,
    },
    #[serde(rename = "review:failed")]
    Failed {
        team_id: String,
        task_id: String,
        score: u8,
        cycle: u32,
        report: String,
    },
    #[serde(rename = "review:escalating")]
    Escalating {
        team_id: String,
        task_id: String,
        cycle: u32,
    },
    #[serde(rename = "review:escalated")]
    Escalated {
        team_id: String,
        task_id: String,
        diagnosis: String,
    },
    #[serde(rename = "review:skipped")]
    Skipped {
        team_id: String,
        task_id: String,
        reason: String,
    },
    #[serde(rename = "review:queue_full")]
    QueueFull { team_id: String, task_id: String },
    #[serde(rename = "review:remediation-needed")]
    RemediationNeeded {
        team_id: String,
        task_id: String,
        requirement_ids: Vec<String>,
    },
    #[serde(rename = "review:error")]
    Error {
        team_id: String,
        task_id: String,
        message: String,
    },
}

/// Events from the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum HealthEvent {
    #[serde(rename = "health:stall")]
    Stall {
        team_id: String,
        teammate_id: String,
        teammate_name: String,
        silent_for_secs: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    #[serde(rename = "health:error-loop")]
    ErrorLoop {
        team_id: String,
        teammate_id: String,
        tool: String,
        consecutive_errors: u32,
    },
    #[serde(rename = "health:retry-storm")]
    RetryStorm {
        team_id: String,
        teammate_id: String,
        tool: String,
        count: u32,
    },
    #[serde(rename = "health:retry-storm-throttle")]
    RetryStormThrottle {
        team_id: String,
        teammate_id: String,
        tool: String,
        count: u32,
    },
    #[serde(rename = "health:retry-storm-kill")]
    RetryStormKill {
        team_id: String,
        teammate_id: String,
        tool: String,
        count: u32,
    },
    #[serde(rename = "health:context-exhaustion")]
    ContextExhaustion {
        team_id: String,
        teammate_id: String,
        usage: f32,
    },
    #[serde(rename = "health:soft-probe")]
    SoftProbe {
        team_id: String,
        teammate_id: String,
        silent_for_secs: u64,
    },
}

/// Events from the autonomous driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum YoloEvent {
    #[serde(rename = "yolo:phase-changed")]
    PhaseChanged {
        team_id: String,
        from: YoloPhase,
        to: YoloPhase,
    },
    #[serde(rename = "yolo:spec-evolution-proposed")]
    SpecEvolutionProposed {
        team_id: String,
        proposal: SpecEvolutionProposal,
    },
}

/// The union of all event families carried by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrchestratorEvent {
    Team(TeamEvent),
    Review(ReviewEvent),
    Health(HealthEvent),
    Yolo(YoloEvent),
}

impl From<TeamEvent> for OrchestratorEvent {
    fn from(event: TeamEvent) -> Self {
        Self::Team(event)
    }
}

impl From<ReviewEvent> for OrchestratorEvent {
    fn from(event: ReviewEvent) -> Self {
        Self::Review(event)
    }
}

impl From<HealthEvent> for OrchestratorEvent {
    fn from(event: HealthEvent) -> Self {
        Self::Health(event)
    }
}

impl From<YoloEvent> for OrchestratorEvent {
    fn from(event: YoloEvent) -> Self {
        Self::Yolo(event)
    }
}

/// Broadcast bus for orchestration events.
///
/// Cloning the bus clones the sender; all clones feed the same set of
/// subscribers. Emitting with no live subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to every live subscriber.
    pub fn emit(&self, event: impl Into<OrchestratorEvent>) {
        let event = event.into();
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
