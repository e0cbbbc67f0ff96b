//! Core data model for teams, teammates, tasks, phases, messages, and activity.
//!
//! Everything here is serde-serializable; the wire spellings (kebab-case
//! statuses, snake_case task states) are what the JSONL stores and the event
//! surface emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Hard resource caps, enforced with oldest-first eviction.
pub const MAX_ACTIVITY_PER_TEAM: usize = 1500;
pub const MAX_MESSAGES_PER_TEAM: usize = 2000;
pub const MAX_TASKS_PER_TEAM: usize = 3000;
pub const MAX_REVIEW_QUEUE: usize = 50;
pub const MAX_RECENT_TOOL_CALLS: usize = 20;
pub const MAX_HEALTH_ISSUES: usize = 20;
pub const MAX_FILE_CONFLICTS_PER_TEAM: usize = 50;

/// Lifecycle status of a team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeamStatus {
    #[default]
    Active,
    CleaningUp,
    Completed,
}

/// Role of a teammate within a team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeammateRole {
    Lead,
    Head,
    #[default]
    Worker,
    Reviewer,
    Escalation,
}

impl TeammateRole {
    pub fn is_lead(&self) -> bool {
        matches!(self, Self::Lead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Head => "head",
            Self::Worker => "worker",
            Self::Reviewer => "reviewer",
            Self::Escalation => "escalation",
        }
    }
}

impl fmt::Display for TeammateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a teammate.
///
/// Statuses progress monotonically except that `Active` may oscillate with
/// `Busy`; `Shutdown` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeammateStatus {
    #[default]
    Spawning,
    Active,
    Busy,
    Shutdown,
    Failed,
}

impl TeammateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Shutdown | Self::Failed)
    }
}

/// Cumulative token usage and cost for one teammate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cost_usd += other.cost_usd;
    }
}

/// A single AI agent participating in a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teammate {
    pub id: String,
    pub name: String,
    pub role: TeammateRole,
    pub model: String,
    pub provider: String,
    pub status: TeammateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl Teammate {
    pub fn new(
        name: impl Into<String>,
        role: TeammateRole,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role,
            model: model.into(),
            provider: provider.into(),
            status: TeammateStatus::Spawning,
            current_task_id: None,
            usage: TokenUsage::default(),
        }
    }
}

/// A team of agents working toward one objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub lead_session_id: String,
    pub status: TeamStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub members: Vec<Teammate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_preset: Option<String>,
}

impl Team {
    pub fn new(
        name: impl Into<String>,
        lead_session_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            lead_session_id: lead_session_id.into(),
            status: TeamStatus::Active,
            created_at,
            members: Vec::new(),
            model_preset: None,
        }
    }

    /// The single teammate with the lead role, if present.
    pub fn lead(&self) -> Option<&Teammate> {
        self.members.iter().find(|m| m.role.is_lead())
    }

    pub fn member(&self, teammate_id: &str) -> Option<&Teammate> {
        self.members.iter().find(|m| m.id == teammate_id)
    }

    pub fn member_mut(&mut self, teammate_id: &str) -> Option<&mut Teammate> {
        self.members.iter_mut().find(|m| m.id == teammate_id)
    }

    /// Check the one-lead invariant.
    pub fn has_single_lead(&self) -> bool {
        self.members.iter().filter(|m| m.role.is_lead()).count() == 1
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    InReview,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the status lifecycle permits moving to `to`.
    ///
    /// `InReview → InProgress` is the rework edge; terminal states accept
    /// nothing.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        if *self == to {
            return false;
        }
        match self {
            Self::Pending => matches!(
                to,
                Self::InProgress | Self::InReview | Self::Completed | Self::Failed
            ),
            Self::InProgress => matches!(to, Self::InReview | Self::Completed | Self::Failed),
            Self::InReview => matches!(to, Self::InProgress | Self::Completed | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inferred kind of work a task represents.
///
/// Non-code kinds bypass the review loop entirely: there is no diff to gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Research,
    Planning,
    Search,
    Explore,
    Docs,
    #[default]
    Implement,
    Test,
    Fix,
    Refactor,
    Remediation,
}

impl TaskType {
    /// Classify a task from its title and description.
    ///
    /// Keyword matching, most specific first.
    pub fn classify(title: &str, description: &str) -> Self {
        let text = format!("{} {}", title, description).to_lowercase();

        if text.contains("research")
            || text.contains("investigate")
            || text.contains("compare options")
            || text.contains("evaluate")
        {
            return Self::Research;
        }

        if text.contains("plan")
            || text.contains("roadmap")
            || text.contains("break down")
            || text.contains("decompose")
        {
            return Self::Planning;
        }

        if text.contains("search") || text.contains("find ") || text.contains("locate") {
            return Self::Search;
        }

        if text.contains("explore") || text.contains("survey") || text.contains("map out") {
            return Self::Explore;
        }

        if text.contains("document")
            || text.contains("docs")
            || text.contains("readme")
            || text.contains("changelog")
        {
            return Self::Docs;
        }

        if text.contains("remediat") || text.contains("integration failure") {
            return Self::Remediation;
        }

        if text.contains("test") || text.contains("coverage") || text.contains("e2e") {
            return Self::Test;
        }

        if text.contains("fix")
            || text.contains("bug")
            || text.contains("patch")
            || text.contains("repair")
        {
            return Self::Fix;
        }

        if text.contains("refactor") || text.contains("cleanup") || text.contains("simplify") {
            return Self::Refactor;
        }

        Self::Implement
    }

    /// Kinds that produce no reviewable diff.
    pub fn is_non_code(&self) -> bool {
        matches!(
            self,
            Self::Research | Self::Planning | Self::Search | Self::Explore | Self::Docs
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Planning => "planning",
            Self::Search => "search",
            Self::Explore => "explore",
            Self::Docs => "docs",
            Self::Implement => "implement",
            Self::Test => "test",
            Self::Fix => "fix",
            Self::Refactor => "refactor",
            Self::Remediation => "remediation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Artifact paths that must exist before a task may complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionContract {
    pub required_artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub require_non_empty: bool,
}

impl CompletionContract {
    pub fn new(required_artifacts: Vec<PathBuf>) -> Self {
        Self {
            required_artifacts,
            require_non_empty: false,
        }
    }

    pub fn with_non_empty(mut self) -> Self {
        self.require_non_empty = true;
        self
    }

    /// Return the required paths that are missing (or empty when
    /// `require_non_empty` is set). Relative paths resolve against
    /// `workspace_dir` when one is given.
    pub fn missing_artifacts(&self, workspace_dir: Option<&Path>) -> Vec<PathBuf> {
        self.required_artifacts
            .iter()
            .filter(|path| {
                let resolved: PathBuf = match workspace_dir {
                    Some(base) if path.is_relative() => base.join(path),
                    _ => (*path).clone(),
                };
                match std::fs::metadata(&resolved) {
                    Ok(meta) => self.require_non_empty && meta.len() == 0,
                    Err(_) => true,
                }
            })
            .cloned()
            .collect()
    }
}

/// A unit of work with a status lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_order: Option<u32>,
    #[serde(default)]
    pub requirement_ids: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_contract: Option<CompletionContract>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        let description = description.into();
        let task_type = TaskType::classify(&title, &description);
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            description,
            status: TaskStatus::Pending,
            created_by: created_by.into(),
            assigned_to: None,
            created_at,
            completed_at: None,
            phase_id: None,
            phase_order: None,
            requirement_ids: Vec::new(),
            depends_on: Vec::new(),
            task_type,
            completion_contract: None,
        }
    }

    pub fn with_assignee(mut self, teammate_id: impl Into<String>) -> Self {
        self.assigned_to = Some(teammate_id.into());
        self
    }

    pub fn with_phase(mut self, phase_id: impl Into<String>, order: u32) -> Self {
        self.phase_id = Some(phase_id.into());
        self.phase_order = Some(order);
        self
    }

    pub fn with_requirements(mut self, ids: Vec<String>) -> Self {
        self.requirement_ids = ids;
        self
    }

    pub fn with_dependencies(mut self, ids: Vec<String>) -> Self {
        self.depends_on = ids;
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_contract(mut self, contract: CompletionContract) -> Self {
        self.completion_contract = Some(contract);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lifecycle status of a phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
}

/// An ordered group of tasks; a phase completes only when every member task
/// is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamPhase {
    pub id: String,
    pub name: String,
    pub order: u32,
    pub status: PhaseStatus,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TeamPhase {
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            order,
            status: PhaseStatus::Pending,
            task_ids: Vec::new(),
            completed_at: None,
        }
    }
}

/// Message category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Message,
    Feedback,
    Broadcast,
}

/// Recipient of a broadcast message.
pub const BROADCAST_RECIPIENT: &str = "all";

/// An append-only team message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: MessageKind,
}

impl TeamMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp,
            kind,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_RECIPIENT || self.kind == MessageKind::Broadcast
    }
}

/// Closed set of activity kinds recorded per team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    TaskCreated,
    TaskAssigned,
    TaskStatusChanged,
    TaskCompleted,
    TaskFailed,
    TeammateSpawned,
    TeammateStatusChanged,
    TeammateShutdown,
    MessageSent,
    FeedbackSent,
    BroadcastSent,
    ReviewStarted,
    ReviewPassed,
    ReviewFailed,
    ReviewEscalated,
    ReviewSkipped,
    FileConflict,
    KnowledgeShared,
    HealthStall,
    HealthErrorLoop,
    HealthRetryStorm,
    HealthContextExhaustion,
    PhaseStarted,
    PhaseCompleted,
    CostUpdated,
    SynthesisRequested,
}

/// One entry in a team's bounded activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teammate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teammate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, details: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            kind,
            details: details.into(),
            teammate_id: None,
            teammate_name: None,
            task_id: None,
        }
    }

    pub fn with_teammate(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.teammate_id = Some(id.into());
        self.teammate_name = Some(name.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Push onto a bounded collection, evicting oldest-first.
pub(crate) fn push_capped<T>(items: &mut Vec<T>, item: T, cap: usize) {
    items.push(item);
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // Status lifecycle tests
    // =========================================

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::InReview.is_terminal());
    }

    #[test]
    fn test_task_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(InReview));
        assert!(InReview.can_transition_to(InProgress)); // rework edge
        assert!(InReview.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(InProgress));
    }

    #[test]
    fn test_task_status_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InReview).unwrap(),
            "\"in_review\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_team_status_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&TeamStatus::CleaningUp).unwrap(),
            "\"cleaning-up\""
        );
    }

    #[test]
    fn test_teammate_status_terminal() {
        assert!(TeammateStatus::Shutdown.is_terminal());
        assert!(TeammateStatus::Failed.is_terminal());
        assert!(!TeammateStatus::Busy.is_terminal());
    }

    // =========================================
    // Task-type classification tests
    // =========================================

    #[test]
    fn test_classify_research() {
        assert_eq!(
            TaskType::classify("Research caching strategies", ""),
            TaskType::Research
        );
    }

    #[test]
    fn test_classify_docs() {
        assert_eq!(
            TaskType::classify("Write README", "document the API surface"),
            TaskType::Docs
        );
    }

    #[test]
    fn test_classify_defaults_to_implement() {
        assert_eq!(
            TaskType::classify("Implement login", "add the auth endpoint"),
            TaskType::Implement
        );
    }

    #[test]
    fn test_classify_remediation() {
        assert_eq!(
            TaskType::classify("Remediate integration failure", "broken import"),
            TaskType::Remediation
        );
    }

    #[test]
    fn test_non_code_set() {
        assert!(TaskType::Research.is_non_code());
        assert!(TaskType::Planning.is_non_code());
        assert!(TaskType::Search.is_non_code());
        assert!(TaskType::Explore.is_non_code());
        assert!(TaskType::Docs.is_non_code());
        assert!(!TaskType::Implement.is_non_code());
        assert!(!TaskType::Test.is_non_code());
        assert!(!TaskType::Remediation.is_non_code());
    }

    // =========================================
    // Team invariants
    // =========================================

    #[test]
    fn test_team_single_lead() {
        let mut team = Team::new("alpha", "session-1", Utc::now());
        assert!(!team.has_single_lead());

        team.members
            .push(Teammate::new("lead", TeammateRole::Lead, "m", "p"));
        assert!(team.has_single_lead());

        team.members
            .push(Teammate::new("worker", TeammateRole::Worker, "m", "p"));
        assert!(team.has_single_lead());

        team.members
            .push(Teammate::new("usurper", TeammateRole::Lead, "m", "p"));
        assert!(!team.has_single_lead());
    }

    #[test]
    fn test_team_lead_lookup() {
        let mut team = Team::new("alpha", "session-1", Utc::now());
        team.members
            .push(Teammate::new("worker", TeammateRole::Worker, "m", "p"));
        team.members
            .push(Teammate::new("boss", TeammateRole::Lead, "m", "p"));
        assert_eq!(team.lead().unwrap().name, "boss");
    }

    // =========================================
    // Completion contract tests
    // =========================================

    #[test]
    fn test_contract_missing_artifacts() {
        let dir = tempfile::TempDir::new().unwrap();
        let contract = CompletionContract::new(vec![
            PathBuf::from("docs/findings.md"),
            PathBuf::from("docs/evidence.json"),
        ]);

        let missing = contract.missing_artifacts(Some(dir.path()));
        assert_eq!(missing.len(), 2);

        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/findings.md"), "found").unwrap();
        let missing = contract.missing_artifacts(Some(dir.path()));
        assert_eq!(missing, vec![PathBuf::from("docs/evidence.json")]);
    }

    #[test]
    fn test_contract_rejects_empty_when_flagged() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("out.md"), "").unwrap();

        let lenient = CompletionContract::new(vec![PathBuf::from("out.md")]);
        assert!(lenient.missing_artifacts(Some(dir.path())).is_empty());

        let strict = CompletionContract::new(vec![PathBuf::from("out.md")]).with_non_empty();
        assert_eq!(strict.missing_artifacts(Some(dir.path())).len(), 1);
    }

    // =========================================
    // Misc model tests
    // =========================================

    #[test]
    fn test_token_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage.add(&TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            cost_usd: 0.02,
        });
        usage.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cost_usd: 0.01,
        });
        assert_eq!(usage.input_tokens, 110);
        assert_eq!(usage.output_tokens, 55);
        assert!((usage.cost_usd - 0.03).abs() < f64::EPSILON);
    }

    #[test]
    fn test_message_broadcast_detection() {
        let msg = TeamMessage::new("a", BROADCAST_RECIPIENT, "hi", MessageKind::Message, Utc::now());
        assert!(msg.is_broadcast());

        let direct = TeamMessage::new("a", "b", "hi", MessageKind::Message, Utc::now());
        assert!(!direct.is_broadcast());
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("Implement login", "auth endpoint", "lead", Utc::now())
            .with_phase("phase-1", 1)
            .with_requirements(vec!["REQ-1".into()])
            .with_contract(CompletionContract::new(vec![PathBuf::from("src/auth.rs")]));

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.phase_order, Some(1));
        assert_eq!(task.requirement_ids, vec!["REQ-1".to_string()]);
        assert!(task.completion_contract.is_some());
        assert_eq!(task.task_type, TaskType::Implement);
    }

    #[test]
    fn test_push_capped_evicts_oldest() {
        let mut items = Vec::new();
        for i in 0..10 {
            push_capped(&mut items, i, 5);
        }
        assert_eq!(items, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_activity_event_serialization() {
        let event = ActivityEvent::new(ActivityKind::ReviewPassed, "score 92", Utc::now())
            .with_teammate("tm-1", "worker")
            .with_task("task-1");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"review-passed\""));
        assert!(json.contains("\"task-1\""));
    }
}
