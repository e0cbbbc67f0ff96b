//! The team manager: central registry of teams, teammates, tasks,
//! messages, activity, phases, and cost.
//!
//! Only the manager mutates these collections. Every mutation emits a typed
//! event and, when a state store is attached, appends to the durable JSONL
//! log. The pivotal contract is the completion intercept in
//! [`TeamManager::update_task_status`]: a `completed` report without the
//! bypass flag is routed through the review loop instead of being applied.

pub mod cost;
pub mod types;

use crate::clock::SharedClock;
use crate::errors::ForemanError;
use crate::events::{EventBus, TeamEvent};
use crate::quality::QualityGateResult;
use crate::review::{ReviewLoop, ReviewRequest, TaskStatusBridge};
use crate::store::TeamStateStore;
use cost::CostSummary;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use types::{
    ActivityEvent, ActivityKind, MAX_ACTIVITY_PER_TEAM, MAX_MESSAGES_PER_TEAM, MAX_TASKS_PER_TEAM,
    MessageKind, PhaseStatus, Task, TaskStatus, Team, TeamMessage, TeamPhase, TeamStatus, Teammate,
    TeammateStatus, TokenUsage, push_capped,
};

#[derive(Default)]
struct Inner {
    teams: HashMap<String, Team>,
    tasks: HashMap<String, Vec<Task>>,
    messages: HashMap<String, Vec<TeamMessage>>,
    activity: HashMap<String, Vec<ActivityEvent>>,
    specs: HashMap<String, String>,
    phases: HashMap<String, Vec<TeamPhase>>,
    quality: HashMap<String, HashMap<String, QualityGateResult>>,
    stores: HashMap<String, Arc<TeamStateStore>>,
    synthesis_fired: HashSet<String>,
}

/// Central team registry and event source.
pub struct TeamManager {
    clock: SharedClock,
    bus: EventBus,
    workspace_dir: Option<PathBuf>,
    inner: Mutex<Inner>,
    review: Mutex<Option<Weak<ReviewLoop>>>,
}

impl TeamManager {
    pub fn new(clock: SharedClock, bus: EventBus) -> Self {
        Self {
            clock,
            bus,
            workspace_dir: None,
            inner: Mutex::new(Inner::default()),
            review: Mutex::new(None),
        }
    }

    /// Resolve relative completion-contract paths against this directory.
    pub fn with_workspace_dir(mut self, dir: PathBuf) -> Self {
        self.workspace_dir = Some(dir);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Wire the review loop in. The manager holds it weakly; the loop holds
    /// the manager strongly, which closes the cycle without leaking.
    pub fn attach_review_loop(&self, review: &Arc<ReviewLoop>) {
        *self.review.lock().expect("review ref lock") = Some(Arc::downgrade(review));
    }

    /// Attach durable persistence for one team.
    pub fn attach_store(&self, team_id: &str, store: Arc<TeamStateStore>) {
        self.inner
            .lock()
            .expect("team lock")
            .stores
            .insert(team_id.to_string(), store);
    }

    fn store_for(inner: &Inner, team_id: &str) -> Option<Arc<TeamStateStore>> {
        inner.stores.get(team_id).cloned()
    }

    // =========================================================
    // Teams & teammates
    // =========================================================

    pub fn create_team(&self, name: &str, lead_session_id: &str) -> Team {
        let team = Team::new(name, lead_session_id, self.clock.now());
        {
            let mut inner = self.inner.lock().expect("team lock");
            inner.teams.insert(team.id.clone(), team.clone());
        }
        tracing::info!(team_id = %team.id, name, "team created");
        self.bus.emit(TeamEvent::TeamCreated { team: team.clone() });
        team
    }

    pub fn get_team(&self, team_id: &str) -> Result<Team, ForemanError> {
        self.inner
            .lock()
            .expect("team lock")
            .teams
            .get(team_id)
            .cloned()
            .ok_or_else(|| ForemanError::UnknownTeam {
                id: team_id.to_string(),
            })
    }

    pub fn list_teams(&self) -> Vec<Team> {
        self.inner
            .lock()
            .expect("team lock")
            .teams
            .values()
            .cloned()
            .collect()
    }

    /// Tear a team down and drop all of its registry state.
    pub fn cleanup_team(&self, team_id: &str) -> Result<(), ForemanError> {
        {
            let mut inner = self.inner.lock().expect("team lock");
            let team = inner
                .teams
                .get_mut(team_id)
                .ok_or_else(|| ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                })?;
            team.status = TeamStatus::CleaningUp;
            inner.teams.remove(team_id);
            inner.tasks.remove(team_id);
            inner.messages.remove(team_id);
            inner.activity.remove(team_id);
            inner.specs.remove(team_id);
            inner.phases.remove(team_id);
            inner.quality.remove(team_id);
            inner.stores.remove(team_id);
            inner.synthesis_fired.remove(team_id);
        }
        tracing::info!(team_id, "team cleaned up");
        self.bus.emit(TeamEvent::TeamCleanup {
            team_id: team_id.to_string(),
        });
        Ok(())
    }

    /// Add a teammate, enforcing the single-lead invariant.
    pub fn add_teammate(&self, team_id: &str, teammate: Teammate) -> Result<Teammate, ForemanError> {
        {
            let mut inner = self.inner.lock().expect("team lock");
            let team = inner
                .teams
                .get_mut(team_id)
                .ok_or_else(|| ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                })?;
            if teammate.role.is_lead() && team.members.iter().any(|m| m.role.is_lead()) {
                return Err(ForemanError::Other(anyhow::anyhow!(
                    "team {team_id} already has a lead"
                )));
            }
            team.members.push(teammate.clone());
        }
        self.bus.emit(TeamEvent::TeammateSpawned {
            team_id: team_id.to_string(),
            teammate: teammate.clone(),
        });
        self.record_activity(
            team_id,
            ActivityEvent::new(
                ActivityKind::TeammateSpawned,
                format!("{} joined as {}", teammate.name, teammate.role),
                self.clock.now(),
            )
            .with_teammate(&teammate.id, &teammate.name),
        );
        Ok(teammate)
    }

    /// Move a teammate's status, enforcing monotonic progression (with the
    /// active/busy oscillation allowance).
    pub fn update_teammate_status(
        &self,
        team_id: &str,
        teammate_id: &str,
        status: TeammateStatus,
    ) -> Result<(), ForemanError> {
        let (teammate, shutdown) = {
            let mut inner = self.inner.lock().expect("team lock");
            let team = inner
                .teams
                .get_mut(team_id)
                .ok_or_else(|| ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                })?;
            let member =
                team.member_mut(teammate_id)
                    .ok_or_else(|| ForemanError::UnknownTeammate {
                        team_id: team_id.to_string(),
                        teammate_id: teammate_id.to_string(),
                    })?;
            if !teammate_transition_allowed(member.status, status) {
                return Err(ForemanError::Other(anyhow::anyhow!(
                    "teammate {teammate_id} cannot move from {:?} to {:?}",
                    member.status,
                    status
                )));
            }
            member.status = status;
            if status.is_terminal() {
                member.current_task_id = None;
            }
            (member.clone(), status == TeammateStatus::Shutdown)
        };

        if shutdown {
            self.bus.emit(TeamEvent::TeammateShutdown {
                team_id: team_id.to_string(),
                teammate_id: teammate_id.to_string(),
            });
        } else {
            self.bus.emit(TeamEvent::TeammateUpdated {
                team_id: team_id.to_string(),
                teammate,
            });
        }
        Ok(())
    }

    // =========================================================
    // Tasks
    // =========================================================

    pub fn create_task(&self, team_id: &str, task: Task) -> Result<Task, ForemanError> {
        {
            let mut inner = self.inner.lock().expect("team lock");
            if !inner.teams.contains_key(team_id) {
                return Err(ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                });
            }
            let tasks = inner.tasks.entry(team_id.to_string()).or_default();
            push_capped(tasks, task.clone(), MAX_TASKS_PER_TEAM);
            // New work re-arms the synthesis trigger for the next drain.
            inner.synthesis_fired.remove(team_id);
            if let Some(store) = Self::store_for(&inner, team_id) {
                log_store_error(store.append_task(&task));
            }
        }
        self.bus.emit(TeamEvent::TaskCreated {
            team_id: team_id.to_string(),
            task: task.clone(),
        });
        self.record_activity(
            team_id,
            ActivityEvent::new(
                ActivityKind::TaskCreated,
                format!("task created: {}", task.title),
                self.clock.now(),
            )
            .with_task(&task.id),
        );
        Ok(task)
    }

    pub fn get_task(&self, team_id: &str, task_id: &str) -> Result<Task, ForemanError> {
        let inner = self.inner.lock().expect("team lock");
        inner
            .tasks
            .get(team_id)
            .and_then(|tasks| tasks.iter().find(|t| t.id == task_id))
            .cloned()
            .ok_or_else(|| ForemanError::UnknownTask {
                team_id: team_id.to_string(),
                task_id: task_id.to_string(),
            })
    }

    pub fn tasks(&self, team_id: &str) -> Vec<Task> {
        self.inner
            .lock()
            .expect("team lock")
            .tasks
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn assign_task(
        &self,
        team_id: &str,
        task_id: &str,
        teammate_id: &str,
    ) -> Result<(), ForemanError> {
        let task = {
            let mut inner = self.inner.lock().expect("team lock");
            let team = inner
                .teams
                .get_mut(team_id)
                .ok_or_else(|| ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                })?;
            let member =
                team.member_mut(teammate_id)
                    .ok_or_else(|| ForemanError::UnknownTeammate {
                        team_id: team_id.to_string(),
                        teammate_id: teammate_id.to_string(),
                    })?;
            member.current_task_id = Some(task_id.to_string());

            let task = inner
                .tasks
                .get_mut(team_id)
                .and_then(|tasks| tasks.iter_mut().find(|t| t.id == task_id))
                .ok_or_else(|| ForemanError::UnknownTask {
                    team_id: team_id.to_string(),
                    task_id: task_id.to_string(),
                })?;
            task.assigned_to = Some(teammate_id.to_string());
            let task = task.clone();
            if let Some(store) = Self::store_for(&inner, team_id) {
                log_store_error(store.append_task(&task));
            }
            task
        };
        self.bus.emit(TeamEvent::TaskUpdated {
            team_id: team_id.to_string(),
            task: task.clone(),
        });
        self.record_activity(
            team_id,
            ActivityEvent::new(
                ActivityKind::TaskAssigned,
                format!("task assigned: {}", task.title),
                self.clock.now(),
            )
            .with_task(task_id)
            .with_teammate(teammate_id, teammate_id),
        );
        Ok(())
    }

    /// The pivotal status API. A `completed` report without the bypass flag
    /// is intercepted: the completion contract is validated, and the task
    /// goes to `in_review` and into the review queue instead.
    pub fn update_task_status(
        &self,
        team_id: &str,
        task_id: &str,
        status: TaskStatus,
        actor: Option<&str>,
        bypass_review: bool,
    ) -> Result<TaskStatus, ForemanError> {
        let review = self
            .review
            .lock()
            .expect("review ref lock")
            .as_ref()
            .and_then(Weak::upgrade);

        if status == TaskStatus::Completed
            && !bypass_review
            && let Some(review) = review
        {
            return self.intercept_completion(team_id, task_id, actor, review);
        }

        let task = self.apply_status(team_id, task_id, status, actor)?;
        if task.status.is_terminal() {
            self.maybe_request_synthesis(team_id);
        }
        Ok(task.status)
    }

    /// Contract check + review enqueue for a non-bypassed completion.
    fn intercept_completion(
        &self,
        team_id: &str,
        task_id: &str,
        actor: Option<&str>,
        review: Arc<ReviewLoop>,
    ) -> Result<TaskStatus, ForemanError> {
        let contract_missing = {
            let inner = self.inner.lock().expect("team lock");
            let task = inner
                .tasks
                .get(team_id)
                .and_then(|tasks| tasks.iter().find(|t| t.id == task_id))
                .ok_or_else(|| ForemanError::UnknownTask {
                    team_id: team_id.to_string(),
                    task_id: task_id.to_string(),
                })?;
            task.completion_contract
                .as_ref()
                .map(|contract| contract.missing_artifacts(self.workspace_dir.as_deref()))
                .unwrap_or_default()
        };

        if !contract_missing.is_empty() {
            tracing::warn!(
                team_id,
                task_id,
                missing = ?contract_missing,
                "completion contract violated; failing task"
            );
            let task = self.apply_status(team_id, task_id, TaskStatus::Failed, actor)?;
            self.record_activity(
                team_id,
                ActivityEvent::new(
                    ActivityKind::TaskFailed,
                    format!(
                        "completion contract violated: missing {}",
                        contract_missing
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    self.clock.now(),
                )
                .with_task(task_id),
            );
            self.maybe_request_synthesis(team_id);
            return Ok(task.status);
        }

        let task = self.apply_status(team_id, task_id, TaskStatus::InReview, actor)?;
        let request = ReviewRequest {
            team_id: team_id.to_string(),
            task_id: task_id.to_string(),
            teammate_id: actor
                .map(str::to_string)
                .or(task.assigned_to.clone())
                .unwrap_or_default(),
            task_title: task.title.clone(),
            task_description: task.description.clone(),
            task_type: task.task_type,
            spec: self
                .inner
                .lock()
                .expect("team lock")
                .specs
                .get(team_id)
                .cloned(),
        };
        review.enqueue(request);
        Ok(TaskStatus::InReview)
    }

    /// Apply a status directly, with transition validation and persistence.
    fn apply_status(
        &self,
        team_id: &str,
        task_id: &str,
        status: TaskStatus,
        actor: Option<&str>,
    ) -> Result<Task, ForemanError> {
        let task = {
            let mut inner = self.inner.lock().expect("team lock");
            if !inner.teams.contains_key(team_id) {
                return Err(ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                });
            }
            let now = self.clock.now();
            let task = inner
                .tasks
                .get_mut(team_id)
                .and_then(|tasks| tasks.iter_mut().find(|t| t.id == task_id))
                .ok_or_else(|| ForemanError::UnknownTask {
                    team_id: team_id.to_string(),
                    task_id: task_id.to_string(),
                })?;
            if task.status == status {
                return Ok(task.clone());
            }
            if !task.status.can_transition_to(status) {
                return Err(ForemanError::InvalidTaskTransition {
                    from: task.status.to_string(),
                    to: status.to_string(),
                });
            }
            task.status = status;
            if status == TaskStatus::Completed {
                task.completed_at = Some(now);
            }
            let task = task.clone();

            if status.is_terminal()
                && let Some(team) = inner.teams.get_mut(team_id)
                && let Some(member) = task
                    .assigned_to
                    .as_deref()
                    .and_then(|id| team.member_mut(id))
                && member.current_task_id.as_deref() == Some(task_id)
            {
                member.current_task_id = None;
            }

            if let Some(store) = Self::store_for(&inner, team_id) {
                log_store_error(store.append_task(&task));
            }
            task
        };

        self.bus.emit(TeamEvent::TaskUpdated {
            team_id: team_id.to_string(),
            task: task.clone(),
        });
        let kind = match status {
            TaskStatus::Completed => ActivityKind::TaskCompleted,
            TaskStatus::Failed => ActivityKind::TaskFailed,
            _ => ActivityKind::TaskStatusChanged,
        };
        let mut activity = ActivityEvent::new(
            kind,
            format!("task {} -> {}", task.title, status),
            self.clock.now(),
        )
        .with_task(task_id);
        if let Some(actor) = actor {
            activity = activity.with_teammate(actor, actor);
        }
        self.record_activity(team_id, activity);
        Ok(task)
    }

    /// Fire `synthesis:requested` exactly once per full drain: every task
    /// terminal, and every task held by a non-lead teammate completed.
    fn maybe_request_synthesis(&self, team_id: &str) {
        let completed = {
            let mut inner = self.inner.lock().expect("team lock");
            let inner = &mut *inner;
            if inner.synthesis_fired.contains(team_id) {
                return;
            }
            let Some(team) = inner.teams.get(team_id) else {
                return;
            };
            let Some(tasks) = inner.tasks.get(team_id) else {
                return;
            };
            if tasks.is_empty() || tasks.iter().any(|t| !t.is_terminal()) {
                return;
            }
            let non_lead: HashSet<&str> = team
                .members
                .iter()
                .filter(|m| !m.role.is_lead())
                .map(|m| m.id.as_str())
                .collect();
            let held_by_non_lead_incomplete = tasks.iter().any(|t| {
                t.assigned_to
                    .as_deref()
                    .is_some_and(|assignee| non_lead.contains(assignee))
                    && t.status != TaskStatus::Completed
            });
            if held_by_non_lead_incomplete {
                return;
            }
            inner.synthesis_fired.insert(team_id.to_string());
            tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .cloned()
                .collect::<Vec<_>>()
        };

        tracing::info!(team_id, count = completed.len(), "synthesis requested");
        self.bus.emit(TeamEvent::SynthesisRequested {
            team_id: team_id.to_string(),
            completed_tasks: completed,
        });
        self.record_activity(
            team_id,
            ActivityEvent::new(
                ActivityKind::SynthesisRequested,
                "all tasks terminal; synthesis requested",
                self.clock.now(),
            ),
        );
    }

    // =========================================================
    // Messages & activity
    // =========================================================

    pub fn send_message(
        &self,
        team_id: &str,
        from: &str,
        to: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<TeamMessage, ForemanError> {
        let message = TeamMessage::new(from, to, content, kind, self.clock.now());
        {
            let mut inner = self.inner.lock().expect("team lock");
            if !inner.teams.contains_key(team_id) {
                return Err(ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                });
            }
            let messages = inner.messages.entry(team_id.to_string()).or_default();
            push_capped(messages, message.clone(), MAX_MESSAGES_PER_TEAM);
            if let Some(store) = Self::store_for(&inner, team_id) {
                log_store_error(store.append_message(&message));
            }
        }
        self.bus.emit(TeamEvent::MessageSent {
            team_id: team_id.to_string(),
            message: message.clone(),
        });
        let activity_kind = match kind {
            MessageKind::Feedback => ActivityKind::FeedbackSent,
            MessageKind::Broadcast => ActivityKind::BroadcastSent,
            MessageKind::Message => ActivityKind::MessageSent,
        };
        self.record_activity(
            team_id,
            ActivityEvent::new(
                activity_kind,
                format!("{from} -> {to}"),
                self.clock.now(),
            ),
        );
        Ok(message)
    }

    pub fn messages(&self, team_id: &str) -> Vec<TeamMessage> {
        self.inner
            .lock()
            .expect("team lock")
            .messages
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Append to the bounded activity feed and emit it.
    pub fn record_activity(&self, team_id: &str, activity: ActivityEvent) {
        {
            let mut inner = self.inner.lock().expect("team lock");
            let feed = inner.activity.entry(team_id.to_string()).or_default();
            push_capped(feed, activity.clone(), MAX_ACTIVITY_PER_TEAM);
            if let Some(store) = Self::store_for(&inner, team_id) {
                log_store_error(store.append_activity(&activity));
            }
        }
        self.bus.emit(TeamEvent::Activity {
            team_id: team_id.to_string(),
            activity,
        });
    }

    pub fn activity(&self, team_id: &str) -> Vec<ActivityEvent> {
        self.inner
            .lock()
            .expect("team lock")
            .activity
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================
    // Specs & phases
    // =========================================================

    pub fn set_spec(&self, team_id: &str, spec: String) {
        self.inner
            .lock()
            .expect("team lock")
            .specs
            .insert(team_id.to_string(), spec);
    }

    pub fn spec(&self, team_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("team lock")
            .specs
            .get(team_id)
            .cloned()
    }

    pub fn set_phases(&self, team_id: &str, phases: Vec<TeamPhase>) {
        self.inner
            .lock()
            .expect("team lock")
            .phases
            .insert(team_id.to_string(), phases);
    }

    pub fn phases(&self, team_id: &str) -> Vec<TeamPhase> {
        self.inner
            .lock()
            .expect("team lock")
            .phases
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn start_phase(&self, team_id: &str, phase_id: &str) -> Result<(), ForemanError> {
        {
            let mut inner = self.inner.lock().expect("team lock");
            let phase = inner
                .phases
                .get_mut(team_id)
                .and_then(|phases| phases.iter_mut().find(|p| p.id == phase_id))
                .ok_or_else(|| ForemanError::Other(anyhow::anyhow!(
                    "unknown phase {phase_id} in team {team_id}"
                )))?;
            phase.status = PhaseStatus::InProgress;
        }
        self.record_activity(
            team_id,
            ActivityEvent::new(ActivityKind::PhaseStarted, format!("phase {phase_id}"), self.clock.now()),
        );
        Ok(())
    }

    /// Complete a phase. Refused while any member task is non-terminal.
    pub fn complete_phase(&self, team_id: &str, phase_id: &str) -> Result<(), ForemanError> {
        {
            let mut inner = self.inner.lock().expect("team lock");
            let non_terminal = {
                let tasks = inner.tasks.get(team_id);
                let phase = inner
                    .phases
                    .get(team_id)
                    .and_then(|phases| phases.iter().find(|p| p.id == phase_id))
                    .ok_or_else(|| ForemanError::Other(anyhow::anyhow!(
                        "unknown phase {phase_id} in team {team_id}"
                    )))?;
                phase.task_ids.iter().any(|task_id| {
                    tasks
                        .and_then(|tasks| tasks.iter().find(|t| t.id == *task_id))
                        .is_some_and(|t| !t.is_terminal())
                })
            };
            if non_terminal {
                return Err(ForemanError::Other(anyhow::anyhow!(
                    "phase {phase_id} has non-terminal tasks"
                )));
            }
            let now = self.clock.now();
            if let Some(phase) = inner
                .phases
                .get_mut(team_id)
                .and_then(|phases| phases.iter_mut().find(|p| p.id == phase_id))
            {
                phase.status = PhaseStatus::Completed;
                phase.completed_at = Some(now);
            }
        }
        self.record_activity(
            team_id,
            ActivityEvent::new(ActivityKind::PhaseCompleted, format!("phase {phase_id}"), self.clock.now()),
        );
        Ok(())
    }

    // =========================================================
    // Cost & quality
    // =========================================================

    pub fn update_teammate_usage(
        &self,
        team_id: &str,
        teammate_id: &str,
        delta: TokenUsage,
    ) -> Result<(), ForemanError> {
        let mut inner = self.inner.lock().expect("team lock");
        let team = inner
            .teams
            .get_mut(team_id)
            .ok_or_else(|| ForemanError::UnknownTeam {
                id: team_id.to_string(),
            })?;
        let member = team
            .member_mut(teammate_id)
            .ok_or_else(|| ForemanError::UnknownTeammate {
                team_id: team_id.to_string(),
                teammate_id: teammate_id.to_string(),
            })?;
        member.usage.add(&delta);
        Ok(())
    }

    /// Roll up costs and emit `cost:updated`.
    pub fn cost_summary(&self, team_id: &str) -> Result<CostSummary, ForemanError> {
        let summary = {
            let inner = self.inner.lock().expect("team lock");
            let team = inner
                .teams
                .get(team_id)
                .ok_or_else(|| ForemanError::UnknownTeam {
                    id: team_id.to_string(),
                })?;
            CostSummary::from_team(team)
        };
        self.bus.emit(TeamEvent::CostUpdated {
            team_id: team_id.to_string(),
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Record the latest gate result for a teammate session.
    pub fn record_quality_result(&self, team_id: &str, key: &str, result: QualityGateResult) {
        let mut inner = self.inner.lock().expect("team lock");
        if let Some(store) = Self::store_for(&inner, team_id) {
            log_store_error(store.append_quality(key, &result));
        }
        inner
            .quality
            .entry(team_id.to_string())
            .or_default()
            .insert(key.to_string(), result);
    }

    pub fn quality_results(&self, team_id: &str) -> HashMap<String, QualityGateResult> {
        self.inner
            .lock()
            .expect("team lock")
            .quality
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl TaskStatusBridge for TeamManager {
    fn update_task_status(
        &self,
        team_id: &str,
        task_id: &str,
        status: TaskStatus,
        actor: Option<&str>,
        bypass_review: bool,
    ) -> Result<TaskStatus, ForemanError> {
        TeamManager::update_task_status(self, team_id, task_id, status, actor, bypass_review)
    }
}

fn teammate_transition_allowed(from: TeammateStatus, to: TeammateStatus) -> bool {
    use TeammateStatus::*;
    if from == to {
        return true;
    }
    match from {
        Spawning => matches!(to, Active | Shutdown | Failed),
        Active => matches!(to, Busy | Shutdown | Failed),
        Busy => matches!(to, Active | Shutdown | Failed),
        Shutdown | Failed => false,
    }
}

fn log_store_error(result: anyhow::Result<()>) {
    if let Err(error) = result {
        tracing::warn!(%error, "team state append failed");
    }
}
