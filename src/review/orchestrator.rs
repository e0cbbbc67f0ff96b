//! The review loop itself: a bounded FIFO of completion reports, processed
//! one at a time.
//!
//! Pipeline failures never propagate to the caller of `enqueue`; they
//! become `review:error` events plus feedback, and the task is handed back
//! to the agent for another attempt.

use crate::audit::{AuditEntry, AuditEventKind, AuditLogger};
use crate::clock::SharedClock;
use crate::events::{EventBus, ReviewEvent};
use crate::ownership::OwnershipTracker;
use crate::quality::{QualityGateConfig, format_failure_report, format_success_report};
use crate::review::state::{ReviewState, ReviewStatus};
use crate::review::{
    CheckpointLabel, GateInput, ReviewPipeline, ReviewRequest, TaskStatusBridge,
};
use crate::team::types::{MAX_REVIEW_QUEUE, TaskStatus};
use chrono::Duration;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Notify;

/// Review loop configuration.
#[derive(Debug, Clone)]
pub struct ReviewLoopConfig {
    pub queue_capacity: usize,
    pub gate_config: QualityGateConfig,
}

impl Default for ReviewLoopConfig {
    fn default() -> Self {
        Self {
            queue_capacity: MAX_REVIEW_QUEUE,
            gate_config: QualityGateConfig::default(),
        }
    }
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued for a review cycle.
    Queued,
    /// Non-code task; completed directly without review.
    SkippedNonCode,
    /// Queue at capacity; the report was dropped.
    Dropped,
}

struct Inner {
    queue: VecDeque<ReviewRequest>,
    states: HashMap<String, ReviewState>,
}

/// Review loop orchestrator.
pub struct ReviewLoop {
    config: ReviewLoopConfig,
    pipeline: Arc<dyn ReviewPipeline>,
    bridge: Arc<dyn TaskStatusBridge>,
    clock: SharedClock,
    bus: EventBus,
    audit: Option<Arc<AuditLogger>>,
    ownership: Option<Arc<OwnershipTracker>>,
    inner: Mutex<Inner>,
    notify: Notify,
    busy: tokio::sync::Mutex<()>,
}

impl ReviewLoop {
    pub fn new(
        pipeline: Arc<dyn ReviewPipeline>,
        bridge: Arc<dyn TaskStatusBridge>,
        config: ReviewLoopConfig,
        clock: SharedClock,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            pipeline,
            bridge,
            clock,
            bus,
            audit: None,
            ownership: None,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                states: HashMap::new(),
            }),
            notify: Notify::new(),
            busy: tokio::sync::Mutex::new(()),
        }
    }

    /// Attach an audit logger.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attach an ownership tracker; terminal review outcomes release the
    /// reviewed paths.
    pub fn with_ownership(mut self, ownership: Arc<OwnershipTracker>) -> Self {
        self.ownership = Some(ownership);
        self
    }

    pub fn gate_config(&self) -> &QualityGateConfig {
        &self.config.gate_config
    }

    /// Submit a completion report. Never fails; overflow and non-code
    /// bypasses are reported through events and the return value.
    pub fn enqueue(&self, request: ReviewRequest) -> EnqueueOutcome {
        if request.task_type.is_non_code() {
            // Nothing to diff; complete outright.
            let _ = self.bridge.update_task_status(
                &request.team_id,
                &request.task_id,
                TaskStatus::Completed,
                Some(&request.teammate_id),
                true,
            );
            self.audit_log(
                AuditEntry::new(AuditEventKind::ReviewSkipped, &request.team_id, self.clock.now())
                    .with_task(&request.task_id)
                    .with_teammate(&request.teammate_id),
            );
            self.bus.emit(ReviewEvent::Skipped {
                team_id: request.team_id.clone(),
                task_id: request.task_id.clone(),
                reason: format!("{} tasks bypass the review loop", request.task_type),
            });
            return EnqueueOutcome::SkippedNonCode;
        }

        {
            let mut inner = self.inner.lock().expect("review lock");
            if inner.queue.len() >= self.config.queue_capacity {
                drop(inner);
                tracing::warn!(
                    task_id = %request.task_id,
                    capacity = self.config.queue_capacity,
                    "review queue full; dropping report"
                );
                self.bus.emit(ReviewEvent::QueueFull {
                    team_id: request.team_id.clone(),
                    task_id: request.task_id.clone(),
                });
                return EnqueueOutcome::Dropped;
            }

            let now = self.clock.now();
            let max_cycles = self.config.gate_config.max_review_cycles;
            inner
                .states
                .entry(request.task_id.clone())
                .and_modify(|state| {
                    // Resume: keep the cycle history and count.
                    if !state.is_terminal() {
                        state.status = ReviewStatus::Pending;
                    }
                })
                .or_insert_with(|| {
                    ReviewState::new(
                        &request.team_id,
                        &request.task_id,
                        &request.teammate_id,
                        max_cycles,
                        now,
                    )
                });
            inner.queue.push_back(request);
        }
        self.notify.notify_one();
        EnqueueOutcome::Queued
    }

    /// Process everything currently queued, one review at a time.
    pub async fn drain(&self) {
        while self.process_next().await {}
    }

    /// Run the loop forever, waking on enqueue. Spawn this on the runtime.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.notify.notified().await;
            self.drain().await;
        }
    }

    /// Pop and process one queued review. Returns false when idle.
    pub async fn process_next(&self) -> bool {
        let _guard = self.busy.lock().await;
        let request = {
            let mut inner = self.inner.lock().expect("review lock");
            inner.queue.pop_front()
        };
        let Some(request) = request else {
            return false;
        };
        self.run_cycle(&request).await;
        true
    }

    async fn run_cycle(&self, request: &ReviewRequest) {
        let cycle = {
            let mut inner = self.inner.lock().expect("review lock");
            let Some(state) = inner.states.get_mut(&request.task_id) else {
                return;
            };
            state.status = ReviewStatus::Running;
            state.cycle_count + 1
        };
        let max_cycles = self.config.gate_config.max_review_cycles;

        self.bus.emit(ReviewEvent::Started {
            team_id: request.team_id.clone(),
            task_id: request.task_id.clone(),
            teammate_id: request.teammate_id.clone(),
            cycle,
        });
        self.audit_log(
            AuditEntry::new(AuditEventKind::ReviewStarted, &request.team_id, self.clock.now())
                .with_task(&request.task_id)
                .with_teammate(&request.teammate_id)
                .with_cycle(cycle),
        );

        if let Err(error) = self
            .pipeline
            .create_checkpoint(request, CheckpointLabel::PreReview)
            .await
        {
            tracing::warn!(task_id = %request.task_id, %error, "pre-review checkpoint failed");
        }

        let diff = match self.pipeline.collect_diff(request).await {
            Ok(diff) if !diff.is_empty() => diff,
            Ok(_) => {
                self.handle_transient(
                    request,
                    "No changes were found for this task. Make your edits, then mark the task \
                     completed again."
                        .to_string(),
                )
                .await;
                return;
            }
            Err(error) => {
                self.handle_transient(
                    request,
                    format!("Diff collection failed: {error}. Retry after checking your changes."),
                )
                .await;
                return;
            }
        };

        let input = GateInput {
            diff: diff.clone(),
            task_description: request.task_description.clone(),
            cycle_number: cycle,
            spec: request.spec.clone(),
        };
        let mut result = match self.pipeline.run_quality_gates(input).await {
            Ok(result) => result,
            Err(error) => {
                self.handle_transient(
                    request,
                    format!("Quality gate pipeline failed: {error}. The task stays open; retry."),
                )
                .await;
                return;
            }
        };
        result.cycle_number = cycle;
        result.max_cycles = max_cycles;

        {
            let mut inner = self.inner.lock().expect("review lock");
            if let Some(state) = inner.states.get_mut(&request.task_id) {
                state.push_cycle(result.clone());
            }
        }
        self.audit_log(
            AuditEntry::new(
                AuditEventKind::QualityGateCompleted,
                &request.team_id,
                self.clock.now(),
            )
            .with_task(&request.task_id)
            .with_teammate(&request.teammate_id)
            .with_cycle(cycle)
            .with_data(serde_json::json!({
                "passed": result.passed,
                "aggregateScore": result.aggregate_score,
            })),
        );

        if result.passed {
            if let Err(error) = self
                .pipeline
                .create_checkpoint(request, CheckpointLabel::PostPass)
                .await
            {
                tracing::warn!(task_id = %request.task_id, %error, "post-pass checkpoint failed");
            }
            let _ = self.bridge.update_task_status(
                &request.team_id,
                &request.task_id,
                TaskStatus::Completed,
                Some(&request.teammate_id),
                true,
            );
            self.finish(request, ReviewStatus::Passed, &diff.files);
            let report = format_success_report(&result, &self.config.gate_config);
            self.bus.emit(ReviewEvent::Passed {
                team_id: request.team_id.clone(),
                task_id: request.task_id.clone(),
                score: result.aggregate_score,
                cycle,
                report,
            });
            return;
        }

        if cycle < max_cycles {
            let report = format_failure_report(&result, &self.config.gate_config);
            if let Err(error) = self.pipeline.send_feedback(request, report.clone()).await {
                tracing::warn!(task_id = %request.task_id, %error, "feedback delivery failed");
            }
            let _ = self.bridge.update_task_status(
                &request.team_id,
                &request.task_id,
                TaskStatus::InProgress,
                Some(&request.teammate_id),
                true,
            );
            {
                let mut inner = self.inner.lock().expect("review lock");
                if let Some(state) = inner.states.get_mut(&request.task_id) {
                    state.status = ReviewStatus::AwaitingRework;
                }
            }
            self.bus.emit(ReviewEvent::Failed {
                team_id: request.team_id.clone(),
                task_id: request.task_id.clone(),
                score: result.aggregate_score,
                cycle,
                report,
            });

            let missing = missing_requirements(&result);
            if !missing.is_empty() {
                self.bus.emit(ReviewEvent::RemediationNeeded {
                    team_id: request.team_id.clone(),
                    task_id: request.task_id.clone(),
                    requirement_ids: missing,
                });
            }
            return;
        }

        // Out of cycles: escalate. The escalated cycle is terminal; the
        // task completes rather than returning to in-progress, so feedback
        // cannot trigger yet another completion report.
        self.bus.emit(ReviewEvent::Escalating {
            team_id: request.team_id.clone(),
            task_id: request.task_id.clone(),
            cycle,
        });
        self.audit_log(
            AuditEntry::new(AuditEventKind::ReviewEscalated, &request.team_id, self.clock.now())
                .with_task(&request.task_id)
                .with_teammate(&request.teammate_id)
                .with_cycle(cycle),
        );

        let history = {
            let inner = self.inner.lock().expect("review lock");
            inner
                .states
                .get(&request.task_id)
                .map(|state| state.cycle_history.clone())
                .unwrap_or_default()
        };
        let diagnosis = match self.pipeline.escalate(request, &history).await {
            Ok(diagnosis) => diagnosis.diagnosis,
            Err(error) => {
                tracing::warn!(task_id = %request.task_id, %error, "escalation callback failed");
                format!("Escalation diagnosis unavailable: {error}")
            }
        };

        let _ = self.bridge.update_task_status(
            &request.team_id,
            &request.task_id,
            TaskStatus::Completed,
            Some(&request.teammate_id),
            true,
        );
        self.finish(request, ReviewStatus::Escalated, &diff.files);
        self.bus.emit(ReviewEvent::Escalated {
            team_id: request.team_id.clone(),
            task_id: request.task_id.clone(),
            diagnosis,
        });
    }

    /// Transient pipeline failure: feedback, task back to the agent,
    /// review left awaiting rework.
    async fn handle_transient(&self, request: &ReviewRequest, message: String) {
        if let Err(error) = self.pipeline.send_feedback(request, message.clone()).await {
            tracing::warn!(task_id = %request.task_id, %error, "feedback delivery failed");
        }
        let _ = self.bridge.update_task_status(
            &request.team_id,
            &request.task_id,
            TaskStatus::InProgress,
            Some(&request.teammate_id),
            true,
        );
        {
            let mut inner = self.inner.lock().expect("review lock");
            if let Some(state) = inner.states.get_mut(&request.task_id) {
                state.status = ReviewStatus::AwaitingRework;
            }
        }
        self.bus.emit(ReviewEvent::Error {
            team_id: request.team_id.clone(),
            task_id: request.task_id.clone(),
            message,
        });
    }

    fn finish(&self, request: &ReviewRequest, status: ReviewStatus, files: &[std::path::PathBuf]) {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock().expect("review lock");
            if let Some(state) = inner.states.get_mut(&request.task_id) {
                state.status = status;
                state.ended_at = Some(now);
            }
        }
        if let Some(ownership) = &self.ownership {
            ownership.release_files(&request.team_id, files);
        }
    }

    fn audit_log(&self, entry: AuditEntry) {
        if let Some(audit) = &self.audit
            && let Err(error) = audit.log(&entry)
        {
            tracing::warn!(%error, "audit append failed");
        }
    }

    /// Snapshot of one task's review state.
    pub fn review_state(&self, task_id: &str) -> Option<ReviewState> {
        self.inner
            .lock()
            .expect("review lock")
            .states
            .get(task_id)
            .cloned()
    }

    /// Number of queued reports.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().expect("review lock").queue.len()
    }

    /// Drop terminal reviews older than the cutoff and trim the history of
    /// retained terminal reviews to the last two cycles.
    pub fn evict_stale_reviews(&self, max_age: Duration) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("review lock");
        inner.states.retain(|_, state| {
            !(state.is_terminal()
                && state.ended_at.is_some_and(|ended| now - ended > max_age))
        });
        for state in inner.states.values_mut() {
            if state.is_terminal() {
                state.trim_history();
            }
        }
    }
}

/// Requirement ids extracted from missing-requirement patterns in the
/// spec-compliance stage issues.
fn missing_requirements(result: &crate::quality::QualityGateResult) -> Vec<String> {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    let (not_addressed, partial) = PATTERNS.get_or_init(|| {
        (
            Regex::new(r"requirement (REQ-\w+) is not addressed").expect("valid regex"),
            Regex::new(r"requirement (REQ-\w+) appears only partially").expect("valid regex"),
        )
    });

    let Some(stage) = result.stages.get(crate::quality::config::STAGE_SPEC_COMPLIANCE) else {
        return Vec::new();
    };

    let mut ids = Vec::new();
    for issue in &stage.issues {
        for regex in [not_addressed, partial] {
            for capture in regex.captures_iter(issue) {
                let id = capture[1].to_string();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}
