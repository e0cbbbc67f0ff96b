//! The autonomous-run driver: a phase state machine over the team manager
//! and the injected delegate, with cost, timeout, and remediation circuit
//! breakers.
//!
//! The driver never panics out of a run: delegate failures abort the run
//! with a summary, and `abort`/`pause` flags are consulted at every phase
//! transition and poll tick. In-flight callbacks are not force-cancelled;
//! their results are discarded once a flag is set.

use crate::clock::SharedClock;
use crate::errors::YoloError;
use crate::events::{EventBus, OrchestratorEvent, ReviewEvent, YoloEvent};
use crate::store::TeamStateStore;
use crate::team::TeamManager;
use crate::team::types::{Task, TaskStatus, TeamPhase};
use crate::yolo::{
    IntegrationReport, ProposalStatus, SpecEvolutionProposal, TaskSeed, YoloConfig, YoloDelegate,
    YoloPhase, YoloSnapshot,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Driver for one autonomous run over one team.
pub struct YoloOrchestrator {
    team_id: String,
    config: YoloConfig,
    manager: Arc<TeamManager>,
    delegate: Arc<dyn YoloDelegate>,
    clock: SharedClock,
    state: Mutex<YoloSnapshot>,
    aborted: AtomicBool,
    paused: AtomicBool,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    store: Mutex<Option<Arc<TeamStateStore>>>,
}

impl YoloOrchestrator {
    pub fn new(
        team_id: impl Into<String>,
        manager: Arc<TeamManager>,
        delegate: Arc<dyn YoloDelegate>,
        config: YoloConfig,
    ) -> Self {
        let clock = manager.clock().clone();
        let started_at = clock.now();
        Self {
            team_id: team_id.into(),
            config,
            manager,
            delegate,
            clock,
            state: Mutex::new(YoloSnapshot::new(started_at)),
            aborted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
            store: Mutex::new(None),
        }
    }

    /// Persist every snapshot transition to this store.
    pub fn with_store(self, store: Arc<TeamStateStore>) -> Self {
        *self.store.lock().expect("store lock") = Some(store);
        self
    }

    fn bus(&self) -> &EventBus {
        self.manager.bus()
    }

    pub fn snapshot(&self) -> YoloSnapshot {
        self.state.lock().expect("yolo state lock").clone()
    }

    pub fn phase(&self) -> YoloPhase {
        self.state.lock().expect("yolo state lock").phase
    }

    fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    fn halted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst)
    }

    async fn set_phase(&self, to: YoloPhase) {
        let (from, snapshot) = {
            let mut state = self.state.lock().expect("yolo state lock");
            let from = state.phase;
            state.phase = to;
            (from, state.clone())
        };
        if from == to {
            return;
        }
        tracing::info!(team_id = %self.team_id, %from, %to, "yolo phase changed");
        self.bus().emit(YoloEvent::PhaseChanged {
            team_id: self.team_id.clone(),
            from,
            to,
        });
        self.delegate.on_state_change(&snapshot).await;
        self.persist(&snapshot);
    }

    fn persist(&self, snapshot: &YoloSnapshot) {
        if let Some(store) = self.store.lock().expect("store lock").clone()
            && let Err(error) = store.append_yolo(snapshot)
        {
            tracing::warn!(%error, "yolo snapshot append failed");
        }
    }

    /// Stop phase advancement. No-op once the run is terminal.
    pub async fn pause(&self, reason: &str) {
        if self.is_terminal() || self.paused.load(Ordering::SeqCst) {
            return;
        }
        self.paused.store(true, Ordering::SeqCst);
        {
            let mut state = self.state.lock().expect("yolo state lock");
            state.pause_reason = Some(reason.to_string());
        }
        tracing::warn!(team_id = %self.team_id, reason, "yolo run paused");
        self.set_phase(YoloPhase::Paused).await;
    }

    /// Clear the pause flag. No-op when the run is terminal.
    pub fn resume(&self) {
        if self.is_terminal() {
            return;
        }
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Non-reversible abort. Detaches only this orchestrator's listeners.
    pub async fn abort(&self, reason: &str) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().expect("yolo state lock");
            if state.summary.is_none() {
                state.summary = Some(format!("aborted: {reason}"));
            }
        }
        tracing::warn!(team_id = %self.team_id, reason, "yolo run aborted");
        self.set_phase(YoloPhase::Aborted).await;
        self.detach_watchers();
    }

    async fn fail_run(&self, context: String) {
        tracing::error!(team_id = %self.team_id, %context, "yolo run failed");
        self.abort(&context).await;
    }

    fn detach_watchers(&self) {
        let mut watchers = self.watchers.lock().expect("watchers lock");
        for handle in watchers.drain(..) {
            handle.abort();
        }
    }

    fn start_watchers(self: &Arc<Self>) {
        let mut watchers = self.watchers.lock().expect("watchers lock");

        // Timeout breaker.
        let me = Arc::clone(self);
        watchers.push(tokio::spawn(async move {
            tokio::time::sleep(me.config.timeout).await;
            me.pause("timeout").await;
        }));

        // Cost breaker.
        let me = Arc::clone(self);
        watchers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(me.config.cost_check_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if me.is_terminal() {
                    break;
                }
                if let Ok(summary) = me.manager.cost_summary(&me.team_id)
                    && summary.total_cost_usd() >= me.config.cost_cap_usd
                {
                    me.pause("cost-cap").await;
                    break;
                }
            }
        }));

        // Spec-evolution listener over the shared bus. The receiver is ours
        // alone; aborting this task detaches exactly our handler.
        if self.config.adaptive_specs {
            let me = Arc::clone(self);
            let mut rx = self.bus().subscribe();
            watchers.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(OrchestratorEvent::Review(ReviewEvent::Failed {
                            task_id,
                            report,
                            ..
                        })) => {
                            me.propose_spec_evolution(&task_id, &report).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
    }

    /// Create a spec-change proposal from an observed review failure.
    pub async fn propose_spec_evolution(&self, task_id: &str, trigger: &str) {
        let mut proposal = SpecEvolutionProposal::new(
            task_id,
            trigger,
            format!("Revisit the spec requirements exercised by task {task_id}"),
        );

        if self.config.require_approval_for_spec_changes {
            let approved = self
                .delegate
                .request_approval(&proposal)
                .await
                .unwrap_or(false);
            proposal.status = if approved {
                ProposalStatus::Approved
            } else {
                ProposalStatus::Rejected
            };
        } else {
            proposal.status = ProposalStatus::Approved;
        }

        {
            let mut state = self.state.lock().expect("yolo state lock");
            state.pending_proposals.push(proposal.clone());
        }
        self.bus().emit(YoloEvent::SpecEvolutionProposed {
            team_id: self.team_id.clone(),
            proposal,
        });
    }

    /// Drive the full run. Returns the final snapshot; delegate failures
    /// abort the run rather than propagating.
    pub async fn run(self: Arc<Self>, objective: &str) -> Result<YoloSnapshot, YoloError> {
        {
            let mut state = self.state.lock().expect("yolo state lock");
            if state.phase != YoloPhase::Idle {
                return Err(YoloError::AlreadyTerminal {
                    phase: state.phase.to_string(),
                });
            }
            state.started_at = self.clock.now();
        }
        self.start_watchers();

        // Spec generation.
        self.set_phase(YoloPhase::SpecGeneration).await;
        let spec = match self.delegate.generate_spec(objective).await {
            Ok(spec) => spec,
            Err(error) => {
                self.fail_run(format!("spec generation failed: {error}")).await;
                return Ok(self.snapshot());
            }
        };
        if self.halted() {
            return Ok(self.snapshot());
        }
        self.manager.set_spec(&self.team_id, spec.clone());

        // Decomposition.
        self.set_phase(YoloPhase::TaskDecomposition).await;
        let seeds = match self.delegate.decompose_into_tasks(&spec).await {
            Ok(seeds) => seeds,
            Err(error) => {
                self.fail_run(format!("task decomposition failed: {error}")).await;
                return Ok(self.snapshot());
            }
        };
        if self.halted() {
            return Ok(self.snapshot());
        }
        if let Err(error) = self.register_tasks(seeds) {
            self.fail_run(format!("task registration failed: {error}")).await;
            return Ok(self.snapshot());
        }

        // Execution.
        self.set_phase(YoloPhase::Executing).await;
        self.execute_tasks().await;
        if self.halted() {
            return Ok(self.snapshot());
        }

        // Integration with remediation rounds.
        loop {
            self.set_phase(YoloPhase::IntegrationCheck).await;
            let report = match self.delegate.run_integration_check(&self.team_id).await {
                Ok(report) => report,
                Err(error) => {
                    self.fail_run(format!("integration check failed: {error}")).await;
                    return Ok(self.snapshot());
                }
            };
            if self.halted() {
                return Ok(self.snapshot());
            }
            if report.passed {
                break;
            }
            if !self.begin_remediation(&report).await {
                return Ok(self.snapshot());
            }
            self.set_phase(YoloPhase::Executing).await;
            self.execute_remediation().await;
            if self.halted() {
                return Ok(self.snapshot());
            }
        }

        // Synthesis.
        self.set_phase(YoloPhase::Synthesizing).await;
        let completed: Vec<Task> = self
            .manager
            .tasks(&self.team_id)
            .into_iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .collect();
        match self.delegate.synthesize(&self.team_id, &completed).await {
            Ok(summary) => {
                let mut state = self.state.lock().expect("yolo state lock");
                state.summary = Some(summary);
            }
            Err(error) => {
                self.fail_run(format!("synthesis failed: {error}")).await;
                return Ok(self.snapshot());
            }
        }
        if self.halted() {
            return Ok(self.snapshot());
        }

        {
            let mut state = self.state.lock().expect("yolo state lock");
            state.completed_at = Some(self.clock.now());
        }
        self.set_phase(YoloPhase::Completed).await;
        self.detach_watchers();
        Ok(self.snapshot())
    }

    /// Register decomposed tasks and their phases with the manager.
    fn register_tasks(&self, seeds: Vec<TaskSeed>) -> Result<(), crate::errors::ForemanError> {
        let mut phases: HashMap<String, TeamPhase> = HashMap::new();
        for seed in seeds {
            let mut task = Task::new(
                &seed.title,
                &seed.description,
                "yolo",
                self.clock.now(),
            )
            .with_requirements(seed.requirement_ids.clone())
            .with_dependencies(seed.depends_on.clone());
            if let Some(task_type) = seed.task_type {
                task = task.with_task_type(task_type);
            }
            if let (Some(name), Some(order)) = (&seed.phase_name, seed.phase_order) {
                let phase = phases
                    .entry(name.clone())
                    .or_insert_with(|| TeamPhase::new(name.clone(), order));
                task = task.with_phase(&phase.id, order);
                phase.task_ids.push(task.id.clone());
            }
            self.manager.create_task(&self.team_id, task)?;
        }
        if !phases.is_empty() {
            self.manager
                .set_phases(&self.team_id, phases.into_values().collect());
        }
        Ok(())
    }

    /// Execute all registered tasks, phase-by-phase when phases exist.
    async fn execute_tasks(&self) {
        let tasks = self.manager.tasks(&self.team_id);
        let phased = tasks.iter().any(|task| task.phase_order.is_some());

        if !phased {
            self.run_batches(&tasks).await;
            return;
        }

        let mut phases = self.manager.phases(&self.team_id);
        phases.sort_by_key(|phase| phase.order);
        for phase in phases {
            if self.halted() {
                return;
            }
            let _ = self.manager.start_phase(&self.team_id, &phase.id);
            let phase_tasks: Vec<Task> = self
                .manager
                .tasks(&self.team_id)
                .into_iter()
                .filter(|task| phase.task_ids.contains(&task.id))
                .collect();
            self.run_batches(&phase_tasks).await;
            if self.halted() {
                return;
            }
            if let Err(error) = self.manager.complete_phase(&self.team_id, &phase.id) {
                tracing::warn!(%error, phase = %phase.name, "phase left incomplete");
            }
        }
    }

    async fn run_batches(&self, tasks: &[Task]) {
        for batch in tasks.chunks(self.config.max_concurrency.max(1)) {
            if self.halted() {
                return;
            }
            if let Err(error) = self.delegate.spawn_and_assign(&self.team_id, batch).await {
                self.fail_run(format!("spawn failed: {error}")).await;
                return;
            }
            let ids: Vec<String> = batch.iter().map(|task| task.id.clone()).collect();
            self.wait_for_terminal(&ids).await;
        }
    }

    /// Poll until every listed task is terminal, the run halts, or the
    /// safety ceiling passes.
    async fn wait_for_terminal(&self, ids: &[String]) {
        let deadline = tokio::time::Instant::now() + self.config.wait_ceiling;
        loop {
            if self.halted() {
                return;
            }
            let tasks = self.manager.tasks(&self.team_id);
            let all_terminal = ids.iter().all(|id| {
                tasks
                    .iter()
                    .find(|task| task.id == *id)
                    .map(|task| task.is_terminal())
                    .unwrap_or(true)
            });
            if all_terminal {
                if self.phase() == YoloPhase::Reviewing {
                    self.set_phase(YoloPhase::Executing).await;
                }
                return;
            }

            // Surface review churn in the phase machine.
            let any_in_review = ids.iter().any(|id| {
                tasks
                    .iter()
                    .find(|task| task.id == *id)
                    .is_some_and(|task| task.status == TaskStatus::InReview)
            });
            if any_in_review && self.phase() == YoloPhase::Executing {
                self.set_phase(YoloPhase::Reviewing).await;
            } else if !any_in_review && self.phase() == YoloPhase::Reviewing {
                self.set_phase(YoloPhase::Executing).await;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(team_id = %self.team_id, "task wait hit the safety ceiling");
                return;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Record a remediation round, or abort when past the limit. Returns
    /// false when the run aborted.
    async fn begin_remediation(&self, report: &IntegrationReport) -> bool {
        let round = {
            let state = self.state.lock().expect("yolo state lock");
            state.remediation_round
        };
        if round >= self.config.max_remediation_rounds {
            let summary = format!(
                "integration failed after {round} remediation rounds: {}",
                report.issues.join("; ")
            );
            {
                let mut state = self.state.lock().expect("yolo state lock");
                state.summary = Some(summary.clone());
            }
            self.aborted.store(true, Ordering::SeqCst);
            self.set_phase(YoloPhase::Aborted).await;
            self.detach_watchers();
            return false;
        }

        self.set_phase(YoloPhase::Remediating).await;
        let mut ids = Vec::new();
        for issue in &report.issues {
            let task = Task::new(
                format!("Remediate integration failure: {issue}"),
                issue.clone(),
                "yolo",
                self.clock.now(),
            )
            .with_task_type(crate::team::types::TaskType::Remediation);
            ids.push(task.id.clone());
            if let Err(error) = self.manager.create_task(&self.team_id, task) {
                tracing::warn!(%error, "remediation task registration failed");
            }
        }
        {
            let mut state = self.state.lock().expect("yolo state lock");
            state.remediation_round += 1;
            state.remediation_task_ids = ids;
        }
        true
    }

    async fn execute_remediation(&self) {
        let ids = {
            let state = self.state.lock().expect("yolo state lock");
            state.remediation_task_ids.clone()
        };
        let tasks: Vec<Task> = self
            .manager
            .tasks(&self.team_id)
            .into_iter()
            .filter(|task| ids.contains(&task.id))
            .collect();
        self.run_batches(&tasks).await;
    }
}
