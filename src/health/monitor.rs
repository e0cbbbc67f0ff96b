//! Periodic teammate health checks.
//!
//! One monitor serves many teams. Activity is recorded as it streams in;
//! `check_health` walks each teammate and emits stall, error-loop,
//! retry-storm, and context-exhaustion events, debounced per
//! `(team, teammate, issue kind)`.

use crate::clock::SharedClock;
use crate::events::{EventBus, HealthEvent};
use crate::health::profiles::{StallProfileOverride, resolve_profile};
use crate::team::types::{MAX_HEALTH_ISSUES, MAX_RECENT_TOOL_CALLS};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Input prefix length compared for retry-storm detection.
const INPUT_PREFIX_LEN: usize = 100;

/// Result previews are capped to this many characters.
const RESULT_PREVIEW_LEN: usize = 500;

/// Tools whose repetition is often legitimate get a laxer warn threshold.
const RESEARCH_TOOLS: [&str; 5] = ["WebSearch", "WebFetch", "Read", "Grep", "Glob"];

/// Warn threshold for research tools.
const RESEARCH_TOOL_WARN_THRESHOLD: u32 = 10;

/// Retry-storm escalation stages. A stage never regresses except via an
/// approach change (different tool or input).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RetryStormStage {
    #[default]
    None,
    Warned,
    Throttled,
    Killed,
}

/// Activity reported for a teammate.
#[derive(Debug, Clone)]
pub enum ToolActivity {
    ToolCall { tool: String, input: String },
    ToolResult {
        tool: String,
        is_error: bool,
        preview: String,
    },
    ContextUsage(f32),
}

/// Kinds of detected issues; also the debounce key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthIssueKind {
    Stall,
    SoftProbe,
    ErrorLoop,
    RetryStorm,
    RetryStormThrottle,
    RetryStormKill,
    ContextExhaustion,
}

/// One detected issue, kept in the teammate's bounded issue list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub kind: HealthIssueKind,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RecordedCall {
    tool: String,
    prefix: String,
}

#[derive(Debug, Clone)]
struct HealthState {
    teammate_name: String,
    model: String,
    last_activity_at: DateTime<Utc>,
    current_task_id: Option<String>,
    consecutive_errors: u32,
    last_error_tool: Option<String>,
    recent_calls: VecDeque<RecordedCall>,
    recent_results: VecDeque<String>,
    context_usage: f32,
    storm_stage: RetryStormStage,
    storm_count: u32,
    issues: Vec<HealthIssue>,
}

impl HealthState {
    fn new(name: String, model: String, now: DateTime<Utc>) -> Self {
        Self {
            teammate_name: name,
            model,
            last_activity_at: now,
            current_task_id: None,
            consecutive_errors: 0,
            last_error_tool: None,
            recent_calls: VecDeque::new(),
            recent_results: VecDeque::new(),
            context_usage: 0.0,
            storm_stage: RetryStormStage::None,
            storm_count: 0,
            issues: Vec::new(),
        }
    }

    /// Length of the run of identical (tool, prefix) calls at the tail of
    /// the ring.
    fn tail_run(&self) -> (u32, Option<&RecordedCall>) {
        let Some(last) = self.recent_calls.back() else {
            return (0, None);
        };
        let run = self
            .recent_calls
            .iter()
            .rev()
            .take_while(|call| call.tool == last.tool && call.prefix == last.prefix)
            .count() as u32;
        (run, Some(last))
    }
}

/// Read-only snapshot of one teammate's health state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStateView {
    pub teammate_name: String,
    pub model: String,
    pub last_activity_at: DateTime<Utc>,
    pub current_task_id: Option<String>,
    pub consecutive_errors: u32,
    pub last_error_tool: Option<String>,
    pub recent_call_count: usize,
    pub recent_results: Vec<String>,
    pub context_usage: f32,
    pub storm_stage: RetryStormStage,
    pub storm_count: u32,
    pub issues: Vec<HealthIssue>,
}

/// Monitor tuning knobs.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Fallback stall timeout for teammates with no model profile.
    pub stall_timeout: Duration,
    /// Consecutive same-tool errors before an error-loop fires.
    pub error_loop_threshold: u32,
    /// Retry-storm warn threshold for non-research tools.
    pub retry_storm_threshold: u32,
    /// Context-usage warning level, 0..1.
    pub context_warning_threshold: f32,
    /// Period of the per-team check timer.
    pub check_interval: std::time::Duration,
    /// Minimum spacing between identical issue emissions.
    pub debounce_interval: Duration,
    /// Per-model stall profile overrides.
    pub profile_overrides: HashMap<String, StallProfileOverride>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::seconds(300),
            error_loop_threshold: 3,
            retry_storm_threshold: 5,
            context_warning_threshold: 0.85,
            check_interval: std::time::Duration::from_secs(30),
            debounce_interval: Duration::seconds(120),
            profile_overrides: HashMap::new(),
        }
    }
}

/// Called when a retry storm reaches the kill stage, so the session's
/// throttle can hard-block the offending tool.
pub type BlockHook = Arc<dyn Fn(&str, &str, &str, String) + Send + Sync>;

struct Inner {
    teams: HashMap<String, HashMap<String, HealthState>>,
    debounce: HashMap<(String, String, HealthIssueKind), DateTime<Utc>>,
    timers: HashMap<String, JoinHandle<()>>,
    block_hook: Option<BlockHook>,
}

/// Teammate health monitor.
#[derive(Clone)]
pub struct HealthMonitor {
    config: Arc<HealthConfig>,
    clock: SharedClock,
    bus: EventBus,
    inner: Arc<Mutex<Inner>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, clock: SharedClock, bus: EventBus) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            bus,
            inner: Arc::new(Mutex::new(Inner {
                teams: HashMap::new(),
                debounce: HashMap::new(),
                timers: HashMap::new(),
                block_hook: None,
            })),
        }
    }

    /// Install the kill-stage hook. Typically wired to
    /// `ToolCallThrottle::hard_block_tool` for the teammate's session.
    pub fn set_block_hook(&self, hook: BlockHook) {
        self.inner.lock().expect("health lock").block_hook = Some(hook);
    }

    /// Register a teammate with its model so stall checks use the right
    /// profile. Idempotent; updates name and model on repeat calls.
    pub fn register_teammate(
        &self,
        team_id: &str,
        teammate_id: &str,
        name: &str,
        model: &str,
    ) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("health lock");
        let state = inner
            .teams
            .entry(team_id.to_string())
            .or_default()
            .entry(teammate_id.to_string())
            .or_insert_with(|| HealthState::new(name.to_string(), model.to_string(), now));
        state.teammate_name = name.to_string();
        state.model = model.to_string();
    }

    /// Set or clear the task currently held by a teammate.
    pub fn set_current_task(&self, team_id: &str, teammate_id: &str, task_id: Option<String>) {
        let mut inner = self.inner.lock().expect("health lock");
        if let Some(state) = inner
            .teams
            .get_mut(team_id)
            .and_then(|team| team.get_mut(teammate_id))
        {
            state.current_task_id = task_id;
        }
    }

    /// Record one piece of teammate activity.
    pub fn record_activity(
        &self,
        team_id: &str,
        teammate_id: &str,
        name: &str,
        activity: ToolActivity,
    ) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("health lock");
        let state = inner
            .teams
            .entry(team_id.to_string())
            .or_default()
            .entry(teammate_id.to_string())
            .or_insert_with(|| HealthState::new(name.to_string(), String::new(), now));

        state.last_activity_at = now;

        match activity {
            ToolActivity::ToolCall { tool, input } => {
                let prefix: String = input.chars().take(INPUT_PREFIX_LEN).collect();
                if state.storm_stage != RetryStormStage::None {
                    let changed = state
                        .recent_calls
                        .back()
                        .map(|prev| prev.tool != tool || prev.prefix != prefix)
                        .unwrap_or(true);
                    if changed {
                        // The agent changed approach. Stop punishing it.
                        state.storm_stage = RetryStormStage::None;
                        state.storm_count = 0;
                    }
                }
                state.recent_calls.push_back(RecordedCall { tool, prefix });
                while state.recent_calls.len() > MAX_RECENT_TOOL_CALLS {
                    state.recent_calls.pop_front();
                }
            }
            ToolActivity::ToolResult {
                tool,
                is_error,
                preview,
            } => {
                if is_error {
                    if state.last_error_tool.as_deref() == Some(tool.as_str()) {
                        state.consecutive_errors += 1;
                    } else {
                        state.consecutive_errors = 1;
                        state.last_error_tool = Some(tool);
                    }
                } else {
                    state.consecutive_errors = 0;
                    state.last_error_tool = None;
                    let preview: String = preview.chars().take(RESULT_PREVIEW_LEN).collect();
                    state.recent_results.push_back(preview);
                    while state.recent_results.len() > MAX_RECENT_TOOL_CALLS {
                        state.recent_results.pop_front();
                    }
                }
            }
            ToolActivity::ContextUsage(usage) => {
                state.context_usage = usage;
            }
        }
    }

    /// Run one health sweep over a team, emitting debounced events.
    pub fn check_health(&self, team_id: &str) {
        let now = self.clock.now();
        let mut events: Vec<HealthEvent> = Vec::new();
        let mut kills: Vec<(String, String)> = Vec::new();

        {
            let mut inner = self.inner.lock().expect("health lock");
            let Inner {
                teams,
                debounce,
                block_hook: _,
                ..
            } = &mut *inner;
            let Some(team) = teams.get_mut(team_id) else {
                return;
            };

            for (teammate_id, state) in team.iter_mut() {
                // (a) stall, with the model-aware profile.
                if state.current_task_id.is_some() {
                    let profile =
                        resolve_profile(&state.model, &self.config.profile_overrides);
                    let silence = now - state.last_activity_at;
                    let silent_secs = silence.num_seconds().max(0) as u64;
                    if silence >= profile.hard_stall {
                        if allow_emit(
                            debounce,
                            team_id,
                            teammate_id,
                            HealthIssueKind::Stall,
                            now,
                            self.config.debounce_interval,
                        ) {
                            record_issue(
                                state,
                                HealthIssueKind::Stall,
                                format!("silent for {silent_secs}s"),
                                now,
                            );
                            events.push(HealthEvent::Stall {
                                team_id: team_id.to_string(),
                                teammate_id: teammate_id.clone(),
                                teammate_name: state.teammate_name.clone(),
                                silent_for_secs: silent_secs,
                                task_id: state.current_task_id.clone(),
                            });
                        }
                    } else if silence >= profile.soft_probe
                        && allow_emit(
                            debounce,
                            team_id,
                            teammate_id,
                            HealthIssueKind::SoftProbe,
                            now,
                            self.config.debounce_interval,
                        )
                    {
                        events.push(HealthEvent::SoftProbe {
                            team_id: team_id.to_string(),
                            teammate_id: teammate_id.clone(),
                            silent_for_secs: silent_secs,
                        });
                    }
                }

                // (b) error loop.
                if state.consecutive_errors >= self.config.error_loop_threshold
                    && let Some(tool) = state.last_error_tool.clone()
                    && allow_emit(
                        debounce,
                        team_id,
                        teammate_id,
                        HealthIssueKind::ErrorLoop,
                        now,
                        self.config.debounce_interval,
                    )
                {
                    record_issue(
                        state,
                        HealthIssueKind::ErrorLoop,
                        format!("{} consecutive {tool} errors", state.consecutive_errors),
                        now,
                    );
                    events.push(HealthEvent::ErrorLoop {
                        team_id: team_id.to_string(),
                        teammate_id: teammate_id.clone(),
                        tool,
                        consecutive_errors: state.consecutive_errors,
                    });
                }

                // (c) retry storm.
                let (run, last) = state.tail_run();
                if let Some(last) = last {
                    let tool = last.tool.clone();
                    let warn = if RESEARCH_TOOLS.contains(&tool.as_str()) {
                        RESEARCH_TOOL_WARN_THRESHOLD
                    } else {
                        self.config.retry_storm_threshold
                    };
                    let throttle_at = warn + 3;
                    let kill_at = warn + 7;

                    let target = if run >= kill_at {
                        RetryStormStage::Killed
                    } else if run >= throttle_at {
                        RetryStormStage::Throttled
                    } else if run >= warn {
                        RetryStormStage::Warned
                    } else {
                        RetryStormStage::None
                    };

                    if target > state.storm_stage {
                        state.storm_stage = target;
                        state.storm_count = run;
                        let (kind, event) = match target {
                            RetryStormStage::Warned => (
                                HealthIssueKind::RetryStorm,
                                HealthEvent::RetryStorm {
                                    team_id: team_id.to_string(),
                                    teammate_id: teammate_id.clone(),
                                    tool: tool.clone(),
                                    count: run,
                                },
                            ),
                            RetryStormStage::Throttled => (
                                HealthIssueKind::RetryStormThrottle,
                                HealthEvent::RetryStormThrottle {
                                    team_id: team_id.to_string(),
                                    teammate_id: teammate_id.clone(),
                                    tool: tool.clone(),
                                    count: run,
                                },
                            ),
                            RetryStormStage::Killed => (
                                HealthIssueKind::RetryStormKill,
                                HealthEvent::RetryStormKill {
                                    team_id: team_id.to_string(),
                                    teammate_id: teammate_id.clone(),
                                    tool: tool.clone(),
                                    count: run,
                                },
                            ),
                            RetryStormStage::None => unreachable!(),
                        };
                        if allow_emit(debounce, team_id, teammate_id, kind, now,
                            self.config.debounce_interval)
                        {
                            record_issue(
                                state,
                                kind,
                                format!("{run} near-identical {tool} calls"),
                                now,
                            );
                            if target == RetryStormStage::Killed {
                                kills.push((teammate_id.clone(), tool.clone()));
                            }
                            events.push(event);
                        }
                    }
                }

                // (d) context exhaustion.
                if state.context_usage >= self.config.context_warning_threshold
                    && allow_emit(
                        debounce,
                        team_id,
                        teammate_id,
                        HealthIssueKind::ContextExhaustion,
                        now,
                        self.config.debounce_interval,
                    )
                {
                    record_issue(
                        state,
                        HealthIssueKind::ContextExhaustion,
                        format!("context usage at {:.0}%", state.context_usage * 100.0),
                        now,
                    );
                    events.push(HealthEvent::ContextExhaustion {
                        team_id: team_id.to_string(),
                        teammate_id: teammate_id.clone(),
                        usage: state.context_usage,
                    });
                }
            }
        }

        if !kills.is_empty() {
            let hook = self.inner.lock().expect("health lock").block_hook.clone();
            if let Some(hook) = hook {
                for (teammate_id, tool) in &kills {
                    hook(
                        team_id,
                        teammate_id,
                        tool,
                        format!("retry storm on {tool}: agent killed after repeated identical calls"),
                    );
                }
            }
        }

        for event in events {
            tracing::warn!(team_id, event = ?event, "health issue detected");
            self.bus.emit(event);
        }
    }

    /// Start the periodic check timer for a team. Idempotent.
    pub fn start_monitoring(&self, team_id: &str) {
        let mut inner = self.inner.lock().expect("health lock");
        if inner.timers.contains_key(team_id) {
            return;
        }
        let monitor = self.clone();
        let team = team_id.to_string();
        let interval = self.config.check_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                monitor.check_health(&team);
            }
        });
        inner.timers.insert(team_id.to_string(), handle);
    }

    /// Stop the periodic check timer for a team. Idempotent.
    pub fn stop_monitoring(&self, team_id: &str) {
        let mut inner = self.inner.lock().expect("health lock");
        if let Some(handle) = inner.timers.remove(team_id) {
            handle.abort();
        }
    }

    /// Forget one teammate. Idempotent.
    pub fn remove_teammate(&self, team_id: &str, teammate_id: &str) {
        let mut inner = self.inner.lock().expect("health lock");
        if let Some(team) = inner.teams.get_mut(team_id) {
            team.remove(teammate_id);
        }
        inner
            .debounce
            .retain(|(t, tm, _), _| !(t == team_id && tm == teammate_id));
    }

    /// Forget a whole team and stop its timer. Idempotent.
    pub fn clear_team(&self, team_id: &str) {
        self.stop_monitoring(team_id);
        let mut inner = self.inner.lock().expect("health lock");
        inner.teams.remove(team_id);
        inner.debounce.retain(|(t, _, _), _| t != team_id);
    }

    /// Drop every timer and all state. Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock().expect("health lock");
        for (_, handle) in inner.timers.drain() {
            handle.abort();
        }
        inner.teams.clear();
        inner.debounce.clear();
    }

    /// Snapshot one teammate's state.
    pub fn state(&self, team_id: &str, teammate_id: &str) -> Option<HealthStateView> {
        let inner = self.inner.lock().expect("health lock");
        inner
            .teams
            .get(team_id)
            .and_then(|team| team.get(teammate_id))
            .map(|state| HealthStateView {
                teammate_name: state.teammate_name.clone(),
                model: state.model.clone(),
                last_activity_at: state.last_activity_at,
                current_task_id: state.current_task_id.clone(),
                consecutive_errors: state.consecutive_errors,
                last_error_tool: state.last_error_tool.clone(),
                recent_call_count: state.recent_calls.len(),
                recent_results: state.recent_results.iter().cloned().collect(),
                context_usage: state.context_usage,
                storm_stage: state.storm_stage,
                storm_count: state.storm_count,
                issues: state.issues.clone(),
            })
    }
}

fn allow_emit(
    debounce: &mut HashMap<(String, String, HealthIssueKind), DateTime<Utc>>,
    team_id: &str,
    teammate_id: &str,
    kind: HealthIssueKind,
    now: DateTime<Utc>,
    interval: Duration,
) -> bool {
    let key = (team_id.to_string(), teammate_id.to_string(), kind);
    match debounce.get(&key) {
        Some(last) if now - *last < interval => false,
        _ => {
            debounce.insert(key, now);
            true
        }
    }
}

fn record_issue(
    state: &mut HealthState,
    kind: HealthIssueKind,
    detail: String,
    now: DateTime<Utc>,
) {
    crate::team::types::push_capped(
        &mut state.issues,
        HealthIssue {
            kind,
            detail,
            at: now,
        },
        MAX_HEALTH_ISSUES,
    );
}
