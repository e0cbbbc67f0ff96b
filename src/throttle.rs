//! Two-layer tool-call throttle for a single teammate session.
//!
//! Layer 1 is a hard lifetime cap per tool name. It never resets and cannot
//! be gamed by varying inputs; at the cap the agent is told to stop calling
//! and report what it has.
//!
//! Layer 2 is an AIMD sliding window: the budget doubles during slow-start
//! up to `ssthresh`, grows by one per diverse success up to `max_window`,
//! and halves on failures or repeated near-identical calls.

use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Key under which the fallback cap is reported by [`ToolCallThrottle::resolved_budgets`].
pub const DEFAULT_BUDGET_KEY: &str = "_default";

/// Lifetime cap for tools absent from the default table and the overrides.
const DEFAULT_TOOL_CAP: u32 = 15;

/// Input prefix length used for similarity comparison.
const INPUT_PREFIX_LEN: usize = 100;

/// How many recent calls to compare against for similarity.
const SIMILARITY_LOOKBACK: usize = 3;

/// Ring capacity for recent-call bookkeeping.
const RECENT_RING_CAP: usize = 50;

/// Built-in lifetime caps per tool.
fn default_tool_caps() -> HashMap<String, u32> {
    let mut caps = HashMap::new();
    caps.insert("WebSearch".to_string(), 7);
    caps.insert("WebFetch".to_string(), 10);
    caps.insert("Bash".to_string(), 10);
    caps.insert("Read".to_string(), 20);
    caps.insert("Grep".to_string(), 20);
    caps.insert("Glob".to_string(), 20);
    caps.insert("Edit".to_string(), 15);
    caps.insert("Write".to_string(), 10);
    caps
}

/// Throttle tuning knobs.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Per-tool lifetime cap overrides, merged over the built-in table.
    pub max_calls_per_tool: HashMap<String, u32>,
    /// Starting window budget.
    pub initial_window: u32,
    /// Slow-start threshold; doubling stops here.
    pub ssthresh: u32,
    /// Window budget ceiling.
    pub max_window: u32,
    /// Sliding-window span.
    pub window: Duration,
    /// Backoffs tolerated before the tool is blocked outright.
    pub max_backoffs: u32,
    /// Cooldown applied on each backoff.
    pub cooldown: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_calls_per_tool: HashMap::new(),
            initial_window: 2,
            ssthresh: 8,
            max_window: 15,
            window: Duration::seconds(60),
            max_backoffs: 3,
            cooldown: Duration::seconds(10),
        }
    }
}

#[derive(Debug, Clone)]
struct RecentCall {
    at: DateTime<Utc>,
    prefix: String,
}

#[derive(Debug)]
struct ToolState {
    total_calls: u64,
    budget: u32,
    recent: VecDeque<RecentCall>,
    backoff_count: u32,
    cooldown_until: Option<DateTime<Utc>>,
    slow_start: bool,
    blocked: bool,
    block_reason: Option<String>,
}

impl ToolState {
    fn new(initial_window: u32) -> Self {
        Self {
            total_calls: 0,
            budget: initial_window,
            recent: VecDeque::new(),
            backoff_count: 0,
            cooldown_until: None,
            slow_start: true,
            blocked: false,
            block_reason: None,
        }
    }

    fn calls_in_window(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.recent
            .iter()
            .filter(|call| now - call.at <= window)
            .count()
    }
}

/// Verdict for one prospective tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ThrottleDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Read-only view of one tool's throttle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStateView {
    pub budget: u32,
    pub calls_in_window: usize,
    pub blocked: bool,
    pub cooldown_active: bool,
    pub slow_start: bool,
    pub total_calls: u64,
    pub max_calls: u32,
}

/// Per-session tool-call throttle.
pub struct ToolCallThrottle {
    config: ThrottleConfig,
    clock: SharedClock,
    caps: HashMap<String, u32>,
    tools: HashMap<String, ToolState>,
}

impl ToolCallThrottle {
    pub fn new(config: ThrottleConfig, clock: SharedClock) -> Self {
        let mut caps = default_tool_caps();
        for (tool, cap) in &config.max_calls_per_tool {
            caps.insert(tool.clone(), *cap);
        }
        Self {
            config,
            clock,
            caps,
            tools: HashMap::new(),
        }
    }

    fn cap_for(&self, tool: &str) -> u32 {
        self.caps.get(tool).copied().unwrap_or(DEFAULT_TOOL_CAP)
    }

    fn hard_cap_reason(tool: &str, cap: u32) -> String {
        format!(
            "Hard call budget for {tool} reached ({cap} calls). \
             Synthesize your findings and report them to the team-lead \
             with SendMessage; further {tool} calls will not be allowed."
        )
    }

    /// Gate one prospective call. Allowed calls count against both layers.
    pub fn check(&mut self, tool: &str, input: &str) -> ThrottleDecision {
        let now = self.clock.now();
        let cap = self.cap_for(tool);
        let window = self.config.window;
        let cooldown = self.config.cooldown;
        let initial_window = self.config.initial_window;
        let max_backoffs = self.config.max_backoffs;

        let state = self
            .tools
            .entry(tool.to_string())
            .or_insert_with(|| ToolState::new(initial_window));

        if state.blocked {
            let reason = state
                .block_reason
                .clone()
                .unwrap_or_else(|| default_block_reason(tool));
            return ThrottleDecision::denied(reason);
        }

        // Layer 1: the lifetime cap. Never resets.
        if state.total_calls >= u64::from(cap) {
            state.blocked = true;
            let reason = Self::hard_cap_reason(tool, cap);
            state.block_reason = Some(reason.clone());
            tracing::warn!(tool, cap, "tool hard budget exhausted");
            return ThrottleDecision::denied(reason);
        }

        if let Some(until) = state.cooldown_until {
            if now < until {
                return ThrottleDecision::denied(format!(
                    "{tool} is cooling down after repeated similar calls; retry after the cooldown."
                ));
            }
            state.cooldown_until = None;
        }

        let prefix: String = input.chars().take(INPUT_PREFIX_LEN).collect();
        let similar = state
            .recent
            .iter()
            .rev()
            .take(SIMILARITY_LOOKBACK)
            .any(|call| call.prefix == prefix);

        // Layer 2: the AIMD window.
        if state.calls_in_window(now, window) >= state.budget as usize {
            if similar {
                state.budget = (state.budget / 2).max(initial_window);
                state.slow_start = false;
                state.cooldown_until = Some(now + cooldown);
                state.backoff_count += 1;
                if state.backoff_count >= max_backoffs {
                    state.blocked = true;
                    state.block_reason = Some(default_block_reason(tool));
                }
                tracing::debug!(
                    tool,
                    backoff = state.backoff_count,
                    "throttle backoff on repeated similar call"
                );
                return ThrottleDecision::denied(format!(
                    "{tool} window budget exhausted by near-identical calls; backing off."
                ));
            }
            return ThrottleDecision::denied(format!(
                "{tool} window budget exhausted; wait for the window to slide."
            ));
        }

        state.total_calls += 1;
        state.recent.push_back(RecentCall { at: now, prefix });
        while state.recent.len() > RECENT_RING_CAP {
            state.recent.pop_front();
        }
        ThrottleDecision::allowed()
    }

    /// Report a successful, diverse call; grows the window budget.
    pub fn record_success(&mut self, tool: &str) {
        let initial_window = self.config.initial_window;
        let ssthresh = self.config.ssthresh;
        let max_window = self.config.max_window;
        let state = self
            .tools
            .entry(tool.to_string())
            .or_insert_with(|| ToolState::new(initial_window));
        if state.slow_start {
            state.budget = (state.budget * 2).min(ssthresh);
            if state.budget >= ssthresh {
                state.slow_start = false;
            }
        } else {
            state.budget = (state.budget + 1).min(max_window);
        }
    }

    /// Report a failed call; halves the window budget.
    pub fn record_failure(&mut self, tool: &str) {
        let initial_window = self.config.initial_window;
        let state = self
            .tools
            .entry(tool.to_string())
            .or_insert_with(|| ToolState::new(initial_window));
        state.budget = (state.budget / 2).max(initial_window);
        state.slow_start = false;
    }

    /// Block one tool outright. Other tools keep working.
    pub fn hard_block_tool(&mut self, tool: &str, reason: Option<String>) {
        let initial_window = self.config.initial_window;
        let state = self
            .tools
            .entry(tool.to_string())
            .or_insert_with(|| ToolState::new(initial_window));
        state.blocked = true;
        state.block_reason = Some(reason.unwrap_or_else(|| default_block_reason(tool)));
        tracing::warn!(tool, "tool hard-blocked");
    }

    /// Observability view of one tool's state.
    pub fn get_tool_state(&self, tool: &str) -> ToolStateView {
        let now = self.clock.now();
        let cap = self.cap_for(tool);
        match self.tools.get(tool) {
            Some(state) => ToolStateView {
                budget: state.budget,
                calls_in_window: state.calls_in_window(now, self.config.window),
                blocked: state.blocked,
                cooldown_active: state.cooldown_until.is_some_and(|until| now < until),
                slow_start: state.slow_start,
                total_calls: state.total_calls,
                max_calls: cap,
            },
            None => ToolStateView {
                budget: self.config.initial_window,
                calls_in_window: 0,
                blocked: false,
                cooldown_active: false,
                slow_start: true,
                total_calls: 0,
                max_calls: cap,
            },
        }
    }

    /// The merged cap table, including the `_default` fallback, for
    /// injection into agent prompts.
    pub fn resolved_budgets(&self) -> HashMap<String, u32> {
        let mut budgets = self.caps.clone();
        budgets.insert(DEFAULT_BUDGET_KEY.to_string(), DEFAULT_TOOL_CAP);
        budgets
    }
}

fn default_block_reason(tool: &str) -> String {
    format!(
        "{tool} is blocked — try a different tool, or synthesize your findings \
         and send them to the team-lead with SendMessage."
    )
}
