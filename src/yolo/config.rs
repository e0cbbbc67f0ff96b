//! Autonomous-run configuration and circuit-breaker limits.

use std::time::Duration;

/// Tuning for one autonomous run.
#[derive(Debug, Clone)]
pub struct YoloConfig {
    /// Abort spending past this.
    pub cost_cap_usd: f64,
    /// Wall-clock ceiling for the whole run.
    pub timeout: Duration,
    /// Tasks executed concurrently within a batch.
    pub max_concurrency: usize,
    /// Remediation rounds tolerated before integration failures abort.
    pub max_remediation_rounds: u32,
    /// Propose spec changes on observed review failures.
    pub adaptive_specs: bool,
    /// Hold proposals for approval instead of auto-applying.
    pub require_approval_for_spec_changes: bool,
    /// Task-wait polling period.
    pub poll_interval: Duration,
    /// Cost-breaker polling period.
    pub cost_check_interval: Duration,
    /// Safety ceiling on any single batch wait.
    pub wait_ceiling: Duration,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            cost_cap_usd: 5.0,
            timeout: Duration::from_secs(60 * 60),
            max_concurrency: 3,
            max_remediation_rounds: 3,
            adaptive_specs: false,
            require_approval_for_spec_changes: true,
            poll_interval: Duration::from_secs(1),
            cost_check_interval: Duration::from_secs(10),
            wait_ceiling: Duration::from_secs(30 * 60),
        }
    }
}

impl YoloConfig {
    pub fn with_cost_cap(mut self, cap_usd: f64) -> Self {
        self.cost_cap_usd = cap_usd;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_remediation_rounds(mut self, rounds: u32) -> Self {
        self.max_remediation_rounds = rounds;
        self
    }

    pub fn with_adaptive_specs(mut self, adaptive: bool) -> Self {
        self.adaptive_specs = adaptive;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_ceiling(mut self, ceiling: Duration) -> Self {
        self.wait_ceiling = ceiling;
        self
    }
}
