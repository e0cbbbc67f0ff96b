//! Pure scoring and pass/fail determination.
//!
//! The engine only looks at stages that were actually executed (present in
//! the result map). Enabled stages that never ran are skipped, not failed;
//! that is what keeps spec-driven stages from producing false failures when
//! no spec is attached.

use super::config::QualityGateConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Test-run counters attached to the tests stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Outcome of a single executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// 0–100.
    pub score: u8,
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestCounts>,
}

impl StageResult {
    pub fn new(score: u8, passed: bool) -> Self {
        Self {
            score,
            passed,
            issues: Vec::new(),
            suggestions: Vec::new(),
            tests: None,
        }
    }

    pub fn passing(score: u8) -> Self {
        Self::new(score, true)
    }

    pub fn failing(score: u8) -> Self {
        Self::new(score, false)
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_tests(mut self, tests: TestCounts) -> Self {
        self.tests = Some(tests);
        self
    }
}

/// Aggregated outcome of one quality-gate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub passed: bool,
    pub aggregate_score: u8,
    pub stages: HashMap<String, StageResult>,
    pub cycle_number: u32,
    pub max_cycles: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_provider: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl QualityGateResult {
    /// Score the executed stages against the config and build the result.
    pub fn evaluate(
        config: &QualityGateConfig,
        stages: HashMap<String, StageResult>,
        cycle_number: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let aggregate_score = aggregate_score(config, &stages);
        let passed = should_pass(config, &stages, aggregate_score);
        Self {
            passed,
            aggregate_score,
            stages,
            cycle_number,
            max_cycles: config.max_review_cycles,
            review_model: config.review_model.clone(),
            review_provider: config.review_provider.clone(),
            timestamp,
        }
    }

    /// Executed stage names that failed, binary stages first.
    pub fn failed_stages(&self, config: &QualityGateConfig) -> Vec<&str> {
        let mut failed: Vec<&str> = Vec::new();
        for name in super::config::stage_order() {
            let Some(result) = self.stages.get(name) else {
                continue;
            };
            let Some(stage) = config.stage(name) else {
                continue;
            };
            if stage.enabled && !result.passed {
                failed.push(name);
            }
        }
        failed.sort_by_key(|name| {
            let binary = config.stage(name).map(|s| s.binary).unwrap_or(false);
            if binary { 0 } else { 1 }
        });
        failed
    }
}

/// Weighted average over enabled, non-binary, executed stages; 100 when none
/// executed.
pub fn aggregate_score(
    config: &QualityGateConfig,
    stages: &HashMap<String, StageResult>,
) -> u8 {
    let mut weighted_sum: u64 = 0;
    let mut weight_total: u64 = 0;

    for (name, result) in stages {
        let Some(stage) = config.stage(name) else {
            continue;
        };
        if !stage.enabled || stage.binary || stage.weight == 0 {
            continue;
        }
        weighted_sum += u64::from(stage.weight) * u64::from(result.score);
        weight_total += u64::from(stage.weight);
    }

    if weight_total == 0 {
        return 100;
    }
    // Round to nearest integer.
    ((weighted_sum + weight_total / 2) / weight_total) as u8
}

/// Pass iff every executed enabled stage passed and the aggregate clears the
/// threshold. Stages absent from the map are skipped.
pub fn should_pass(
    config: &QualityGateConfig,
    stages: &HashMap<String, StageResult>,
    aggregate: u8,
) -> bool {
    for (name, result) in stages {
        let Some(stage) = config.stage(name) else {
            continue;
        };
        if stage.enabled && !result.passed {
            return false;
        }
    }
    aggregate >= config.pass_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::config::*;

    fn all_passing(score: u8) -> HashMap<String, StageResult> {
        let mut stages = HashMap::new();
        for name in stage_order() {
            stages.insert(name.to_string(), StageResult::passing(score));
        }
        stages
    }

    // =========================================
    // Aggregate score (I1)
    // =========================================

    #[test]
    fn test_aggregate_is_weighted_average() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_ARCHITECTURE.to_string(), StageResult::passing(80)); // w25
        stages.insert(STAGE_ERRORS.to_string(), StageResult::passing(100)); // w25
        // (80*25 + 100*25) / 50 = 90
        assert_eq!(aggregate_score(&config, &stages), 90);
    }

    #[test]
    fn test_aggregate_rounds_to_nearest() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_ARCHITECTURE.to_string(), StageResult::passing(80)); // w25
        stages.insert(STAGE_SIMPLICITY.to_string(), StageResult::passing(91)); // w10
        // (80*25 + 91*10) / 35 = 2910/35 = 83.14 -> 83
        assert_eq!(aggregate_score(&config, &stages), 83);
    }

    #[test]
    fn test_aggregate_ignores_binary_stages() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_TESTS.to_string(), StageResult::passing(0));
        stages.insert(STAGE_SYNTAX.to_string(), StageResult::passing(0));
        stages.insert(STAGE_ERRORS.to_string(), StageResult::passing(90));
        assert_eq!(aggregate_score(&config, &stages), 90);
    }

    #[test]
    fn test_aggregate_is_100_when_no_weighted_stage_executed() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_SYNTAX.to_string(), StageResult::passing(100));
        assert_eq!(aggregate_score(&config, &stages), 100);
        assert_eq!(aggregate_score(&config, &HashMap::new()), 100);
    }

    #[test]
    fn test_aggregate_ignores_disabled_stages() {
        let mut overrides_stages = HashMap::new();
        overrides_stages.insert(
            STAGE_ERRORS.to_string(),
            StageOverride {
                enabled: Some(false),
                ..Default::default()
            },
        );
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            stages: overrides_stages,
            ..Default::default()
        });

        let mut stages = HashMap::new();
        stages.insert(STAGE_ERRORS.to_string(), StageResult::passing(10));
        stages.insert(STAGE_ARCHITECTURE.to_string(), StageResult::passing(90));
        assert_eq!(aggregate_score(&config, &stages), 90);
    }

    // =========================================
    // Pass rule (I2, I3)
    // =========================================

    #[test]
    fn test_all_passing_above_threshold_passes() {
        let config = QualityGateConfig::default();
        let stages = all_passing(95);
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        assert!(result.passed);
        assert_eq!(result.aggregate_score, 95);
    }

    #[test]
    fn test_failed_binary_stage_blocks_regardless_of_aggregate() {
        let config = QualityGateConfig::default();
        let mut stages = all_passing(100);
        stages.insert(STAGE_TESTS.to_string(), StageResult::failing(0));
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        assert_eq!(result.aggregate_score, 100);
        assert!(!result.passed);
    }

    #[test]
    fn test_failed_weighted_stage_blocks() {
        let config = QualityGateConfig::default();
        let mut stages = all_passing(95);
        stages.insert(STAGE_ARCHITECTURE.to_string(), StageResult::failing(95));
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        assert!(!result.passed);
    }

    #[test]
    fn test_aggregate_below_threshold_blocks() {
        let config = QualityGateConfig::default();
        let stages = all_passing(85); // aggregate 85 < 90
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        assert!(!result.passed);
    }

    #[test]
    fn test_absent_stages_are_skipped_not_failed() {
        // Spec stages off: only the core stages ran, and they pass.
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_SYNTAX.to_string(), StageResult::passing(100));
        stages.insert(STAGE_TESTS.to_string(), StageResult::passing(100));
        stages.insert(STAGE_ARCHITECTURE.to_string(), StageResult::passing(92));
        stages.insert(STAGE_ERRORS.to_string(), StageResult::passing(92));
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        assert!(result.passed, "absent spec stages must not fail the gate");
    }

    #[test]
    fn test_disabled_failed_stage_does_not_block() {
        let mut overrides_stages = HashMap::new();
        overrides_stages.insert(
            STAGE_ROLLOUT_SAFETY.to_string(),
            StageOverride {
                enabled: Some(false),
                ..Default::default()
            },
        );
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            stages: overrides_stages,
            ..Default::default()
        });

        let mut stages = all_passing(95);
        stages.insert(STAGE_ROLLOUT_SAFETY.to_string(), StageResult::failing(0));
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        assert!(result.passed);
    }

    #[test]
    fn test_pass_monotonicity_in_scores() {
        let config = QualityGateConfig::default();
        let passing = all_passing(92);
        let base_aggregate = aggregate_score(&config, &passing);
        assert!(should_pass(&config, &passing, base_aggregate));

        // Lowering any one score never turns a fail into a pass.
        for name in stage_order() {
            let mut lowered = passing.clone();
            if let Some(stage) = lowered.get_mut(name) {
                stage.score = stage.score.saturating_sub(30);
            }
            let aggregate = aggregate_score(&config, &lowered);
            assert!(aggregate <= base_aggregate);
        }
    }

    #[test]
    fn test_threshold_above_aggregate_never_passes() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            pass_threshold: Some(95),
            ..Default::default()
        });
        let stages = all_passing(92);
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        assert!(!result.passed);
    }

    // =========================================
    // Result metadata
    // =========================================

    #[test]
    fn test_evaluate_stamps_cycle_and_model() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            review_model: Some("claude-sonnet-4-5".into()),
            ..Default::default()
        });
        let result = QualityGateResult::evaluate(&config, all_passing(95), 2, Utc::now());
        assert_eq!(result.cycle_number, 2);
        assert_eq!(result.max_cycles, 3);
        assert_eq!(result.review_model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(result.review_provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn test_failed_stages_binary_first() {
        let config = QualityGateConfig::default();
        let mut stages = all_passing(95);
        stages.insert(STAGE_ERRORS.to_string(), StageResult::failing(40));
        stages.insert(STAGE_TESTS.to_string(), StageResult::failing(0));
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        let failed = result.failed_stages(&config);
        assert_eq!(failed, vec![STAGE_TESTS, STAGE_ERRORS]);
    }

    #[test]
    fn test_stage_result_builder() {
        let result = StageResult::failing(40)
            .with_issue("God class detected in manager.rs")
            .with_suggestion("Split responsibilities")
            .with_tests(TestCounts {
                total: 10,
                passed: 7,
                failed: 3,
                skipped: 0,
            });
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.tests.unwrap().failed, 3);
    }
}
