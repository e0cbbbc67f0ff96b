//! Quality-gate configuration: the fixed stage set, defaults, and the
//! deep-merge of partial user config over them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical stage names in pipeline order.
pub const STAGE_SYNTAX: &str = "syntax";
pub const STAGE_TESTS: &str = "tests";
pub const STAGE_ARCHITECTURE: &str = "architecture";
pub const STAGE_SIMPLICITY: &str = "simplicity";
pub const STAGE_ERRORS: &str = "errors";
pub const STAGE_COMPLETENESS: &str = "completeness";
pub const STAGE_SPEC_COMPLIANCE: &str = "spec_compliance";
pub const STAGE_TRACEABILITY: &str = "traceability";
pub const STAGE_ROLLOUT_SAFETY: &str = "rollout_safety";

/// The fixed, ordered stage set.
pub fn stage_order() -> [&'static str; 9] {
    [
        STAGE_SYNTAX,
        STAGE_TESTS,
        STAGE_ARCHITECTURE,
        STAGE_SIMPLICITY,
        STAGE_ERRORS,
        STAGE_COMPLETENESS,
        STAGE_SPEC_COMPLIANCE,
        STAGE_TRACEABILITY,
        STAGE_ROLLOUT_SAFETY,
    ]
}

/// Pass-threshold clamp bounds.
const PASS_THRESHOLD_MIN: u8 = 70;
const PASS_THRESHOLD_MAX: u8 = 95;

/// Per-stage settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub enabled: bool,
    /// Aggregation weight. Ignored for binary stages.
    pub weight: u32,
    /// Binary stages pass or fail outright and never contribute to the
    /// weighted aggregate.
    pub binary: bool,
}

impl StageConfig {
    pub fn weighted(weight: u32) -> Self {
        Self {
            enabled: true,
            weight,
            binary: false,
        }
    }

    pub fn binary() -> Self {
        Self {
            enabled: true,
            weight: 0,
            binary: true,
        }
    }
}

/// Sub-thresholds governing when low-risk diffs may bypass strict gating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BypassThresholds {
    /// Diffs larger than this never bypass the architecture stage.
    pub architecture_max_diff_lines: u32,
    /// Require a passing test run before any errors-stage bypass.
    pub errors_require_passing_tests: bool,
    /// Minimum number of tests a diff must carry to bypass.
    pub min_test_count: u32,
}

impl Default for BypassThresholds {
    fn default() -> Self {
        Self {
            architecture_max_diff_lines: 50,
            errors_require_passing_tests: false,
            min_test_count: 0,
        }
    }
}

/// Full quality-gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateConfig {
    /// Minimum aggregate score to pass. Clamped to [70, 95] at merge time.
    pub pass_threshold: u8,
    /// Maximum review cycles before escalation.
    pub max_review_cycles: u32,
    /// Require tests to land alongside implementation.
    pub enforce_tdd: bool,
    pub stages: HashMap<String, StageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_provider: Option<String>,
    #[serde(default)]
    pub bypass: BypassThresholds,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        let mut stages = HashMap::new();
        stages.insert(STAGE_SYNTAX.to_string(), StageConfig::binary());
        stages.insert(
            STAGE_TESTS.to_string(),
            StageConfig {
                enabled: true,
                weight: 20,
                binary: true,
            },
        );
        stages.insert(STAGE_ARCHITECTURE.to_string(), StageConfig::weighted(25));
        stages.insert(STAGE_SIMPLICITY.to_string(), StageConfig::weighted(10));
        stages.insert(STAGE_ERRORS.to_string(), StageConfig::weighted(25));
        stages.insert(STAGE_COMPLETENESS.to_string(), StageConfig::weighted(25));
        stages.insert(STAGE_SPEC_COMPLIANCE.to_string(), StageConfig::weighted(20));
        stages.insert(STAGE_TRACEABILITY.to_string(), StageConfig::weighted(15));
        stages.insert(STAGE_ROLLOUT_SAFETY.to_string(), StageConfig::weighted(10));

        Self {
            pass_threshold: 90,
            max_review_cycles: 3,
            enforce_tdd: false,
            stages,
            review_model: None,
            review_provider: None,
            escalation_model: None,
            escalation_provider: None,
            bypass: BypassThresholds::default(),
        }
    }
}

impl QualityGateConfig {
    /// Merge partial overrides over this config, clamping and inferring as
    /// we go.
    pub fn merged(mut self, overrides: QualityGateOverrides) -> Self {
        if let Some(threshold) = overrides.pass_threshold {
            self.pass_threshold = threshold;
        }
        self.pass_threshold = self
            .pass_threshold
            .clamp(PASS_THRESHOLD_MIN, PASS_THRESHOLD_MAX);

        if let Some(max_cycles) = overrides.max_review_cycles {
            self.max_review_cycles = max_cycles;
        }
        if let Some(enforce) = overrides.enforce_tdd {
            self.enforce_tdd = enforce;
        }

        for (name, patch) in overrides.stages {
            let entry = self
                .stages
                .entry(name)
                .or_insert_with(|| StageConfig::weighted(0));
            if let Some(enabled) = patch.enabled {
                entry.enabled = enabled;
            }
            if let Some(weight) = patch.weight {
                entry.weight = weight;
            }
            if let Some(binary) = patch.binary {
                entry.binary = binary;
            }
        }

        if let Some(model) = overrides.review_model {
            self.review_model = Some(model);
        }
        if let Some(provider) = overrides.review_provider {
            self.review_provider = Some(provider);
        }
        if self.review_provider.is_none()
            && let Some(model) = &self.review_model
        {
            self.review_provider = infer_provider(model).map(str::to_string);
        }

        if let Some(model) = overrides.escalation_model {
            self.escalation_model = Some(model);
        }
        if let Some(provider) = overrides.escalation_provider {
            self.escalation_provider = Some(provider);
        }
        if self.escalation_provider.is_none()
            && let Some(model) = &self.escalation_model
        {
            self.escalation_provider = infer_provider(model).map(str::to_string);
        }

        if let Some(bypass) = overrides.bypass {
            if let Some(lines) = bypass.architecture_max_diff_lines {
                self.bypass.architecture_max_diff_lines = lines;
            }
            if let Some(require) = bypass.errors_require_passing_tests {
                self.bypass.errors_require_passing_tests = require;
            }
            if let Some(count) = bypass.min_test_count {
                self.bypass.min_test_count = count;
            }
        }

        self
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.get(name)
    }
}

/// Partial user configuration, deep-merged over [`QualityGateConfig::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityGateOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_threshold: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_review_cycles: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_tdd: Option<bool>,
    #[serde(default)]
    pub stages: HashMap<String, StageOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<BypassOverrides>,
}

/// Per-stage partial overrides.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<bool>,
}

/// Partial bypass sub-threshold overrides.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BypassOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture_max_diff_lines: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors_require_passing_tests: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_test_count: Option<u32>,
}

/// Infer a provider from a model id prefix.
pub fn infer_provider(model: &str) -> Option<&'static str> {
    let model = model.to_lowercase();
    if model.starts_with("kimi-") {
        Some("moonshot")
    } else if model.starts_with("claude-") {
        Some("anthropic")
    } else if model.starts_with("gpt-") || model.contains("codex") {
        Some("openai")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // Defaults
    // =========================================

    #[test]
    fn test_default_weights() {
        let config = QualityGateConfig::default();
        assert_eq!(config.stage(STAGE_ARCHITECTURE).unwrap().weight, 25);
        assert_eq!(config.stage(STAGE_SIMPLICITY).unwrap().weight, 10);
        assert_eq!(config.stage(STAGE_ERRORS).unwrap().weight, 25);
        assert_eq!(config.stage(STAGE_COMPLETENESS).unwrap().weight, 25);
        assert_eq!(config.stage(STAGE_SPEC_COMPLIANCE).unwrap().weight, 20);
        assert_eq!(config.stage(STAGE_TRACEABILITY).unwrap().weight, 15);
        assert_eq!(config.stage(STAGE_ROLLOUT_SAFETY).unwrap().weight, 10);
    }

    #[test]
    fn test_default_binary_stages() {
        let config = QualityGateConfig::default();
        assert!(config.stage(STAGE_SYNTAX).unwrap().binary);
        assert!(config.stage(STAGE_TESTS).unwrap().binary);
        assert!(!config.stage(STAGE_ERRORS).unwrap().binary);
    }

    #[test]
    fn test_default_threshold_and_cycles() {
        let config = QualityGateConfig::default();
        assert_eq!(config.pass_threshold, 90);
        assert_eq!(config.max_review_cycles, 3);
    }

    #[test]
    fn test_stage_order_covers_all_default_stages() {
        let config = QualityGateConfig::default();
        for name in stage_order() {
            assert!(config.stage(name).is_some(), "missing stage {name}");
        }
        assert_eq!(stage_order().len(), config.stages.len());
    }

    // =========================================
    // Merge semantics
    // =========================================

    #[test]
    fn test_threshold_clamped_low() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            pass_threshold: Some(40),
            ..Default::default()
        });
        assert_eq!(config.pass_threshold, 70);
    }

    #[test]
    fn test_threshold_clamped_high() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            pass_threshold: Some(99),
            ..Default::default()
        });
        assert_eq!(config.pass_threshold, 95);
    }

    #[test]
    fn test_stage_merge_preserves_untouched_fields() {
        let mut stages = HashMap::new();
        stages.insert(
            STAGE_ARCHITECTURE.to_string(),
            StageOverride {
                weight: Some(40),
                ..Default::default()
            },
        );
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            stages,
            ..Default::default()
        });
        let arch = config.stage(STAGE_ARCHITECTURE).unwrap();
        assert_eq!(arch.weight, 40);
        assert!(arch.enabled);
        assert!(!arch.binary);
    }

    #[test]
    fn test_stage_merge_can_disable() {
        let mut stages = HashMap::new();
        stages.insert(
            STAGE_SPEC_COMPLIANCE.to_string(),
            StageOverride {
                enabled: Some(false),
                ..Default::default()
            },
        );
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            stages,
            ..Default::default()
        });
        assert!(!config.stage(STAGE_SPEC_COMPLIANCE).unwrap().enabled);
    }

    #[test]
    fn test_bypass_merge_is_field_wise() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            bypass: Some(BypassOverrides {
                min_test_count: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(config.bypass.min_test_count, 3);
        assert_eq!(config.bypass.architecture_max_diff_lines, 50);
    }

    // =========================================
    // Provider inference
    // =========================================

    #[test]
    fn test_infer_provider() {
        assert_eq!(infer_provider("kimi-k2"), Some("moonshot"));
        assert_eq!(infer_provider("claude-sonnet-4-5"), Some("anthropic"));
        assert_eq!(infer_provider("gpt-5"), Some("openai"));
        assert_eq!(infer_provider("my-codex-mini"), Some("openai"));
        assert_eq!(infer_provider("gemini-2.5-pro"), None);
    }

    #[test]
    fn test_review_provider_inferred_from_model() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            review_model: Some("claude-opus-4-6".into()),
            ..Default::default()
        });
        assert_eq!(config.review_provider.as_deref(), Some("anthropic"));
    }

    #[test]
    fn test_explicit_provider_wins_over_inference() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            review_model: Some("claude-opus-4-6".into()),
            review_provider: Some("bedrock".into()),
            ..Default::default()
        });
        assert_eq!(config.review_provider.as_deref(), Some("bedrock"));
    }

    #[test]
    fn test_escalation_provider_inferred() {
        let config = QualityGateConfig::default().merged(QualityGateOverrides {
            escalation_model: Some("gpt-5".into()),
            ..Default::default()
        });
        assert_eq!(config.escalation_provider.as_deref(), Some("openai"));
    }
}
