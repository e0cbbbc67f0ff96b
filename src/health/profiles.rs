//! Model-aware stall profiles.
//!
//! A reasoning-heavy model is legitimately silent for long stretches; the
//! generic five-minute stall timeout would flag it constantly. Profiles are
//! a small data table keyed by lowercase model-id prefix; user overrides
//! deep-merge over the built-in entry.

use chrono::Duration;
use std::collections::HashMap;

/// Silence thresholds for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallProfile {
    /// Silence considered normal for the model.
    pub expected_silence: Duration,
    /// Fire a soft-probe event past this.
    pub soft_probe: Duration,
    /// Declare a hard stall past this.
    pub hard_stall: Duration,
}

impl StallProfile {
    pub fn from_secs(expected: i64, soft: i64, hard: i64) -> Self {
        Self {
            expected_silence: Duration::seconds(expected),
            soft_probe: Duration::seconds(soft),
            hard_stall: Duration::seconds(hard),
        }
    }
}

/// Partial override for one model id, merged field-wise over the built-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct StallProfileOverride {
    pub expected_silence: Option<Duration>,
    pub soft_probe: Option<Duration>,
    pub hard_stall: Option<Duration>,
}

/// Built-in profile for a model id (lowercase prefix match).
pub fn builtin_profile(model: &str) -> StallProfile {
    let model = model.to_lowercase();
    if model.starts_with("claude-haiku") {
        StallProfile::from_secs(15, 60, 180)
    } else if model.starts_with("claude-sonnet") {
        StallProfile::from_secs(30, 90, 300)
    } else if model.starts_with("claude-opus") {
        StallProfile::from_secs(45, 120, 300)
    } else if model.starts_with("gpt-") {
        StallProfile::from_secs(45, 120, 360)
    } else if model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4") {
        StallProfile::from_secs(60, 150, 420)
    } else if model.starts_with("codex") {
        StallProfile::from_secs(60, 150, 360)
    } else if model.starts_with("gemini") {
        StallProfile::from_secs(30, 90, 300)
    } else if model.starts_with("deepseek") {
        StallProfile::from_secs(45, 120, 360)
    } else {
        StallProfile::from_secs(30, 120, 300)
    }
}

/// Resolve the profile for a model, applying any override keyed by the exact
/// model id.
pub fn resolve_profile(
    model: &str,
    overrides: &HashMap<String, StallProfileOverride>,
) -> StallProfile {
    let mut profile = builtin_profile(model);
    if let Some(patch) = overrides.get(model) {
        if let Some(expected) = patch.expected_silence {
            profile.expected_silence = expected;
        }
        if let Some(soft) = patch.soft_probe {
            profile.soft_probe = soft;
        }
        if let Some(hard) = patch.hard_stall {
            profile.hard_stall = hard;
        }
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_by_prefix() {
        assert_eq!(
            builtin_profile("claude-haiku-4-5"),
            StallProfile::from_secs(15, 60, 180)
        );
        assert_eq!(
            builtin_profile("claude-sonnet-4-5"),
            StallProfile::from_secs(30, 90, 300)
        );
        assert_eq!(
            builtin_profile("claude-opus-4-6"),
            StallProfile::from_secs(45, 120, 300)
        );
        assert_eq!(builtin_profile("gpt-5"), StallProfile::from_secs(45, 120, 360));
        assert_eq!(builtin_profile("o3-mini"), StallProfile::from_secs(60, 150, 420));
        assert_eq!(
            builtin_profile("codex-mini"),
            StallProfile::from_secs(60, 150, 360)
        );
        assert_eq!(
            builtin_profile("gemini-2.5-pro"),
            StallProfile::from_secs(30, 90, 300)
        );
        assert_eq!(
            builtin_profile("deepseek-v3"),
            StallProfile::from_secs(45, 120, 360)
        );
    }

    #[test]
    fn test_unknown_model_gets_default() {
        assert_eq!(
            builtin_profile("mystery-model"),
            StallProfile::from_secs(30, 120, 300)
        );
    }

    #[test]
    fn test_prefix_match_is_case_insensitive() {
        assert_eq!(
            builtin_profile("Claude-Opus-4-6"),
            StallProfile::from_secs(45, 120, 300)
        );
    }

    #[test]
    fn test_override_merges_field_wise() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "claude-opus-4-6".to_string(),
            StallProfileOverride {
                hard_stall: Some(Duration::seconds(600)),
                ..Default::default()
            },
        );

        let profile = resolve_profile("claude-opus-4-6", &overrides);
        assert_eq!(profile.hard_stall, Duration::seconds(600));
        // Untouched fields keep the built-in values.
        assert_eq!(profile.soft_probe, Duration::seconds(120));
        assert_eq!(profile.expected_silence, Duration::seconds(45));
    }

    #[test]
    fn test_override_keyed_by_exact_model_id() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "claude-opus-4-6".to_string(),
            StallProfileOverride {
                hard_stall: Some(Duration::seconds(600)),
                ..Default::default()
            },
        );

        // A different opus model does not pick up the override.
        let profile = resolve_profile("claude-opus-4-5", &overrides);
        assert_eq!(profile.hard_stall, Duration::seconds(300));
    }
}
