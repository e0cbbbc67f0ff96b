//! Markdown reports for quality-gate outcomes.
//!
//! Failure reports are sent to agents as feedback; success reports are
//! attached to the passing event. Both always carry the full scoreboard so
//! the agent sees where it stands, not just what broke.

use super::config::{QualityGateConfig, stage_order};
use super::engine::QualityGateResult;
use std::fmt::Write;

/// Render the scoreboard of all executed stages in canonical order.
fn scoreboard(result: &QualityGateResult, config: &QualityGateConfig) -> String {
    let mut out = String::new();
    out.push_str("| Stage | Score | Status |\n");
    out.push_str("| --- | --- | --- |\n");
    for name in stage_order() {
        let Some(stage_result) = result.stages.get(name) else {
            continue;
        };
        let binary = config.stage(name).map(|s| s.binary).unwrap_or(false);
        let score = if binary {
            if stage_result.passed { "pass" } else { "fail" }.to_string()
        } else {
            format!("{}/100", stage_result.score)
        };
        let status = if stage_result.passed { "✓" } else { "✗" };
        let _ = writeln!(out, "| {} | {} | {} |", name, score, status);
    }
    out
}

/// Build the markdown failure report for a failed gate run.
pub fn format_failure_report(result: &QualityGateResult, config: &QualityGateConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Quality Gate FAILED");
    let _ = writeln!(
        out,
        "Cycle {}/{} — aggregate score {}/100 (threshold {})",
        result.cycle_number, result.max_cycles, result.aggregate_score, config.pass_threshold
    );
    out.push('\n');
    out.push_str(&scoreboard(result, config));

    let failed = result.failed_stages(config);
    let blocking: Vec<&str> = failed
        .iter()
        .copied()
        .filter(|name| config.stage(name).map(|s| s.binary).unwrap_or(false))
        .collect();

    if !blocking.is_empty() {
        out.push_str("\n### BLOCKING\n\n");
        for name in &blocking {
            if let Some(stage_result) = result.stages.get(*name) {
                if stage_result.issues.is_empty() {
                    let _ = writeln!(out, "- **{}** failed", name);
                } else {
                    for issue in &stage_result.issues {
                        let _ = writeln!(out, "- **{}**: {}", name, issue);
                    }
                }
            }
        }
    }

    let advisory: Vec<&str> = failed
        .iter()
        .copied()
        .filter(|name| !config.stage(name).map(|s| s.binary).unwrap_or(false))
        .collect();

    if !advisory.is_empty() {
        out.push_str("\n### Issues to Address\n\n");
        for name in &advisory {
            if let Some(stage_result) = result.stages.get(*name) {
                let _ = writeln!(out, "**{}** ({}/100):", name, stage_result.score);
                for issue in &stage_result.issues {
                    let _ = writeln!(out, "- {}", issue);
                }
                for suggestion in &stage_result.suggestions {
                    let _ = writeln!(out, "- Suggestion: {}", suggestion);
                }
                out.push('\n');
            }
        }
    }

    if result.cycle_number + 1 == result.max_cycles {
        let _ = writeln!(
            out,
            "\n**Warning: cycle {}/{} is next — one more failed review escalates this task.**",
            result.max_cycles, result.max_cycles
        );
    }

    out
}

/// Build the markdown success report for a passed gate run.
pub fn format_success_report(result: &QualityGateResult, config: &QualityGateConfig) -> String {
    let mut out = String::new();
    if result.cycle_number > 1 {
        let _ = writeln!(
            out,
            "## Quality Gate Passed after {} cycles",
            result.cycle_number
        );
    } else {
        let _ = writeln!(out, "## Quality Gate Passed");
    }
    let _ = writeln!(out, "Aggregate score: {}/100", result.aggregate_score);
    out.push('\n');
    out.push_str(&scoreboard(result, config));

    let suggestions: Vec<(&str, &str)> = stage_order()
        .into_iter()
        .filter_map(|name| result.stages.get(name).map(|r| (name, r)))
        .flat_map(|(name, r)| r.suggestions.iter().map(move |s| (name, s.as_str())))
        .collect();

    if !suggestions.is_empty() {
        out.push_str("\n### Non-blocking suggestions\n\n");
        for (name, suggestion) in suggestions {
            let _ = writeln!(out, "- {}: {}", name, suggestion);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::config::*;
    use crate::quality::engine::StageResult;
    use chrono::Utc;
    use std::collections::HashMap;

    fn failing_fixture() -> (QualityGateConfig, QualityGateResult) {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_SYNTAX.to_string(), StageResult::passing(100));
        stages.insert(STAGE_TESTS.to_string(), StageResult::failing(0).with_issue("2 tests failed"));
        stages.insert(
            STAGE_ARCHITECTURE.to_string(),
            StageResult::failing(45)
                .with_issue("God class detected in manager.rs")
                .with_suggestion("Split responsibilities into separate modules"),
        );
        stages.insert(STAGE_ERRORS.to_string(), StageResult::passing(88));
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        (config, result)
    }

    #[test]
    fn test_failure_report_has_header_and_cycle() {
        let (config, result) = failing_fixture();
        let report = format_failure_report(&result, &config);
        assert!(report.contains("Quality Gate FAILED"));
        assert!(report.contains("Cycle 1/3"));
    }

    #[test]
    fn test_failure_report_scoreboard_in_canonical_order() {
        let (config, result) = failing_fixture();
        let report = format_failure_report(&result, &config);
        let syntax_pos = report.find("| syntax |").unwrap();
        let tests_pos = report.find("| tests |").unwrap();
        let arch_pos = report.find("| architecture |").unwrap();
        let errors_pos = report.find("| errors |").unwrap();
        assert!(syntax_pos < tests_pos);
        assert!(tests_pos < arch_pos);
        assert!(arch_pos < errors_pos);
    }

    #[test]
    fn test_failure_report_blocking_section_lists_binary_failures() {
        let (config, result) = failing_fixture();
        let report = format_failure_report(&result, &config);
        let blocking_pos = report.find("### BLOCKING").unwrap();
        let issues_pos = report.find("### Issues to Address").unwrap();
        assert!(blocking_pos < issues_pos);
        assert!(report.contains("**tests**: 2 tests failed"));
    }

    #[test]
    fn test_failure_report_carries_issues_and_suggestions() {
        let (config, result) = failing_fixture();
        let report = format_failure_report(&result, &config);
        assert!(report.contains("God class detected in manager.rs"));
        assert!(report.contains("Suggestion: Split responsibilities"));
    }

    #[test]
    fn test_failure_report_penultimate_cycle_warning() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_ERRORS.to_string(), StageResult::failing(40));

        let cycle2 = QualityGateResult::evaluate(&config, stages.clone(), 2, Utc::now());
        let report = format_failure_report(&cycle2, &config);
        assert!(report.contains("Warning: cycle 3/3"));

        let cycle1 = QualityGateResult::evaluate(&config, stages, 1, Utc::now());
        let report = format_failure_report(&cycle1, &config);
        assert!(!report.contains("Warning: cycle"));
    }

    #[test]
    fn test_success_report_always_has_scoreboard_and_aggregate() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_ERRORS.to_string(), StageResult::passing(92));
        stages.insert(STAGE_ARCHITECTURE.to_string(), StageResult::passing(94));
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());

        let report = format_success_report(&result, &config);
        assert!(report.contains("Quality Gate Passed"));
        assert!(!report.contains("after"));
        assert!(report.contains("Aggregate score: 93/100"));
        assert!(report.contains("| errors |"));
    }

    #[test]
    fn test_success_report_mentions_cycle_count_after_rework() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(STAGE_ERRORS.to_string(), StageResult::passing(95));
        let result = QualityGateResult::evaluate(&config, stages, 2, Utc::now());

        let report = format_success_report(&result, &config);
        assert!(report.contains("Passed after 2 cycles"));
    }

    #[test]
    fn test_success_report_appends_non_blocking_suggestions() {
        let config = QualityGateConfig::default();
        let mut stages = HashMap::new();
        stages.insert(
            STAGE_SIMPLICITY.to_string(),
            StageResult::passing(91).with_suggestion("Inline the helper"),
        );
        let result = QualityGateResult::evaluate(&config, stages, 1, Utc::now());

        let report = format_success_report(&result, &config);
        assert!(report.contains("Non-blocking suggestions"));
        assert!(report.contains("simplicity: Inline the helper"));
    }
}
