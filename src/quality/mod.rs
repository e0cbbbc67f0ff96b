//! Quality-gate engine: stage configuration, pure scoring, and report
//! formatting.
//!
//! The engine itself has no side effects; the review loop owns when gates
//! run and what happens to the verdicts.

pub mod config;
pub mod engine;
pub mod report;

pub use config::{
    BypassOverrides, BypassThresholds, QualityGateConfig, QualityGateOverrides, StageConfig,
    StageOverride, infer_provider, stage_order,
};
pub use engine::{QualityGateResult, StageResult, TestCounts};
pub use report::{format_failure_report, format_success_report};
