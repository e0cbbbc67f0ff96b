//! Persistent learning from quality outcomes.
//!
//! A rolling window of gate results per workspace feeds two pieces of
//! guidance back into routing and gate strictness: whether to prefer
//! managed execution, and whether to tighten the error-bypass thresholds.

use crate::clock::{SharedClock, system_clock};
use crate::quality::config::{
    QualityGateConfig, STAGE_ARCHITECTURE, STAGE_COMPLETENESS, STAGE_ERRORS, STAGE_SIMPLICITY,
};
use crate::quality::engine::QualityGateResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Workspace-relative directory holding the learning file.
pub const LEARNING_DIR: &str = ".craft-agent";
/// Learning file name.
pub const LEARNING_FILE: &str = "agent-team-learning.json";

/// Rolling cap on stored quality events; oldest trimmed first.
const MAX_QUALITY_EVENTS: usize = 300;
/// How many recent events feed guidance.
const GUIDANCE_WINDOW: usize = 40;
/// Events older than this are ignored for guidance.
const RETENTION_DAYS: i64 = 30;
/// Below this sample size, no guidance is derived.
const MIN_SAMPLE: usize = 6;

const FAILURE_RATE_THRESHOLD: f64 = 0.28;
const RETRY_RATE_THRESHOLD: f64 = 0.35;
const ERRORS_SCORE_FLOOR: f64 = 82.0;
const AGGREGATE_SCORE_FLOOR: f64 = 85.0;

/// One recorded quality outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityEventRecord {
    pub timestamp: DateTime<Utc>,
    pub passed: bool,
    pub aggregate_score: u8,
    pub cycle_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simplicity_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completeness_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated: Option<bool>,
}

impl QualityEventRecord {
    /// Build a record from a gate result.
    pub fn from_result(result: &QualityGateResult, escalated: bool) -> Self {
        let stage_score = |name: &str| result.stages.get(name).map(|s| s.score);
        Self {
            timestamp: result.timestamp,
            passed: result.passed,
            aggregate_score: result.aggregate_score,
            cycle_count: result.cycle_number,
            architecture_score: stage_score(STAGE_ARCHITECTURE),
            simplicity_score: stage_score(STAGE_SIMPLICITY),
            errors_score: stage_score(STAGE_ERRORS),
            completeness_score: stage_score(STAGE_COMPLETENESS),
            escalated: escalated.then_some(true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LearningFile {
    version: u32,
    #[serde(default)]
    quality_events: Vec<QualityEventRecord>,
    #[serde(default)]
    knowledge_events: Vec<serde_json::Value>,
}

impl Default for LearningFile {
    fn default() -> Self {
        Self {
            version: 1,
            quality_events: Vec::new(),
            knowledge_events: Vec::new(),
        }
    }
}

/// Guidance derived from the recent outcome window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningGuidance {
    pub prefer_managed: bool,
    pub tighten_error_bypass: bool,
    pub rationale: Vec<String>,
}

/// Per-workspace learning store.
pub struct LearningStore {
    path: PathBuf,
    clock: SharedClock,
}

impl LearningStore {
    pub fn new(workspace_dir: &Path, clock: SharedClock) -> Self {
        Self {
            path: workspace_dir.join(LEARNING_DIR).join(LEARNING_FILE),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_file(&self) -> LearningFile {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return LearningFile::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    fn save_file(&self, file: &LearningFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create learning directory")?;
        }
        let json = serde_json::to_string_pretty(file).context("Failed to serialize learning file")?;
        fs::write(&self.path, json).context("Failed to write learning file")?;
        Ok(())
    }

    /// Append a quality event, trimming the oldest past the rolling cap.
    pub fn record_quality_event(&self, event: QualityEventRecord) -> Result<()> {
        let mut file = self.load_file();
        file.quality_events.push(event);
        if file.quality_events.len() > MAX_QUALITY_EVENTS {
            let excess = file.quality_events.len() - MAX_QUALITY_EVENTS;
            file.quality_events.drain(0..excess);
        }
        self.save_file(&file)
    }

    /// All stored quality events, oldest first.
    pub fn quality_events(&self) -> Vec<QualityEventRecord> {
        self.load_file().quality_events
    }

    /// Derive guidance from the last 40 events inside the 30-day window.
    pub fn get_learning_guidance(&self) -> LearningGuidance {
        let now = self.clock.now();
        let retention = Duration::days(RETENTION_DAYS);
        let events = self.load_file().quality_events;

        let window: Vec<&QualityEventRecord> = events
            .iter()
            .rev()
            .take(GUIDANCE_WINDOW)
            .filter(|event| now - event.timestamp <= retention)
            .collect();

        if window.len() < MIN_SAMPLE {
            return LearningGuidance {
                prefer_managed: false,
                tighten_error_bypass: false,
                rationale: vec![format!(
                    "Insufficient learning history ({} of {} events needed)",
                    window.len(),
                    MIN_SAMPLE
                )],
            };
        }

        let n = window.len() as f64;
        let failure_rate = window.iter().filter(|e| !e.passed).count() as f64 / n;
        let retry_rate = window.iter().filter(|e| e.cycle_count >= 2).count() as f64 / n;

        let error_scores: Vec<f64> = window
            .iter()
            .filter_map(|e| e.errors_score.map(f64::from))
            .collect();
        let avg_errors = if error_scores.is_empty() {
            100.0
        } else {
            error_scores.iter().sum::<f64>() / error_scores.len() as f64
        };
        let avg_aggregate =
            window.iter().map(|e| f64::from(e.aggregate_score)).sum::<f64>() / n;

        let prefer_managed =
            failure_rate >= FAILURE_RATE_THRESHOLD || retry_rate >= RETRY_RATE_THRESHOLD;
        let tighten_error_bypass =
            avg_errors < ERRORS_SCORE_FLOOR || avg_aggregate < AGGREGATE_SCORE_FLOOR;

        let mut rationale = vec![format!(
            "Window of {} events: failure rate {:.0}%, retry rate {:.0}%",
            window.len(),
            failure_rate * 100.0,
            retry_rate * 100.0
        )];
        if prefer_managed {
            rationale.push("High failure or retry rate; prefer managed execution".to_string());
        }
        if tighten_error_bypass {
            rationale.push(format!(
                "Average errors score {:.0} / aggregate {:.0}; tightening bypass thresholds",
                avg_errors, avg_aggregate
            ));
        }

        LearningGuidance {
            prefer_managed,
            tighten_error_bypass,
            rationale,
        }
    }
}

/// Apply guidance to a gate config. Pure: returns the input untouched when
/// no tightening was requested.
pub fn apply_learning_guidance(
    mut config: QualityGateConfig,
    guidance: &LearningGuidance,
) -> QualityGateConfig {
    if !guidance.tighten_error_bypass {
        return config;
    }
    config.pass_threshold = config.pass_threshold.max(92);
    config.enforce_tdd = true;
    config.bypass.architecture_max_diff_lines = config.bypass.architecture_max_diff_lines.min(30);
    config.bypass.errors_require_passing_tests = true;
    config.bypass.min_test_count = config.bypass.min_test_count.max(2);
    config
}

/// Process-wide store registry keyed by workspace directory.
fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<LearningStore>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<LearningStore>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Shared store for a workspace; hydration is idempotent.
pub fn for_workspace(workspace_dir: &Path) -> Arc<LearningStore> {
    let mut stores = registry().lock().expect("learning registry lock");
    stores
        .entry(workspace_dir.to_path_buf())
        .or_insert_with(|| Arc::new(LearningStore::new(workspace_dir, system_clock())))
        .clone()
}

/// Drop all cached stores. Exposed for tests.
pub fn clear_all() {
    registry().lock().expect("learning registry lock").clear();
}
