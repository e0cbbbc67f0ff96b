use super::{AuditEntry, AuditEventKind};
use crate::clock::SharedClock;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Append-only JSONL audit logger, one file per team at
/// `{base_dir}/{team_id}/audit.jsonl`.
pub struct AuditLogger {
    base_dir: PathBuf,
    clock: SharedClock,
}

/// Optional filters for [`AuditLogger::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub kind: Option<AuditEventKind>,
    pub task_id: Option<String>,
    pub teammate_id: Option<String>,
}

/// Totals computed by walking a team's log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditSummary {
    /// Unique (task, teammate) review sessions.
    pub review_sessions: usize,
    /// Sessions whose final gate run passed on cycle 1.
    pub passed_first_cycle: usize,
    /// Mean cycle count over sessions that ended passing.
    pub average_cycles: f64,
    pub escalations: usize,
    pub stalls: usize,
    pub file_conflicts: usize,
}

impl AuditLogger {
    pub fn new(base_dir: &Path, clock: SharedClock) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            clock,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn log_path(&self, team_id: &str) -> PathBuf {
        self.base_dir.join(team_id).join("audit.jsonl")
    }

    /// Append one entry to the team's log.
    pub fn log(&self, entry: &AuditEntry) -> Result<()> {
        let path = self.log_path(&entry.team_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create audit directory")?;
        }
        let line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open audit log")?;
        writeln!(file, "{}", line).context("Failed to write audit entry")?;
        Ok(())
    }

    /// All entries for a team, oldest first. Malformed lines are skipped.
    pub fn entries(&self, team_id: &str) -> Result<Vec<AuditEntry>> {
        let path = self.log_path(team_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).context("Failed to read audit log")?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .collect())
    }

    /// Entries matching every field set on the filter.
    pub fn query(&self, team_id: &str, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries(team_id)?
            .into_iter()
            .filter(|entry| {
                filter.kind.is_none_or(|kind| entry.kind == kind)
                    && filter
                        .task_id
                        .as_deref()
                        .is_none_or(|task| entry.task_id.as_deref() == Some(task))
                    && filter
                        .teammate_id
                        .as_deref()
                        .is_none_or(|tm| entry.teammate_id.as_deref() == Some(tm))
            })
            .collect())
    }

    /// Walk the log and compute totals.
    pub fn summary(&self, team_id: &str) -> Result<AuditSummary> {
        let entries = self.entries(team_id)?;

        // Last gate outcome per (task, teammate) session.
        let mut sessions: HashMap<(String, String), (bool, u32)> = HashMap::new();
        let mut escalations = 0;
        let mut stalls = 0;
        let mut file_conflicts = 0;

        for entry in &entries {
            match entry.kind {
                AuditEventKind::QualityGateCompleted => {
                    if let (Some(task), Some(teammate)) =
                        (entry.task_id.clone(), entry.teammate_id.clone())
                    {
                        let passed = entry.data["passed"].as_bool().unwrap_or(false);
                        let cycle = entry.cycle_number.unwrap_or(1);
                        sessions.insert((task, teammate), (passed, cycle));
                    }
                }
                AuditEventKind::ReviewEscalated => escalations += 1,
                AuditEventKind::HealthStall => stalls += 1,
                AuditEventKind::FileConflict => file_conflicts += 1,
                _ => {}
            }
        }

        let review_sessions = sessions.len();
        let passed_first_cycle = sessions
            .values()
            .filter(|(passed, cycle)| *passed && *cycle == 1)
            .count();
        let passed_cycles: Vec<u32> = sessions
            .values()
            .filter(|(passed, _)| *passed)
            .map(|(_, cycle)| *cycle)
            .collect();
        let average_cycles = if passed_cycles.is_empty() {
            0.0
        } else {
            passed_cycles.iter().sum::<u32>() as f64 / passed_cycles.len() as f64
        };

        Ok(AuditSummary {
            review_sessions,
            passed_first_cycle,
            average_cycles,
            escalations,
            stalls,
            file_conflicts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    fn logger() -> (AuditLogger, ManualClock, TempDir) {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::from_wall_clock();
        let logger = AuditLogger::new(dir.path(), clock.shared());
        (logger, clock, dir)
    }

    fn gate_entry(
        clock: &ManualClock,
        task: &str,
        teammate: &str,
        passed: bool,
        cycle: u32,
    ) -> AuditEntry {
        AuditEntry::new(AuditEventKind::QualityGateCompleted, "team", clock.now())
            .with_task(task)
            .with_teammate(teammate)
            .with_cycle(cycle)
            .with_data(serde_json::json!({"passed": passed}))
    }

    #[test]
    fn test_log_and_read_back() {
        let (logger, clock, _dir) = logger();
        logger.log(&gate_entry(&clock, "task-1", "tm-1", true, 1)).unwrap();
        logger
            .log(&AuditEntry::new(AuditEventKind::TeamCleanup, "team", clock.now()))
            .unwrap();

        let entries = logger.entries("team").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, AuditEventKind::QualityGateCompleted);
    }

    #[test]
    fn test_logs_are_per_team() {
        let (logger, clock, _dir) = logger();
        logger
            .log(&AuditEntry::new(AuditEventKind::TeamCleanup, "team-a", clock.now()))
            .unwrap();
        assert_eq!(logger.entries("team-a").unwrap().len(), 1);
        assert!(logger.entries("team-b").unwrap().is_empty());
    }

    #[test]
    fn test_query_filters_compose() {
        let (logger, clock, _dir) = logger();
        logger.log(&gate_entry(&clock, "task-1", "tm-1", true, 1)).unwrap();
        logger.log(&gate_entry(&clock, "task-2", "tm-1", false, 1)).unwrap();
        logger.log(&gate_entry(&clock, "task-2", "tm-2", true, 2)).unwrap();

        let hits = logger
            .query(
                "team",
                &AuditFilter {
                    task_id: Some("task-2".into()),
                    teammate_id: Some("tm-1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].task_id.as_deref(), Some("task-2"));
    }

    #[test]
    fn test_summary_sessions_and_first_cycle_passes() {
        let (logger, clock, _dir) = logger();
        // task-1/tm-1: failed on 1, passed on 2, so this is a retry session.
        logger.log(&gate_entry(&clock, "task-1", "tm-1", false, 1)).unwrap();
        logger.log(&gate_entry(&clock, "task-1", "tm-1", true, 2)).unwrap();
        // task-2/tm-2: passed first cycle.
        logger.log(&gate_entry(&clock, "task-2", "tm-2", true, 1)).unwrap();

        let summary = logger.summary("team").unwrap();
        assert_eq!(summary.review_sessions, 2);
        assert_eq!(summary.passed_first_cycle, 1);
        assert!((summary.average_cycles - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_counts_escalations_stalls_conflicts() {
        let (logger, clock, _dir) = logger();
        logger
            .log(&AuditEntry::new(AuditEventKind::ReviewEscalated, "team", clock.now()))
            .unwrap();
        logger
            .log(&AuditEntry::new(AuditEventKind::HealthStall, "team", clock.now()))
            .unwrap();
        logger
            .log(&AuditEntry::new(AuditEventKind::HealthStall, "team", clock.now()))
            .unwrap();
        logger
            .log(&AuditEntry::new(AuditEventKind::FileConflict, "team", clock.now()))
            .unwrap();

        let summary = logger.summary("team").unwrap();
        assert_eq!(summary.escalations, 1);
        assert_eq!(summary.stalls, 2);
        assert_eq!(summary.file_conflicts, 1);
        assert_eq!(summary.review_sessions, 0);
        assert_eq!(summary.average_cycles, 0.0);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (logger, clock, dir) = logger();
        logger.log(&gate_entry(&clock, "task-1", "tm-1", true, 1)).unwrap();

        let path = dir.path().join("team").join("audit.jsonl");
        use std::io::Write;
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{ definitely broken").unwrap();
        drop(file);

        let entries = logger.entries("team").unwrap();
        assert_eq!(entries.len(), 1);
        let summary = logger.summary("team").unwrap();
        assert_eq!(summary.review_sessions, 1);
    }

    #[test]
    fn test_summary_empty_log() {
        let (logger, _clock, _dir) = logger();
        let summary = logger.summary("missing-team").unwrap();
        assert_eq!(summary, AuditSummary::default());
    }
}
