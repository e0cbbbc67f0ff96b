//! File-ownership tracking across concurrent teammates.
//!
//! The first teammate to modify a path owns it until the review loop (or a
//! shutdown) releases it. A second writer produces a [`FileConflict`];
//! strict mode marks the conflict blocking, warn mode leaves the caller to
//! proceed.

use crate::clock::SharedClock;
use crate::team::types::{MAX_FILE_CONFLICTS_PER_TEAM, push_capped};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Conflict handling policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipMode {
    /// Report conflicts but let the write proceed.
    #[default]
    Warn,
    /// Mark conflicts as blocking.
    Strict,
}

/// One editor touching a contested path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEditor {
    pub teammate_id: String,
    pub teammate_name: String,
    pub at: DateTime<Utc>,
}

/// A detected concurrent-edit conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConflict {
    pub path: PathBuf,
    pub editors: Vec<ConflictEditor>,
    pub detected_at: DateTime<Utc>,
    pub blocked: bool,
}

/// Current owner of a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOwnership {
    pub owner_id: String,
    pub owner_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub since: DateTime<Utc>,
    pub modification_count: u32,
}

#[derive(Default)]
struct TeamOwnership {
    files: HashMap<PathBuf, FileOwnership>,
    conflicts: Vec<FileConflict>,
}

/// Per-team file-ownership tracker.
pub struct OwnershipTracker {
    mode: OwnershipMode,
    clock: SharedClock,
    teams: std::sync::Mutex<HashMap<String, TeamOwnership>>,
}

impl OwnershipTracker {
    pub fn new(mode: OwnershipMode, clock: SharedClock) -> Self {
        Self {
            mode,
            clock,
            teams: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> OwnershipMode {
        self.mode
    }

    /// Record a modification. Returns a conflict when the path is already
    /// owned by a different teammate; the same owner just increments the
    /// modification count.
    pub fn record_modification(
        &self,
        team_id: &str,
        path: &Path,
        teammate_id: &str,
        teammate_name: &str,
        task_id: Option<&str>,
    ) -> Option<FileConflict> {
        let now = self.clock.now();
        let path = normalize_path(path);
        let mut teams = self.teams.lock().expect("ownership lock");
        let team = teams.entry(team_id.to_string()).or_default();

        match team.files.get_mut(&path) {
            Some(ownership) if ownership.owner_id == teammate_id => {
                ownership.modification_count += 1;
                None
            }
            Some(ownership) => {
                let conflict = FileConflict {
                    path: path.clone(),
                    editors: vec![
                        ConflictEditor {
                            teammate_id: ownership.owner_id.clone(),
                            teammate_name: ownership.owner_name.clone(),
                            at: ownership.since,
                        },
                        ConflictEditor {
                            teammate_id: teammate_id.to_string(),
                            teammate_name: teammate_name.to_string(),
                            at: now,
                        },
                    ],
                    detected_at: now,
                    blocked: self.mode == OwnershipMode::Strict,
                };
                tracing::warn!(
                    team_id,
                    path = %path.display(),
                    owner = %ownership.owner_id,
                    writer = %teammate_id,
                    blocked = conflict.blocked,
                    "file conflict detected"
                );
                push_capped(
                    &mut team.conflicts,
                    conflict.clone(),
                    MAX_FILE_CONFLICTS_PER_TEAM,
                );
                Some(conflict)
            }
            None => {
                team.files.insert(
                    path,
                    FileOwnership {
                        owner_id: teammate_id.to_string(),
                        owner_name: teammate_name.to_string(),
                        task_id: task_id.map(str::to_string),
                        since: now,
                        modification_count: 1,
                    },
                );
                None
            }
        }
    }

    /// Non-recording pre-check: would this write conflict?
    pub fn check_conflict(&self, team_id: &str, path: &Path, teammate_id: &str) -> bool {
        let path = normalize_path(path);
        let teams = self.teams.lock().expect("ownership lock");
        teams
            .get(team_id)
            .and_then(|team| team.files.get(&path))
            .is_some_and(|ownership| ownership.owner_id != teammate_id)
    }

    /// Release specific paths, typically after a terminal review outcome.
    pub fn release_files(&self, team_id: &str, paths: &[PathBuf]) {
        let mut teams = self.teams.lock().expect("ownership lock");
        if let Some(team) = teams.get_mut(team_id) {
            for path in paths {
                team.files.remove(&normalize_path(path));
            }
        }
    }

    /// Release everything held by one teammate, for the shutdown path.
    pub fn release_all_for(&self, team_id: &str, teammate_id: &str) {
        let mut teams = self.teams.lock().expect("ownership lock");
        if let Some(team) = teams.get_mut(team_id) {
            team.files
                .retain(|_, ownership| ownership.owner_id != teammate_id);
        }
    }

    /// Current owner of a path, if any.
    pub fn owner(&self, team_id: &str, path: &Path) -> Option<FileOwnership> {
        let path = normalize_path(path);
        let teams = self.teams.lock().expect("ownership lock");
        teams
            .get(team_id)
            .and_then(|team| team.files.get(&path))
            .cloned()
    }

    /// Recorded conflicts for a team, oldest first.
    pub fn conflicts(&self, team_id: &str) -> Vec<FileConflict> {
        let teams = self.teams.lock().expect("ownership lock");
        teams
            .get(team_id)
            .map(|team| team.conflicts.clone())
            .unwrap_or_default()
    }

    /// Drop all state for a team.
    pub fn clear_team(&self, team_id: &str) {
        self.teams.lock().expect("ownership lock").remove(team_id);
    }
}

/// Lexically normalize a path: strip `.` segments and resolve `..` where
/// possible, without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker(mode: OwnershipMode) -> OwnershipTracker {
        OwnershipTracker::new(mode, ManualClock::from_wall_clock().shared())
    }

    #[test]
    fn test_first_writer_takes_ownership() {
        let tracker = tracker(OwnershipMode::Warn);
        let conflict = tracker.record_modification(
            "team",
            Path::new("src/auth.rs"),
            "tm-1",
            "alice",
            Some("task-1"),
        );
        assert!(conflict.is_none());

        let ownership = tracker.owner("team", Path::new("src/auth.rs")).unwrap();
        assert_eq!(ownership.owner_id, "tm-1");
        assert_eq!(ownership.modification_count, 1);
        assert_eq!(ownership.task_id.as_deref(), Some("task-1"));
    }

    #[test]
    fn test_same_owner_increments_count() {
        let tracker = tracker(OwnershipMode::Warn);
        tracker.record_modification("team", Path::new("src/a.rs"), "tm-1", "alice", None);
        let conflict =
            tracker.record_modification("team", Path::new("src/a.rs"), "tm-1", "alice", None);
        assert!(conflict.is_none());
        assert_eq!(
            tracker.owner("team", Path::new("src/a.rs")).unwrap().modification_count,
            2
        );
    }

    #[test]
    fn test_second_writer_conflicts_warn_mode() {
        let tracker = tracker(OwnershipMode::Warn);
        tracker.record_modification("team", Path::new("src/a.rs"), "tm-1", "alice", None);
        let conflict = tracker
            .record_modification("team", Path::new("src/a.rs"), "tm-2", "bob", None)
            .expect("conflict expected");
        assert!(!conflict.blocked);
        assert_eq!(conflict.editors.len(), 2);
        assert_eq!(conflict.editors[0].teammate_id, "tm-1");
        assert_eq!(conflict.editors[1].teammate_id, "tm-2");
    }

    #[test]
    fn test_strict_mode_blocks() {
        let tracker = tracker(OwnershipMode::Strict);
        tracker.record_modification("team", Path::new("src/a.rs"), "tm-1", "alice", None);
        let conflict = tracker
            .record_modification("team", Path::new("src/a.rs"), "tm-2", "bob", None)
            .unwrap();
        assert!(conflict.blocked);
    }

    #[test]
    fn test_check_conflict_does_not_record() {
        let tracker = tracker(OwnershipMode::Warn);
        tracker.record_modification("team", Path::new("src/a.rs"), "tm-1", "alice", None);

        assert!(tracker.check_conflict("team", Path::new("src/a.rs"), "tm-2"));
        assert!(!tracker.check_conflict("team", Path::new("src/a.rs"), "tm-1"));
        assert!(!tracker.check_conflict("team", Path::new("src/b.rs"), "tm-2"));
        assert!(tracker.conflicts("team").is_empty());
    }

    #[test]
    fn test_paths_are_normalized() {
        let tracker = tracker(OwnershipMode::Warn);
        tracker.record_modification("team", Path::new("src/./auth.rs"), "tm-1", "alice", None);
        assert!(tracker.check_conflict("team", Path::new("src/auth.rs"), "tm-2"));
        assert!(tracker.check_conflict("team", Path::new("src/sub/../auth.rs"), "tm-2"));
    }

    #[test]
    fn test_release_files_frees_ownership() {
        let tracker = tracker(OwnershipMode::Warn);
        tracker.record_modification("team", Path::new("src/a.rs"), "tm-1", "alice", None);
        tracker.record_modification("team", Path::new("src/b.rs"), "tm-1", "alice", None);

        tracker.release_files("team", &[PathBuf::from("src/a.rs")]);
        assert!(tracker.owner("team", Path::new("src/a.rs")).is_none());
        assert!(tracker.owner("team", Path::new("src/b.rs")).is_some());

        let conflict =
            tracker.record_modification("team", Path::new("src/a.rs"), "tm-2", "bob", None);
        assert!(conflict.is_none());
    }

    #[test]
    fn test_release_all_for_shutdown() {
        let tracker = tracker(OwnershipMode::Warn);
        tracker.record_modification("team", Path::new("src/a.rs"), "tm-1", "alice", None);
        tracker.record_modification("team", Path::new("src/b.rs"), "tm-1", "alice", None);
        tracker.record_modification("team", Path::new("src/c.rs"), "tm-2", "bob", None);

        tracker.release_all_for("team", "tm-1");
        assert!(tracker.owner("team", Path::new("src/a.rs")).is_none());
        assert!(tracker.owner("team", Path::new("src/b.rs")).is_none());
        assert!(tracker.owner("team", Path::new("src/c.rs")).is_some());
    }

    #[test]
    fn test_conflicts_capped_oldest_first_eviction() {
        let tracker = tracker(OwnershipMode::Warn);
        for i in 0..60 {
            let path = format!("src/file-{i}.rs");
            tracker.record_modification("team", Path::new(&path), "tm-1", "alice", None);
            tracker.record_modification("team", Path::new(&path), "tm-2", "bob", None);
        }
        let conflicts = tracker.conflicts("team");
        assert_eq!(conflicts.len(), MAX_FILE_CONFLICTS_PER_TEAM);
        // The oldest ten were evicted.
        assert_eq!(conflicts[0].path, PathBuf::from("src/file-10.rs"));
    }

    #[test]
    fn test_teams_are_isolated() {
        let tracker = tracker(OwnershipMode::Warn);
        tracker.record_modification("team-a", Path::new("src/a.rs"), "tm-1", "alice", None);
        assert!(!tracker.check_conflict("team-b", Path::new("src/a.rs"), "tm-2"));
    }
}
