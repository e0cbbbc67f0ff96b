//! In-memory team knowledge bus.
//!
//! Teammates publish discoveries, patterns, decisions, and warnings; anyone
//! can query by tag, file, or free text. Entries age out by TTL and by the
//! retention window; pruning happens on every query so readers never see
//! stale knowledge. A process-wide registry keyed by team id backs the
//! default wiring; tests construct their own bus with a manual clock.

use crate::clock::{SharedClock, system_clock};
use crate::ownership::{ConflictEditor, FileConflict};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

/// Default retention window for knowledge entries.
pub const KNOWLEDGE_RETENTION_DAYS: i64 = 14;

/// Co-edit detection window.
const CO_EDIT_WINDOW_SECS: i64 = 30;

/// Category of a knowledge entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnowledgeKind {
    Pattern,
    Discovery,
    Decision,
    Warning,
    InterfaceContract,
}

/// One shared piece of team knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub kind: KnowledgeKind,
    pub content: String,
    /// Teammate id that published the entry.
    pub source: String,
    #[serde(default)]
    pub file_paths: Vec<PathBuf>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Optional time-to-live in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<i64>,
}

impl KnowledgeEntry {
    pub fn new(
        kind: KnowledgeKind,
        content: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            source: source.into(),
            file_paths: Vec::new(),
            tags: Vec::new(),
            timestamp,
            ttl_ms: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_files(mut self, paths: Vec<PathBuf>) -> Self {
        self.file_paths = paths;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(ttl.num_milliseconds());
        self
    }

    /// Expired when the TTL has elapsed or the entry is older than the
    /// retention window.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        if let Some(ttl_ms) = self.ttl_ms
            && now >= self.timestamp + Duration::milliseconds(ttl_ms)
        {
            return true;
        }
        now - self.timestamp > retention
    }
}

/// Size limits for [`KnowledgeBus::build_prompt_context`].
#[derive(Debug, Clone, Copy)]
pub struct PromptContextLimits {
    pub max_chars: usize,
    pub max_entries: usize,
    pub max_tokens: usize,
}

impl Default for PromptContextLimits {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            max_entries: 10,
            max_tokens: 1000,
        }
    }
}

#[derive(Default)]
struct TeamKnowledge {
    entries: Vec<KnowledgeEntry>,
    recent_edits: HashMap<PathBuf, Vec<(String, String, DateTime<Utc>)>>,
    conflicts: Vec<FileConflict>,
}

/// Per-team knowledge bus.
pub struct KnowledgeBus {
    clock: SharedClock,
    retention: Duration,
    teams: Mutex<HashMap<String, TeamKnowledge>>,
}

impl KnowledgeBus {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            retention: Duration::days(KNOWLEDGE_RETENTION_DAYS),
            teams: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an entry; returns its id.
    pub fn publish(&self, team_id: &str, entry: KnowledgeEntry) -> String {
        let id = entry.id.clone();
        let mut teams = self.teams.lock().expect("knowledge lock");
        teams
            .entry(team_id.to_string())
            .or_default()
            .entries
            .push(entry);
        id
    }

    fn prune(&self, team: &mut TeamKnowledge, now: DateTime<Utc>) {
        team.entries
            .retain(|entry| !entry.is_expired(now, self.retention));
    }

    /// Entries overlapping any of the given tags, newest first. Empty tag
    /// list matches everything.
    pub fn query(&self, team_id: &str, tags: &[String], limit: usize) -> Vec<KnowledgeEntry> {
        let now = self.clock.now();
        let mut teams = self.teams.lock().expect("knowledge lock");
        let Some(team) = teams.get_mut(team_id) else {
            return Vec::new();
        };
        self.prune(team, now);

        let mut matches: Vec<KnowledgeEntry> = team
            .entries
            .iter()
            .filter(|entry| {
                tags.is_empty() || entry.tags.iter().any(|tag| tags.contains(tag))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matches.truncate(limit);
        matches
    }

    /// Entries touching a path.
    pub fn query_by_file(&self, team_id: &str, path: &Path) -> Vec<KnowledgeEntry> {
        let now = self.clock.now();
        let mut teams = self.teams.lock().expect("knowledge lock");
        let Some(team) = teams.get_mut(team_id) else {
            return Vec::new();
        };
        self.prune(team, now);
        team.entries
            .iter()
            .filter(|entry| entry.file_paths.iter().any(|p| p == path))
            .cloned()
            .collect()
    }

    /// Entries scored by substring match and token overlap against a query.
    pub fn query_text(&self, team_id: &str, query: &str, limit: usize) -> Vec<KnowledgeEntry> {
        let now = self.clock.now();
        let mut teams = self.teams.lock().expect("knowledge lock");
        let Some(team) = teams.get_mut(team_id) else {
            return Vec::new();
        };
        self.prune(team, now);

        let query_lower = query.to_lowercase();
        let query_tokens: Vec<&str> = query_lower.split_whitespace().collect();

        let mut scored: Vec<(u32, KnowledgeEntry)> = team
            .entries
            .iter()
            .filter_map(|entry| {
                let content = entry.content.to_lowercase();
                let mut score = 0u32;
                if !query_lower.is_empty() && content.contains(&query_lower) {
                    score += 10;
                }
                for token in &query_tokens {
                    if token.len() >= 3 && content.contains(token) {
                        score += 1;
                    }
                    if entry.tags.iter().any(|tag| tag.eq_ignore_ascii_case(token)) {
                        score += 2;
                    }
                }
                (score > 0).then(|| (score, entry.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.timestamp.cmp(&a.1.timestamp)));
        scored.into_iter().map(|(_, e)| e).take(limit).collect()
    }

    /// Note a file edit; overlapping editors inside the 30-second window
    /// produce a synthetic warning entry plus a conflict record.
    pub fn record_file_edit(
        &self,
        team_id: &str,
        path: &Path,
        teammate_id: &str,
        teammate_name: &str,
    ) -> Option<FileConflict> {
        let now = self.clock.now();
        let window = Duration::seconds(CO_EDIT_WINDOW_SECS);
        let mut teams = self.teams.lock().expect("knowledge lock");
        let team = teams.entry(team_id.to_string()).or_default();

        let editors = team.recent_edits.entry(path.to_path_buf()).or_default();
        editors.retain(|(_, _, at)| now - *at <= window);

        let overlapping: Vec<(String, String, DateTime<Utc>)> = editors
            .iter()
            .filter(|(id, _, _)| id != teammate_id)
            .cloned()
            .collect();
        editors.push((teammate_id.to_string(), teammate_name.to_string(), now));

        if overlapping.is_empty() {
            return None;
        }

        let mut conflict_editors: Vec<ConflictEditor> = overlapping
            .iter()
            .map(|(id, name, at)| ConflictEditor {
                teammate_id: id.clone(),
                teammate_name: name.clone(),
                at: *at,
            })
            .collect();
        conflict_editors.push(ConflictEditor {
            teammate_id: teammate_id.to_string(),
            teammate_name: teammate_name.to_string(),
            at: now,
        });

        let conflict = FileConflict {
            path: path.to_path_buf(),
            editors: conflict_editors,
            detected_at: now,
            blocked: false,
        };
        crate::team::types::push_capped(
            &mut team.conflicts,
            conflict.clone(),
            crate::team::types::MAX_FILE_CONFLICTS_PER_TEAM,
        );

        let names: Vec<&str> = overlapping.iter().map(|(_, name, _)| name.as_str()).collect();
        let warning = KnowledgeEntry::new(
            KnowledgeKind::Warning,
            format!(
                "Concurrent edits on {} by {} and {}; coordinate before continuing.",
                path.display(),
                names.join(", "),
                teammate_name
            ),
            teammate_id,
            now,
        )
        .with_files(vec![path.to_path_buf()])
        .with_tags(vec!["file-conflict".to_string()]);
        team.entries.push(warning);

        Some(conflict)
    }

    /// Conflicts recorded by the co-edit detector.
    pub fn conflicts(&self, team_id: &str) -> Vec<FileConflict> {
        let teams = self.teams.lock().expect("knowledge lock");
        teams
            .get(team_id)
            .map(|team| team.conflicts.clone())
            .unwrap_or_default()
    }

    /// A bounded markdown block of the knowledge most relevant to a task
    /// prompt, honoring the character, entry, and token budgets.
    pub fn build_prompt_context(
        &self,
        team_id: &str,
        task_prompt: &str,
        limits: PromptContextLimits,
    ) -> String {
        let mut relevant = self.query_text(team_id, task_prompt, limits.max_entries);
        if relevant.is_empty() {
            relevant = self.query(team_id, &[], limits.max_entries);
        }
        if relevant.is_empty() {
            return String::new();
        }

        let header = "## Team knowledge\n\n";
        let mut out = String::from(header);
        let mut included = 0usize;
        for entry in relevant {
            let kind = match entry.kind {
                KnowledgeKind::Pattern => "pattern",
                KnowledgeKind::Discovery => "discovery",
                KnowledgeKind::Decision => "decision",
                KnowledgeKind::Warning => "warning",
                KnowledgeKind::InterfaceContract => "interface-contract",
            };
            let line = if entry.tags.is_empty() {
                format!("- [{}] {}\n", kind, entry.content)
            } else {
                format!("- [{}] {} ({})\n", kind, entry.content, entry.tags.join(", "))
            };

            let projected_chars = out.len() + line.len();
            let projected_tokens = projected_chars.div_ceil(4);
            if projected_chars > limits.max_chars
                || projected_tokens > limits.max_tokens
                || included >= limits.max_entries
            {
                break;
            }
            out.push_str(&line);
            included += 1;
        }

        if included == 0 {
            return String::new();
        }
        out
    }

    /// Drop one team's knowledge.
    pub fn clear_team(&self, team_id: &str) {
        self.teams.lock().expect("knowledge lock").remove(team_id);
    }

    /// Drop everything. Exposed for tests of the process-wide registry.
    pub fn clear_all(&self) {
        self.teams.lock().expect("knowledge lock").clear();
    }
}

/// Process-wide knowledge bus keyed by team id.
pub fn global() -> &'static KnowledgeBus {
    static GLOBAL: OnceLock<KnowledgeBus> = OnceLock::new();
    GLOBAL.get_or_init(|| KnowledgeBus::new(system_clock()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::clock::ManualClock;

    fn bus() -> (KnowledgeBus, ManualClock) {
        let clock = ManualClock::from_wall_clock();
        (KnowledgeBus::new(clock.shared()), clock)
    }

    fn entry(bus_clock: &ManualClock, kind: KnowledgeKind, content: &str) -> KnowledgeEntry {
        KnowledgeEntry::new(kind, content, "tm-1", bus_clock.now())
    }

    // =========================================
    // Publish & query
    // =========================================

    #[test]
    fn test_query_by_tag_overlap() {
        let (bus, clock) = bus();
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::Discovery, "auth uses jwt")
                .with_tags(vec!["auth".into(), "security".into()]),
        );
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::Pattern, "db pool is shared")
                .with_tags(vec!["database".into()]),
        );

        let hits = bus.query("team", &["security".to_string()], 10);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("jwt"));

        let all = bus.query("team", &[], 10);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_query_newest_first_with_limit() {
        let (bus, clock) = bus();
        bus.publish("team", entry(&clock, KnowledgeKind::Discovery, "older"));
        clock.advance(Duration::seconds(10));
        bus.publish("team", entry(&clock, KnowledgeKind::Discovery, "newer"));

        let hits = bus.query("team", &[], 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "newer");
    }

    #[test]
    fn test_query_by_file() {
        let (bus, clock) = bus();
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::InterfaceContract, "auth api shape")
                .with_files(vec![PathBuf::from("src/auth.rs")]),
        );
        let hits = bus.query_by_file("team", Path::new("src/auth.rs"));
        assert_eq!(hits.len(), 1);
        assert!(bus.query_by_file("team", Path::new("src/db.rs")).is_empty());
    }

    #[test]
    fn test_query_text_scoring() {
        let (bus, clock) = bus();
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::Discovery, "the login endpoint caches sessions"),
        );
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::Pattern, "database migrations run at startup"),
        );

        let hits = bus.query_text("team", "login sessions", 10);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("login"));
    }

    // =========================================
    // TTL & retention (I8)
    // =========================================

    #[test]
    fn test_ttl_expiry() {
        let (bus, clock) = bus();
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::Warning, "transient state")
                .with_ttl(Duration::seconds(60)),
        );
        assert_eq!(bus.query("team", &[], 10).len(), 1);

        clock.advance(Duration::seconds(61));
        assert!(bus.query("team", &[], 10).is_empty());
    }

    #[test]
    fn test_retention_window_expiry() {
        let (bus, clock) = bus();
        bus.publish("team", entry(&clock, KnowledgeKind::Decision, "use sqlite"));

        clock.advance(Duration::days(15));
        assert!(bus.query("team", &[], 10).is_empty());
    }

    #[test]
    fn test_unexpired_entries_survive_pruning() {
        let (bus, clock) = bus();
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::Warning, "short lived").with_ttl(Duration::seconds(10)),
        );
        bus.publish("team", entry(&clock, KnowledgeKind::Decision, "long lived"));

        clock.advance(Duration::seconds(11));
        let remaining = bus.query("team", &[], 10);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "long lived");
    }

    // =========================================
    // Co-edit detection
    // =========================================

    #[test]
    fn test_overlapping_editors_produce_conflict_and_warning() {
        let (bus, clock) = bus();
        let path = Path::new("src/auth.rs");

        assert!(bus.record_file_edit("team", path, "tm-1", "alice").is_none());
        clock.advance(Duration::seconds(5));
        let conflict = bus
            .record_file_edit("team", path, "tm-2", "bob")
            .expect("conflict expected");

        assert_eq!(conflict.editors.len(), 2);
        assert_eq!(bus.conflicts("team").len(), 1);

        let warnings = bus.query("team", &["file-conflict".to_string()], 10);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, KnowledgeKind::Warning);
        assert!(warnings[0].content.contains("alice"));
        assert!(warnings[0].content.contains("bob"));
    }

    #[test]
    fn test_edits_outside_window_do_not_conflict() {
        let (bus, clock) = bus();
        let path = Path::new("src/auth.rs");

        bus.record_file_edit("team", path, "tm-1", "alice");
        clock.advance(Duration::seconds(31));
        assert!(bus.record_file_edit("team", path, "tm-2", "bob").is_none());
    }

    #[test]
    fn test_same_editor_never_conflicts_with_itself() {
        let (bus, _clock) = bus();
        let path = Path::new("src/auth.rs");
        bus.record_file_edit("team", path, "tm-1", "alice");
        assert!(bus.record_file_edit("team", path, "tm-1", "alice").is_none());
    }

    // =========================================
    // Prompt context
    // =========================================

    #[test]
    fn test_prompt_context_contains_relevant_entries() {
        let (bus, clock) = bus();
        bus.publish(
            "team",
            entry(&clock, KnowledgeKind::Discovery, "login endpoint lives in auth.rs")
                .with_tags(vec!["auth".into()]),
        );
        let context =
            bus.build_prompt_context("team", "implement login", PromptContextLimits::default());
        assert!(context.starts_with("## Team knowledge"));
        assert!(context.contains("[discovery] login endpoint"));
    }

    #[test]
    fn test_prompt_context_honors_char_budget() {
        let (bus, clock) = bus();
        for i in 0..20 {
            bus.publish(
                "team",
                entry(
                    &clock,
                    KnowledgeKind::Discovery,
                    &format!("finding number {i}: {}", "detail ".repeat(20)),
                ),
            );
        }
        let limits = PromptContextLimits {
            max_chars: 300,
            max_entries: 20,
            max_tokens: 10_000,
        };
        let context = bus.build_prompt_context("team", "finding detail", limits);
        assert!(context.len() <= 300);
        assert!(!context.is_empty());
    }

    #[test]
    fn test_prompt_context_honors_token_budget() {
        let (bus, clock) = bus();
        for i in 0..20 {
            bus.publish(
                "team",
                entry(
                    &clock,
                    KnowledgeKind::Discovery,
                    &format!("finding number {i}: {}", "detail ".repeat(20)),
                ),
            );
        }
        let limits = PromptContextLimits {
            max_chars: 100_000,
            max_entries: 20,
            max_tokens: 100,
        };
        let context = bus.build_prompt_context("team", "finding detail", limits);
        assert!(context.len().div_ceil(4) <= 100);
    }

    #[test]
    fn test_prompt_context_empty_when_no_knowledge() {
        let (bus, _clock) = bus();
        let context = bus.build_prompt_context("team", "anything", PromptContextLimits::default());
        assert!(context.is_empty());
    }

    // =========================================
    // Registry hygiene
    // =========================================

    #[test]
    fn test_clear_all() {
        let (bus, clock) = bus();
        bus.publish("team-a", entry(&clock, KnowledgeKind::Decision, "a"));
        bus.publish("team-b", entry(&clock, KnowledgeKind::Decision, "b"));
        bus.clear_all();
        assert!(bus.query("team-a", &[], 10).is_empty());
        assert!(bus.query("team-b", &[], 10).is_empty());
    }

    #[test]
    fn test_clear_team_is_scoped() {
        let (bus, clock) = bus();
        bus.publish("team-a", entry(&clock, KnowledgeKind::Decision, "a"));
        bus.publish("team-b", entry(&clock, KnowledgeKind::Decision, "b"));
        bus.clear_team("team-a");
        assert!(bus.query("team-a", &[], 10).is_empty());
        assert_eq!(bus.query("team-b", &[], 10).len(), 1);
    }
}
