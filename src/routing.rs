//! Task-domain classification, teammate routing, and architecture
//! selection.
//!
//! Classification is priority-ordered keyword lookup: a "React component
//! UX polish" task is UX design, not frontend, because the UX table is
//! checked first. Architecture selection is a short-circuited rule list
//! over simple features of the task set.

use crate::learning::LearningGuidance;
use crate::team::types::{Task, TeammateRole};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Model every UX-design task is pinned to.
const UX_DESIGN_MODEL: &str = "claude-opus-4-6";

/// Closed set of task domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDomain {
    UxDesign,
    Frontend,
    Backend,
    Search,
    Research,
    Review,
    Escalation,
    Integration,
    Testing,
    Planning,
    Docs,
    Remediation,
    RolloutSafety,
    Other,
}

impl TaskDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UxDesign => "ux_design",
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Search => "search",
            Self::Research => "research",
            Self::Review => "review",
            Self::Escalation => "escalation",
            Self::Integration => "integration",
            Self::Testing => "testing",
            Self::Planning => "planning",
            Self::Docs => "docs",
            Self::Remediation => "remediation",
            Self::RolloutSafety => "rollout_safety",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TaskDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keyword tables in priority order; first hit wins.
fn domain_keywords() -> &'static [(TaskDomain, &'static [&'static str])] {
    &[
        (
            TaskDomain::UxDesign,
            &["ux", "user experience", "design system", "accessibility", "a11y", "visual design"],
        ),
        (
            TaskDomain::RolloutSafety,
            &["rollout", "feature flag", "canary", "rollback plan"],
        ),
        (
            TaskDomain::Remediation,
            &["remediat", "hotfix", "regression fix"],
        ),
        (
            TaskDomain::Escalation,
            &["escalat", "blocked task", "stuck"],
        ),
        (
            TaskDomain::Review,
            &["review", "code quality", "audit the"],
        ),
        (
            TaskDomain::Integration,
            &["integrat", "wire together", "end-to-end flow"],
        ),
        (
            TaskDomain::Testing,
            &["test", "coverage", "e2e"],
        ),
        (
            TaskDomain::Research,
            &["research", "investigate", "evaluate", "compare options"],
        ),
        (
            TaskDomain::Search,
            &["search", "find ", "locate", "grep"],
        ),
        (
            TaskDomain::Planning,
            &["plan", "roadmap", "milestone", "decompose"],
        ),
        (
            TaskDomain::Docs,
            &["docs", "document", "readme", "changelog"],
        ),
        (
            TaskDomain::Frontend,
            &["react", "frontend", "component", "css", "tailwind", "vue", "ui "],
        ),
        (
            TaskDomain::Backend,
            &["backend", "api", "endpoint", "database", "server", "migration", "queue"],
        ),
    ]
}

/// Classify free text into a domain.
pub fn classify_task_domain(text: &str) -> TaskDomain {
    let text = text.to_lowercase();
    for (domain, keywords) in domain_keywords() {
        if keywords.iter().any(|keyword| text.contains(keyword)) {
            return *domain;
        }
    }
    TaskDomain::Other
}

/// Input to [`decide_teammate_routing`].
#[derive(Debug, Clone, Default)]
pub struct RoutingRequest {
    pub prompt: String,
    pub requested_role: Option<TeammateRole>,
    pub requested_model: Option<String>,
}

/// Routing verdict for one spawn request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub domain: TaskDomain,
    pub role: TeammateRole,
    /// True when a hard rule overrode the requested role.
    pub role_enforced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    pub skill_slugs: Vec<String>,
    pub reason: String,
}

/// Pick a role (and possibly a model) for a teammate spawn request.
pub fn decide_teammate_routing(request: &RoutingRequest) -> RoutingDecision {
    let domain = classify_task_domain(&request.prompt);

    // Hard rule: UX design always goes to a head on the pinned model.
    if domain == TaskDomain::UxDesign {
        return RoutingDecision {
            domain,
            role: TeammateRole::Head,
            role_enforced: true,
            model_override: Some(UX_DESIGN_MODEL.to_string()),
            skill_slugs: skill_slugs_for(domain),
            reason: "ux_design tasks are always led by a head on the design model".to_string(),
        };
    }

    let default_role = match domain {
        TaskDomain::Review => TeammateRole::Reviewer,
        TaskDomain::Escalation => TeammateRole::Escalation,
        _ => TeammateRole::Worker,
    };
    let role = request.requested_role.unwrap_or(default_role);

    RoutingDecision {
        domain,
        role,
        role_enforced: false,
        model_override: None,
        skill_slugs: skill_slugs_for(domain),
        reason: format!("classified as {domain}; routed to {role}"),
    }
}

fn skill_slugs_for(domain: TaskDomain) -> Vec<String> {
    let slugs: &[&str] = match domain {
        TaskDomain::UxDesign => &["design-system", "accessibility"],
        TaskDomain::Frontend => &["frontend"],
        TaskDomain::Backend => &["backend"],
        TaskDomain::Testing => &["test-author"],
        TaskDomain::Review => &["code-review"],
        TaskDomain::Docs => &["technical-writing"],
        TaskDomain::RolloutSafety => &["release-engineering"],
        _ => &[],
    };
    slugs.iter().map(|s| s.to_string()).collect()
}

/// Execution architecture for a task set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchitectureMode {
    /// One agent does everything.
    Single,
    /// Workers in parallel, no middle management.
    Flat,
    /// Heads coordinate workers.
    Managed,
    /// Mixed flat and managed segments.
    Hybrid,
}

/// Features extracted from the task set, kept for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureFeatures {
    pub task_count: usize,
    pub domain_count: usize,
    pub dependency_ratio: f32,
    pub max_tasks_per_domain: usize,
    pub has_ux_design: bool,
    pub research_or_search_only: bool,
}

/// Architecture verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureDecision {
    pub mode: ArchitectureMode,
    pub confidence: f32,
    pub rationale: Vec<String>,
    pub features: ArchitectureFeatures,
}

/// Choose the execution architecture for a set of tasks. Rules
/// short-circuit in order; a learning hint can promote the result to
/// managed.
pub fn select_architecture_mode(
    tasks: &[Task],
    learning_hint: Option<&LearningGuidance>,
) -> ArchitectureDecision {
    let task_count = tasks.len();
    let mut domain_tasks: HashMap<TaskDomain, usize> = HashMap::new();
    for task in tasks {
        let domain = classify_task_domain(&format!("{} {}", task.title, task.description));
        *domain_tasks.entry(domain).or_insert(0) += 1;
    }
    let meaningful: HashSet<TaskDomain> = domain_tasks
        .keys()
        .copied()
        .filter(|domain| *domain != TaskDomain::Other)
        .collect();
    let domain_count = meaningful.len().max(usize::from(task_count > 0));
    let dependency_ratio = if task_count == 0 {
        0.0
    } else {
        tasks.iter().filter(|t| !t.depends_on.is_empty()).count() as f32 / task_count as f32
    };
    let max_tasks_per_domain = domain_tasks.values().copied().max().unwrap_or(0);
    let has_ux_design = domain_tasks.contains_key(&TaskDomain::UxDesign);
    let research_or_search_only = !domain_tasks.is_empty()
        && domain_tasks
            .keys()
            .all(|d| matches!(d, TaskDomain::Research | TaskDomain::Search));

    let features = ArchitectureFeatures {
        task_count,
        domain_count,
        dependency_ratio,
        max_tasks_per_domain,
        has_ux_design,
        research_or_search_only,
    };

    let (mode, confidence, why): (ArchitectureMode, f32, String) = if task_count <= 1 {
        (ArchitectureMode::Single, 0.97, "one task needs one agent".into())
    } else if has_ux_design {
        (
            ArchitectureMode::Managed,
            0.95,
            "ux design work always runs managed".into(),
        )
    } else if research_or_search_only {
        (
            ArchitectureMode::Flat,
            0.90,
            "research and search fan out flat".into(),
        )
    } else if domain_count >= 3 {
        (
            ArchitectureMode::Managed,
            0.90,
            format!("{domain_count} domains need coordination"),
        )
    } else if dependency_ratio >= 0.35 && task_count >= 4 {
        (
            ArchitectureMode::Managed,
            0.88,
            format!("dependency ratio {dependency_ratio:.2} needs sequencing"),
        )
    } else if domain_count == 2 {
        if max_tasks_per_domain <= 4 {
            (
                ArchitectureMode::Flat,
                0.83,
                "two small domains run flat".into(),
            )
        } else {
            (
                ArchitectureMode::Managed,
                0.86,
                "two domains with a heavy side need a head".into(),
            )
        }
    } else if task_count >= 8 {
        (
            ArchitectureMode::Managed,
            0.84,
            "large single-domain batch needs a head".into(),
        )
    } else if task_count <= 3 {
        (
            ArchitectureMode::Single,
            0.78,
            "small batch fits one agent".into(),
        )
    } else {
        (
            ArchitectureMode::Flat,
            0.78,
            "medium batch runs flat".into(),
        )
    };

    let mut rationale = vec![why];
    let mut mode = mode;
    let mut confidence = confidence;
    if let Some(hint) = learning_hint
        && hint.prefer_managed
    {
        if mode != ArchitectureMode::Managed {
            rationale.push("learning history prefers managed execution".to_string());
            mode = ArchitectureMode::Managed;
        }
        confidence = (confidence + 0.08).min(1.0);
    }

    ArchitectureDecision {
        mode,
        confidence,
        rationale,
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(title: &str) -> Task {
        Task::new(title, "", "lead", Utc::now())
    }

    fn task_dep(title: &str, deps: Vec<String>) -> Task {
        Task::new(title, "", "lead", Utc::now()).with_dependencies(deps)
    }

    // =========================================
    // Domain classification
    // =========================================

    #[test]
    fn test_ux_wins_over_frontend() {
        assert_eq!(
            classify_task_domain("Polish the React component UX"),
            TaskDomain::UxDesign
        );
    }

    #[test]
    fn test_frontend_and_backend() {
        assert_eq!(
            classify_task_domain("Build the React dashboard"),
            TaskDomain::Frontend
        );
        assert_eq!(
            classify_task_domain("Add the payments endpoint"),
            TaskDomain::Backend
        );
    }

    #[test]
    fn test_review_and_escalation() {
        assert_eq!(
            classify_task_domain("Review the auth changes"),
            TaskDomain::Review
        );
        assert_eq!(
            classify_task_domain("Escalate the stuck deployment"),
            TaskDomain::Escalation
        );
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        assert_eq!(
            classify_task_domain("RESEARCH caching options"),
            TaskDomain::Research
        );
    }

    #[test]
    fn test_unmatched_text_is_other() {
        assert_eq!(classify_task_domain("zzz qqq"), TaskDomain::Other);
    }

    // =========================================
    // Teammate routing
    // =========================================

    #[test]
    fn test_ux_design_hard_routes_to_head() {
        let decision = decide_teammate_routing(&RoutingRequest {
            prompt: "Improve onboarding UX".into(),
            requested_role: Some(TeammateRole::Worker),
            requested_model: None,
        });
        assert_eq!(decision.role, TeammateRole::Head);
        assert!(decision.role_enforced);
        assert_eq!(decision.model_override.as_deref(), Some("claude-opus-4-6"));
        assert!(decision.skill_slugs.contains(&"design-system".to_string()));
    }

    #[test]
    fn test_review_routes_to_reviewer() {
        let decision = decide_teammate_routing(&RoutingRequest {
            prompt: "Review the login implementation".into(),
            ..Default::default()
        });
        assert_eq!(decision.role, TeammateRole::Reviewer);
        assert!(!decision.role_enforced);
        assert!(decision.model_override.is_none());
    }

    #[test]
    fn test_default_routes_to_worker() {
        let decision = decide_teammate_routing(&RoutingRequest {
            prompt: "Add the payments endpoint".into(),
            ..Default::default()
        });
        assert_eq!(decision.role, TeammateRole::Worker);
    }

    #[test]
    fn test_requested_role_honored_outside_hard_rules() {
        let decision = decide_teammate_routing(&RoutingRequest {
            prompt: "Add the payments endpoint".into(),
            requested_role: Some(TeammateRole::Head),
            requested_model: None,
        });
        assert_eq!(decision.role, TeammateRole::Head);
        assert!(!decision.role_enforced);
    }

    // =========================================
    // Architecture selection
    // =========================================

    #[test]
    fn test_single_task_is_single() {
        let decision = select_architecture_mode(&[task("Add endpoint")], None);
        assert_eq!(decision.mode, ArchitectureMode::Single);
        assert!((decision.confidence - 0.97).abs() < 1e-6);
    }

    #[test]
    fn test_ux_presence_forces_managed() {
        let tasks = vec![task("Improve settings UX"), task("Add endpoint")];
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Managed);
        assert!((decision.confidence - 0.95).abs() < 1e-6);
        assert!(decision.features.has_ux_design);
    }

    #[test]
    fn test_research_only_is_flat() {
        let tasks = vec![
            task("Research caching options"),
            task("Search for existing rate limiters"),
        ];
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Flat);
        assert!((decision.confidence - 0.90).abs() < 1e-6);
        assert!(decision.features.research_or_search_only);
    }

    #[test]
    fn test_three_domains_is_managed() {
        let tasks = vec![
            task("Build the React dashboard"),
            task("Add the payments endpoint"),
            task("Write e2e test coverage"),
        ];
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Managed);
        assert!((decision.confidence - 0.90).abs() < 1e-6);
    }

    #[test]
    fn test_dependency_heavy_is_managed() {
        let tasks = vec![
            task("Add schema for payments"),
            task_dep("Add payments endpoint", vec!["a".into()]),
            task_dep("Add payments webhooks to the api", vec!["b".into()]),
            task("Add payments database indexes"),
        ];
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Managed);
        assert!((decision.confidence - 0.88).abs() < 1e-6);
    }

    #[test]
    fn test_two_small_domains_flat() {
        let tasks = vec![
            task("Build the React header component"),
            task("Build the React footer component"),
            task("Add the sessions endpoint"),
            task("Add the users endpoint"),
        ];
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Flat);
        assert!((decision.confidence - 0.83).abs() < 1e-6);
    }

    #[test]
    fn test_two_domains_heavy_side_managed() {
        let mut tasks: Vec<Task> = (0..5)
            .map(|i| task(&format!("Add api endpoint {i} to the backend")))
            .collect();
        tasks.push(task("Build the React dashboard"));
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Managed);
        assert!((decision.confidence - 0.86).abs() < 1e-6);
    }

    #[test]
    fn test_large_single_domain_managed() {
        let tasks: Vec<Task> = (0..8)
            .map(|i| task(&format!("Add api endpoint {i} to the backend")))
            .collect();
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Managed);
        assert!((decision.confidence - 0.84).abs() < 1e-6);
    }

    #[test]
    fn test_small_batch_single() {
        let tasks = vec![
            task("Add api endpoint one to the backend"),
            task("Add api endpoint two to the backend"),
        ];
        let decision = select_architecture_mode(&tasks, None);
        assert_eq!(decision.mode, ArchitectureMode::Single);
        assert!((decision.confidence - 0.78).abs() < 1e-6);
    }

    #[test]
    fn test_learning_hint_promotes_to_managed() {
        let tasks = vec![
            task("Add api endpoint one to the backend"),
            task("Add api endpoint two to the backend"),
        ];
        let hint = LearningGuidance {
            prefer_managed: true,
            tighten_error_bypass: false,
            rationale: vec![],
        };
        let decision = select_architecture_mode(&tasks, Some(&hint));
        assert_eq!(decision.mode, ArchitectureMode::Managed);
        assert!((decision.confidence - 0.86).abs() < 1e-6);
        assert!(
            decision
                .rationale
                .iter()
                .any(|r| r.contains("learning history"))
        );
    }

    #[test]
    fn test_learning_hint_confidence_clamped() {
        let tasks = vec![task("Improve settings UX"), task("Add endpoint")];
        let hint = LearningGuidance {
            prefer_managed: true,
            tighten_error_bypass: false,
            rationale: vec![],
        };
        let decision = select_architecture_mode(&tasks, Some(&hint));
        assert!(decision.confidence <= 1.0);
    }
}
