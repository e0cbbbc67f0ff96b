//! Cost rollups across a team.

use crate::team::types::{Team, TokenUsage};
use serde::{Deserialize, Serialize};

/// Usage attributed to one teammate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeammateCost {
    pub teammate_id: String,
    pub name: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Usage attributed to one model across teammates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub model: String,
    pub usage: TokenUsage,
}

/// Per-team cost summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total: TokenUsage,
    pub by_teammate: Vec<TeammateCost>,
    pub by_model: Vec<ModelCost>,
}

impl CostSummary {
    /// Roll up a team's member usage, most expensive first.
    pub fn from_team(team: &Team) -> Self {
        let mut total = TokenUsage::default();
        let mut by_teammate = Vec::new();
        let mut model_usage: Vec<(String, TokenUsage)> = Vec::new();

        for member in &team.members {
            total.add(&member.usage);
            by_teammate.push(TeammateCost {
                teammate_id: member.id.clone(),
                name: member.name.clone(),
                model: member.model.clone(),
                usage: member.usage,
            });
            match model_usage.iter_mut().find(|(model, _)| *model == member.model) {
                Some((_, usage)) => usage.add(&member.usage),
                None => model_usage.push((member.model.clone(), member.usage)),
            }
        }

        by_teammate.sort_by(|a, b| {
            b.usage
                .cost_usd
                .partial_cmp(&a.usage.cost_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut by_model: Vec<ModelCost> = model_usage
            .into_iter()
            .map(|(model, usage)| ModelCost { model, usage })
            .collect();
        by_model.sort_by(|a, b| {
            b.usage
                .cost_usd
                .partial_cmp(&a.usage.cost_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Self {
            total,
            by_teammate,
            by_model,
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total.cost_usd
    }
}
