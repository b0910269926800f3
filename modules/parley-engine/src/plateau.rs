//! Decides whether further evolution is worthwhile for a persona.

use serde::Serialize;

use parley_common::AgentVersion;

use crate::config::EvolutionConfig;

#[derive(Debug, Clone, Serialize)]
pub struct PlateauStatus {
    pub is_plateau: bool,
    pub reason: String,
    /// Fitness scores of the inspected versions, newest first.
    pub recent_scores: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_improvement: Option<f64>,
}

/// Pure function of version history; no side effects, queryable without
/// running a cycle.
///
/// `recent_versions` must be newest first. Rules, in order: fewer than W
/// versions is never a plateau; W scores all at or above the evolution
/// threshold means the lineage has converged; otherwise an absolute average
/// successive improvement below the stagnation threshold means it has stalled.
pub fn check(recent_versions: &[AgentVersion], config: &EvolutionConfig) -> PlateauStatus {
    let window = config.plateau_window;
    let scores: Vec<f64> = recent_versions
        .iter()
        .take(window)
        .map(|v| v.fitness_score)
        .collect();

    if scores.len() < window {
        return PlateauStatus {
            is_plateau: false,
            reason: "insufficient history".to_string(),
            recent_scores: scores,
            avg_improvement: None,
        };
    }

    if scores.iter().all(|&s| s >= config.failure_threshold) {
        return PlateauStatus {
            is_plateau: true,
            reason: "converged".to_string(),
            recent_scores: scores,
            avg_improvement: None,
        };
    }

    // Successive newer-minus-older deltas across the window.
    let deltas: Vec<f64> = scores.windows(2).map(|pair| pair[0] - pair[1]).collect();
    let avg_improvement = deltas.iter().sum::<f64>() / deltas.len() as f64;

    if avg_improvement.abs() < config.plateau_min_improvement {
        PlateauStatus {
            is_plateau: true,
            reason: "stagnated".to_string(),
            recent_scores: scores,
            avg_improvement: Some(avg_improvement),
        }
    } else {
        PlateauStatus {
            is_plateau: false,
            reason: "improving".to_string(),
            recent_scores: scores,
            avg_improvement: Some(avg_improvement),
        }
    }
}
