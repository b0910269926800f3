//! The evolution cycle orchestrator.

use std::sync::Arc;

use llm_client::ChatResponder;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use parley_common::{
    Evaluation, EvolutionStore, EvolveError, EvolveResult, NewAgentVersion, NewMutationAttempt,
    Scenario, SimulationRunner, TranscriptIndex, VersionWithAttempts,
};

use crate::config::EvolutionConfig;
use crate::mutation::{Mutation, MutationGenerator};
use crate::plateau::{self, PlateauStatus};

/// Central dependency container for the evolution core.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn EvolutionStore>,
    pub runner: Arc<dyn SimulationRunner>,
    pub index: Arc<dyn TranscriptIndex>,
    pub llm: Arc<dyn ChatResponder>,
    pub config: EvolutionConfig,
}

/// Round-robin scenario assignment: run `i` is tested against
/// `scenarios[i mod len]`. Deterministic and order-preserving.
pub fn assign(i: usize, scenarios: &[Scenario]) -> &Scenario {
    &scenarios[i % scenarios.len()]
}

/// How one tested candidate fared.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub mutation_index: i32,
    pub avg_score: f64,
    pub scores: Vec<f64>,
    pub is_winner: bool,
}

/// Structured outcome of one evolution cycle. Always returned, even when
/// nothing changed; business-level non-events are not errors.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionReport {
    pub evolved: bool,
    pub reason: String,
    pub persona_id: Uuid,
    pub threshold: f64,
    pub baseline_score: f64,
    pub baseline_scores: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mutation_results: Vec<CandidateOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_mutation_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plateau: Option<PlateauStatus>,
}

impl EvolutionReport {
    fn not_evolved(persona_id: Uuid, reason: &str, threshold: f64) -> Self {
        Self {
            evolved: false,
            reason: reason.to_string(),
            persona_id,
            threshold,
            baseline_score: 0.0,
            baseline_scores: Vec::new(),
            mutation_results: Vec::new(),
            best_mutation_score: None,
            new_version: None,
            new_score: None,
            improvement: None,
            plateau: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub persona_id: Uuid,
    pub activated_version: i32,
    pub fitness_score: f64,
}

pub struct EvolutionOrchestrator {
    deps: EngineDeps,
    generator: MutationGenerator,
}

impl EvolutionOrchestrator {
    pub fn new(deps: EngineDeps) -> Self {
        let generator = MutationGenerator::new(deps.llm.clone(), deps.index.clone());
        Self { deps, generator }
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.deps.config
    }

    /// Plateau status for a persona, without running a cycle.
    pub async fn plateau_status(&self, persona_id: Uuid) -> EvolveResult<PlateauStatus> {
        self.deps
            .store
            .persona(persona_id)
            .await?
            .ok_or(EvolveError::PersonaNotFound(persona_id))?;

        let window = self.deps.config.plateau_window as i64;
        let recent = self.deps.store.recent_versions(persona_id, window).await?;
        Ok(plateau::check(&recent, &self.deps.config))
    }

    /// Version history, newest first, with nested mutation attempts.
    pub async fn version_history(
        &self,
        persona_id: Uuid,
    ) -> EvolveResult<Vec<VersionWithAttempts>> {
        self.deps
            .store
            .persona(persona_id)
            .await?
            .ok_or(EvolveError::PersonaNotFound(persona_id))?;

        Ok(self.deps.store.versions_with_attempts(persona_id).await?)
    }

    /// Roll a persona's live prompt back (or forward) to a historical version.
    pub async fn activate_version(&self, version_id: Uuid) -> EvolveResult<ActivationReport> {
        let version = self
            .deps
            .store
            .version(version_id)
            .await?
            .ok_or(EvolveError::VersionNotFound(version_id))?;

        self.deps
            .store
            .set_live_prompt(version.persona_id, &version.system_prompt)
            .await?;

        info!(persona_id = %version.persona_id, version = version.version, "activated version");

        Ok(ActivationReport {
            persona_id: version.persona_id,
            activated_version: version.version,
            fitness_score: version.fitness_score,
        })
    }

    /// Run one full evolution cycle for a persona against an ordered scenario
    /// set. Candidate prompts are threaded explicitly into each simulation;
    /// the persona's live prompt is written only when a winner commits.
    pub async fn run_cycle(
        &self,
        persona_id: Uuid,
        scenario_ids: &[Uuid],
    ) -> EvolveResult<EvolutionReport> {
        let config = &self.deps.config;

        let persona = self
            .deps
            .store
            .persona(persona_id)
            .await?
            .ok_or(EvolveError::PersonaNotFound(persona_id))?;

        if scenario_ids.is_empty() {
            return Err(EvolveError::InvalidScenarioIds("empty list".to_string()));
        }
        let scenarios = self.deps.store.scenarios_by_ids(scenario_ids).await?;
        if scenarios.len() != scenario_ids.len() {
            let missing = scenario_ids
                .iter()
                .find(|id| !scenarios.iter().any(|s| s.id == **id))
                .copied()
                .unwrap_or(scenario_ids[0]);
            return Err(EvolveError::ScenarioNotFound(missing));
        }

        info!(
            persona = %persona.name,
            scenarios = scenarios.len(),
            "starting evolution cycle"
        );

        // Plateau gate: skip the whole cycle when more evolution is wasteful.
        let recent = self
            .deps
            .store
            .recent_versions(persona_id, config.plateau_window as i64)
            .await?;
        let plateau = plateau::check(&recent, config);
        if plateau.is_plateau {
            info!(reason = %plateau.reason, "plateau detected, skipping cycle");
            let mut report = EvolutionReport::not_evolved(
                persona_id,
                &format!("plateau: {}", plateau.reason),
                config.failure_threshold,
            );
            report.plateau = Some(plateau);
            return Ok(report);
        }

        // Baseline: the persona's current prompt, round-robin over scenarios.
        let (baseline_scores, baseline_evals) = self
            .run_batch(&scenarios, config.baseline_runs, None)
            .await;
        let avg_baseline = mean(&baseline_scores);
        info!(avg_baseline, runs = baseline_scores.len(), "baseline measured");

        if avg_baseline >= config.failure_threshold {
            let mut report = EvolutionReport::not_evolved(
                persona_id,
                "above threshold",
                config.failure_threshold,
            );
            report.baseline_score = avg_baseline;
            report.baseline_scores = baseline_scores;
            return Ok(report);
        }

        // Mutate: K candidates. A single failed generation is skipped; all of
        // them failing means the mandatory step could not complete.
        let scenario_names: Vec<String> = scenarios.iter().map(|s| s.name.clone()).collect();
        let mut candidates: Vec<Mutation> = Vec::with_capacity(config.mutation_count);
        for i in 0..config.mutation_count {
            match self
                .generator
                .generate(
                    &persona.system_prompt,
                    &persona.name,
                    &baseline_evals,
                    &scenario_names,
                )
                .await
            {
                Ok(mutation) => candidates.push(mutation),
                Err(e) => warn!(candidate = i, error = %e, "mutation generation failed"),
            }
        }
        if candidates.is_empty() {
            return Err(EvolveError::Collaborator(anyhow::anyhow!(
                "all {} mutation generations failed",
                config.mutation_count
            )));
        }

        // Test each candidate with its prompt passed explicitly into every
        // run; the shared persona record stays untouched.
        let mut outcomes: Vec<(Mutation, Vec<f64>, f64)> = Vec::with_capacity(candidates.len());
        for (idx, candidate) in candidates.into_iter().enumerate() {
            let (scores, _) = self
                .run_batch(&scenarios, config.test_runs, Some(&candidate.mutated_prompt))
                .await;
            let avg = mean(&scores);
            info!(candidate = idx, avg, "candidate tested");
            outcomes.push((candidate, scores, avg));
        }

        // Select: highest average; earliest candidate wins exact ties.
        let winner_idx = outcomes
            .iter()
            .enumerate()
            .fold(0, |best, (i, (_, _, avg))| {
                if *avg > outcomes[best].2 {
                    i
                } else {
                    best
                }
            });
        let best_score = outcomes[winner_idx].2;

        let mutation_results: Vec<CandidateOutcome> = outcomes
            .iter()
            .enumerate()
            .map(|(i, (_, scores, avg))| CandidateOutcome {
                mutation_index: i as i32,
                avg_score: *avg,
                scores: scores.clone(),
                is_winner: i == winner_idx,
            })
            .collect();

        // Improvement gate: strictly greater than baseline; equality keeps
        // the original prompt.
        if best_score <= avg_baseline {
            info!(best_score, avg_baseline, "no improvement, keeping original prompt");
            let mut report = EvolutionReport::not_evolved(
                persona_id,
                "no improvement",
                config.failure_threshold,
            );
            report.baseline_score = avg_baseline;
            report.baseline_scores = baseline_scores;
            report.mutation_results = mutation_results;
            report.best_mutation_score = Some(best_score);
            return Ok(report);
        }

        // Commit: next version number, attempts for every candidate, live
        // prompt switched to the winner.
        let latest = self.deps.store.latest_version(persona_id).await?;
        let next_version = latest.as_ref().map(|v| v.version + 1).unwrap_or(1);

        let attempts: Vec<NewMutationAttempt> = outcomes
            .iter()
            .enumerate()
            .map(|(i, (mutation, _, avg))| NewMutationAttempt {
                mutation_index: i as i32,
                mutated_prompt: mutation.mutated_prompt.clone(),
                avg_score: *avg,
                is_winner: i == winner_idx,
                mutation_metadata: mutation.metadata.clone(),
                reasoning_prompt: mutation.reasoning_prompt.clone(),
            })
            .collect();

        let winning_prompt = outcomes[winner_idx].0.mutated_prompt.clone();
        let committed = self
            .deps
            .store
            .commit_version(
                NewAgentVersion {
                    persona_id,
                    version: next_version,
                    system_prompt: winning_prompt.clone(),
                    fitness_score: best_score,
                    baseline_score: avg_baseline,
                    parent_version_id: latest.map(|v| v.id),
                },
                attempts,
            )
            .await
            .map_err(|e| match e.downcast::<EvolveError>() {
                Ok(domain) => domain,
                Err(other) => EvolveError::Collaborator(other),
            })?;

        self.deps
            .store
            .set_live_prompt(persona_id, &winning_prompt)
            .await?;

        info!(
            version = committed.version,
            baseline = avg_baseline,
            fitness = best_score,
            "evolution committed"
        );

        Ok(EvolutionReport {
            evolved: true,
            reason: "evolved".to_string(),
            persona_id,
            threshold: config.failure_threshold,
            baseline_score: avg_baseline,
            baseline_scores,
            mutation_results,
            best_mutation_score: Some(best_score),
            new_version: Some(committed.version),
            new_score: Some(best_score),
            improvement: Some(best_score - avg_baseline),
            plateau: None,
        })
    }

    /// Run `n` simulations round-robin across `scenarios` and collect the
    /// evaluations that materialized. A failed run or a completed run with no
    /// evaluation is a missing data point, not an error.
    async fn run_batch(
        &self,
        scenarios: &[Scenario],
        n: usize,
        agent_prompt: Option<&str>,
    ) -> (Vec<f64>, Vec<Evaluation>) {
        let mut scores = Vec::with_capacity(n);
        let mut evaluations = Vec::with_capacity(n);

        for i in 0..n {
            let scenario = assign(i, scenarios);
            let run = match self.deps.runner.run(scenario, agent_prompt).await {
                Ok(run) => run,
                Err(e) => {
                    warn!(run = i, scenario = %scenario.name, error = %e, "simulation failed");
                    continue;
                }
            };
            match self.deps.store.evaluation_for_run(run.id).await {
                Ok(Some(evaluation)) => {
                    scores.push(evaluation.overall_score);
                    evaluations.push(evaluation);
                }
                Ok(None) => {
                    warn!(run_id = %run.id, "completed run has no evaluation, excluding");
                }
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "evaluation lookup failed, excluding");
                }
            }
        }

        (scores, evaluations)
    }
}

fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scenario(name: &str) -> Scenario {
        Scenario {
            id: Uuid::new_v4(),
            name: name.to_string(),
            context: String::new(),
            goal: None,
            persona_a_id: Uuid::new_v4(),
            persona_b_id: Uuid::new_v4(),
            max_turns: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn round_robin_cycles_by_index_modulo_len() {
        let scenarios = vec![scenario("s0"), scenario("s1"), scenario("s2")];
        for i in 0..7 {
            assert_eq!(assign(i, &scenarios).name, format!("s{}", i % 3));
        }
    }

    #[test]
    fn single_scenario_always_assigned() {
        let scenarios = vec![scenario("only")];
        for i in 0..5 {
            assert_eq!(assign(i, &scenarios).name, "only");
        }
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[5.5, 6.0, 7.2]) - 6.2333333).abs() < 1e-6);
    }
}
