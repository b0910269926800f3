//! Orchestrator tests over scripted in-memory collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use llm_client::{ChatResponder, Message};
use parley_common::{
    AgentVersion, Evaluation, EvolutionStore, EvolveError, MetricScores, MutationAttempt,
    NewAgentVersion, NewMutationAttempt, Persona, RunStatus, Scenario, SearchFilter, SearchHit,
    SimulationRun, SimulationRunner, TranscriptIndex, TranscriptMeta, Turn, Verdict,
    VersionWithAttempts,
};
use parley_engine::{EngineDeps, EvolutionConfig, EvolutionOrchestrator};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemStore {
    personas: Mutex<HashMap<Uuid, Persona>>,
    scenarios: Mutex<HashMap<Uuid, Scenario>>,
    evaluations: Mutex<HashMap<Uuid, Evaluation>>,
    versions: Mutex<Vec<AgentVersion>>,
    attempts: Mutex<Vec<MutationAttempt>>,
}

impl MemStore {
    fn insert_persona(&self, persona: Persona) {
        self.personas.lock().unwrap().insert(persona.id, persona);
    }

    fn insert_scenario(&self, scenario: Scenario) {
        self.scenarios.lock().unwrap().insert(scenario.id, scenario);
    }

    fn seed_version(&self, persona_id: Uuid, version: i32, fitness_score: f64) -> Uuid {
        let id = Uuid::new_v4();
        self.versions.lock().unwrap().push(AgentVersion {
            id,
            persona_id,
            version,
            system_prompt: format!("seed v{version}"),
            fitness_score,
            baseline_score: fitness_score - 0.5,
            parent_version_id: None,
            created_at: Utc::now(),
        });
        id
    }

    fn live_prompt(&self, persona_id: Uuid) -> String {
        self.personas.lock().unwrap()[&persona_id].system_prompt.clone()
    }
}

#[async_trait]
impl EvolutionStore for MemStore {
    async fn persona(&self, id: Uuid) -> Result<Option<Persona>> {
        Ok(self.personas.lock().unwrap().get(&id).cloned())
    }

    async fn scenarios_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Scenario>> {
        let scenarios = self.scenarios.lock().unwrap();
        Ok(ids.iter().filter_map(|id| scenarios.get(id).cloned()).collect())
    }

    async fn set_live_prompt(&self, persona_id: Uuid, prompt: &str) -> Result<()> {
        let mut personas = self.personas.lock().unwrap();
        let persona = personas
            .get_mut(&persona_id)
            .ok_or_else(|| anyhow!("no persona"))?;
        persona.system_prompt = prompt.to_string();
        Ok(())
    }

    async fn create_run(&self, scenario_id: Uuid) -> Result<SimulationRun> {
        Ok(SimulationRun {
            id: Uuid::new_v4(),
            scenario_id,
            transcript: Vec::new(),
            status: RunStatus::Running,
            duration_seconds: None,
            created_at: Utc::now(),
        })
    }

    async fn complete_run(&self, _run_id: Uuid, _transcript: &[Turn], _duration: f64) -> Result<()> {
        Ok(())
    }

    async fn fail_run(&self, _run_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn save_evaluation(&self, run_id: Uuid, verdict: &Verdict) -> Result<Evaluation> {
        let evaluation = Evaluation {
            id: Uuid::new_v4(),
            run_id,
            scores: verdict.scores.clone(),
            overall_score: verdict.overall(),
            feedback: verdict.feedback.clone(),
            structured_issues: verdict.structured_issues.clone(),
            created_at: Utc::now(),
        };
        self.evaluations.lock().unwrap().insert(run_id, evaluation.clone());
        Ok(evaluation)
    }

    async fn evaluation_for_run(&self, run_id: Uuid) -> Result<Option<Evaluation>> {
        Ok(self.evaluations.lock().unwrap().get(&run_id).cloned())
    }

    async fn latest_version(&self, persona_id: Uuid) -> Result<Option<AgentVersion>> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.persona_id == persona_id)
            .max_by_key(|v| v.version)
            .cloned())
    }

    async fn recent_versions(&self, persona_id: Uuid, limit: i64) -> Result<Vec<AgentVersion>> {
        let mut versions: Vec<AgentVersion> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.persona_id == persona_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        versions.truncate(limit as usize);
        Ok(versions)
    }

    async fn version(&self, id: Uuid) -> Result<Option<AgentVersion>> {
        Ok(self.versions.lock().unwrap().iter().find(|v| v.id == id).cloned())
    }

    async fn versions_with_attempts(&self, persona_id: Uuid) -> Result<Vec<VersionWithAttempts>> {
        let versions = self.recent_versions(persona_id, i64::MAX).await?;
        let attempts = self.attempts.lock().unwrap();
        Ok(versions
            .into_iter()
            .map(|version| {
                let attempts = attempts
                    .iter()
                    .filter(|a| a.version_id == version.id)
                    .cloned()
                    .collect();
                VersionWithAttempts { version, attempts }
            })
            .collect())
    }

    async fn commit_version(
        &self,
        new: NewAgentVersion,
        attempts: Vec<NewMutationAttempt>,
    ) -> Result<AgentVersion> {
        let latest = self.latest_version(new.persona_id).await?;
        let expected = latest.map(|v| v.version + 1).unwrap_or(1);
        if new.version != expected {
            return Err(EvolveError::Invariant(format!(
                "version {} committed out of sequence (expected {expected})",
                new.version
            ))
            .into());
        }

        let version = AgentVersion {
            id: Uuid::new_v4(),
            persona_id: new.persona_id,
            version: new.version,
            system_prompt: new.system_prompt,
            fitness_score: new.fitness_score,
            baseline_score: new.baseline_score,
            parent_version_id: new.parent_version_id,
            created_at: Utc::now(),
        };
        self.versions.lock().unwrap().push(version.clone());
        let mut stored = self.attempts.lock().unwrap();
        for attempt in attempts {
            stored.push(MutationAttempt {
                id: Uuid::new_v4(),
                version_id: version.id,
                mutation_index: attempt.mutation_index,
                mutated_prompt: attempt.mutated_prompt,
                avg_score: attempt.avg_score,
                is_winner: attempt.is_winner,
                mutation_metadata: attempt.mutation_metadata,
                reasoning_prompt: attempt.reasoning_prompt,
                created_at: Utc::now(),
            });
        }
        Ok(version)
    }
}

// ---------------------------------------------------------------------------
// Scripted simulation runner
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum RunScript {
    /// Completed run whose evaluation lands at this overall score.
    Score(f64),
    /// Completed run but no evaluation ever materializes.
    NoEvaluation,
    /// The runner itself fails.
    Fail,
}

struct ScriptedRunner {
    store: Arc<MemStore>,
    script: Mutex<VecDeque<RunScript>>,
    /// The agent prompt passed to each run, in call order.
    prompts_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedRunner {
    fn new(store: Arc<MemStore>, script: Vec<RunScript>) -> Self {
        Self {
            store,
            script: Mutex::new(script.into()),
            prompts_seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Option<String>> {
        self.prompts_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimulationRunner for ScriptedRunner {
    async fn run(&self, scenario: &Scenario, agent_prompt: Option<&str>) -> Result<SimulationRun> {
        self.prompts_seen
            .lock()
            .unwrap()
            .push(agent_prompt.map(str::to_string));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("runner called more times than scripted");

        let run_id = Uuid::new_v4();
        match step {
            RunScript::Fail => Err(anyhow!("scripted simulation failure")),
            RunScript::NoEvaluation => Ok(completed_run(run_id, scenario.id)),
            RunScript::Score(score) => {
                let mut scores = MetricScores::default();
                for key in parley_common::METRIC_KEYS {
                    scores.set(key, score);
                }
                let verdict = Verdict {
                    scores,
                    feedback: format!("scripted at {score}"),
                    structured_issues: Default::default(),
                };
                self.store.save_evaluation(run_id, &verdict).await?;
                Ok(completed_run(run_id, scenario.id))
            }
        }
    }
}

fn completed_run(id: Uuid, scenario_id: Uuid) -> SimulationRun {
    SimulationRun {
        id,
        scenario_id,
        transcript: Vec::new(),
        status: RunStatus::Completed,
        duration_seconds: Some(1.0),
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Empty index + counting responder
// ---------------------------------------------------------------------------

struct EmptyIndex;

#[async_trait]
impl TranscriptIndex for EmptyIndex {
    async fn add(&self, _run_id: Uuid, _document: &str, _meta: &TranscriptMeta) -> Result<()> {
        Ok(())
    }

    async fn search(&self, _q: &str, _k: i64, _f: &SearchFilter) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }
}

/// Returns a fresh non-JSON response per call, so pattern extraction falls
/// back to its empty report and each synthesized candidate prompt is unique.
#[derive(Default)]
struct CountingLlm {
    calls: Mutex<u32>,
}

#[async_trait]
impl ChatResponder for CountingLlm {
    async fn respond(&self, _s: &str, _h: &[Message], _m: Option<u32>) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        Ok(format!("generated text {}", *calls))
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    store: Arc<MemStore>,
    runner: Arc<ScriptedRunner>,
    orchestrator: EvolutionOrchestrator,
    persona_id: Uuid,
    scenario_ids: Vec<Uuid>,
    original_prompt: String,
}

fn fixture(script: Vec<RunScript>, scenario_count: usize) -> Fixture {
    let store = Arc::new(MemStore::default());

    let persona_id = Uuid::new_v4();
    let counterpart_id = Uuid::new_v4();
    let original_prompt = "You are Marcus, a payment reminder agent.".to_string();
    store.insert_persona(Persona {
        id: persona_id,
        name: "Marcus".into(),
        personality: None,
        mood: None,
        voice_id: None,
        system_prompt: original_prompt.clone(),
        created_at: Utc::now(),
    });
    store.insert_persona(Persona {
        id: counterpart_id,
        name: "Priya".into(),
        personality: None,
        mood: Some("hostile".into()),
        voice_id: None,
        system_prompt: "You are Priya, an upset customer.".into(),
        created_at: Utc::now(),
    });

    let scenario_ids: Vec<Uuid> = (0..scenario_count)
        .map(|i| {
            let id = Uuid::new_v4();
            store.insert_scenario(Scenario {
                id,
                name: format!("scenario-{i}"),
                context: "call begins".into(),
                goal: Some("secure a payment plan".into()),
                persona_a_id: persona_id,
                persona_b_id: counterpart_id,
                max_turns: 10,
                created_at: Utc::now(),
            });
            id
        })
        .collect();

    let runner = Arc::new(ScriptedRunner::new(store.clone(), script));
    let deps = EngineDeps {
        store: store.clone(),
        runner: runner.clone(),
        index: Arc::new(EmptyIndex),
        llm: Arc::new(CountingLlm::default()),
        config: EvolutionConfig::default(),
    };

    Fixture {
        store,
        runner,
        orchestrator: EvolutionOrchestrator::new(deps),
        persona_id,
        scenario_ids,
        original_prompt,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_persona_is_rejected() {
    let f = fixture(vec![], 1);
    let err = f
        .orchestrator
        .run_cycle(Uuid::new_v4(), &f.scenario_ids)
        .await
        .unwrap_err();
    assert!(matches!(err, EvolveError::PersonaNotFound(_)));
    assert!(f.runner.calls().is_empty());
}

#[tokio::test]
async fn empty_scenario_list_is_rejected_before_any_run() {
    let f = fixture(vec![], 1);
    let err = f.orchestrator.run_cycle(f.persona_id, &[]).await.unwrap_err();
    assert!(matches!(err, EvolveError::InvalidScenarioIds(_)));
    assert!(f.runner.calls().is_empty());
}

#[tokio::test]
async fn unknown_scenario_is_rejected_before_any_run() {
    let f = fixture(vec![], 1);
    let missing = Uuid::new_v4();
    let mut ids = f.scenario_ids.clone();
    ids.push(missing);
    let err = f.orchestrator.run_cycle(f.persona_id, &ids).await.unwrap_err();
    assert!(matches!(err, EvolveError::ScenarioNotFound(id) if id == missing));
    assert!(f.runner.calls().is_empty());
}

#[tokio::test]
async fn above_threshold_baseline_stops_the_cycle() {
    let f = fixture(vec![RunScript::Score(9.0); 5], 3);
    let report = f
        .orchestrator
        .run_cycle(f.persona_id, &f.scenario_ids)
        .await
        .unwrap();

    assert!(!report.evolved);
    assert_eq!(report.reason, "above threshold");
    assert!((report.baseline_score - 9.0).abs() < 1e-9);
    // only the 5 baseline runs, all with the live prompt (no override)
    let calls = f.runner.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls.iter().all(Option::is_none));
    assert!(f.store.versions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn plateau_gate_skips_all_simulation() {
    let f = fixture(vec![], 1);
    f.store.seed_version(f.persona_id, 1, 9.0);
    f.store.seed_version(f.persona_id, 2, 8.8);
    f.store.seed_version(f.persona_id, 3, 9.2);

    let report = f
        .orchestrator
        .run_cycle(f.persona_id, &f.scenario_ids)
        .await
        .unwrap();

    assert!(!report.evolved);
    assert_eq!(report.reason, "plateau: converged");
    assert!(report.plateau.unwrap().is_plateau);
    assert!(f.runner.calls().is_empty());
}

#[tokio::test]
async fn winning_candidate_commits_a_new_version() {
    // 5 baseline at 6.0, then three candidate batches at 5.5 / 6.0 / 7.2
    let mut script = vec![RunScript::Score(6.0); 5];
    script.extend(vec![RunScript::Score(5.5); 5]);
    script.extend(vec![RunScript::Score(6.0); 5]);
    script.extend(vec![RunScript::Score(7.2); 5]);
    let f = fixture(script, 2);

    let report = f
        .orchestrator
        .run_cycle(f.persona_id, &f.scenario_ids)
        .await
        .unwrap();

    assert!(report.evolved);
    assert_eq!(report.new_version, Some(1));
    assert!((report.baseline_score - 6.0).abs() < 1e-9);
    assert!((report.new_score.unwrap() - 7.2).abs() < 1e-9);
    assert!((report.improvement.unwrap() - 1.2).abs() < 1e-9);

    let versions = f.store.versions.lock().unwrap().clone();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 1);
    assert!((versions[0].fitness_score - 7.2).abs() < 1e-9);
    assert!((versions[0].baseline_score - 6.0).abs() < 1e-9);
    assert!(versions[0].parent_version_id.is_none());

    // one attempt per candidate, exactly one winner, ordinals 0..3
    let attempts = f.store.attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts.iter().filter(|a| a.is_winner).count(), 1);
    let winner = attempts.iter().find(|a| a.is_winner).unwrap();
    assert_eq!(winner.mutation_index, 2);
    assert!((winner.avg_score - 7.2).abs() < 1e-9);
    assert!(!winner.reasoning_prompt.is_empty());

    // live prompt is now the winning candidate's text
    assert_eq!(f.store.live_prompt(f.persona_id), winner.mutated_prompt);

    // candidate prompts were threaded explicitly: baseline None, then each
    // batch of 5 carries its candidate's prompt
    let calls = f.runner.calls();
    assert_eq!(calls.len(), 20);
    assert!(calls[..5].iter().all(Option::is_none));
    for batch in 0..3 {
        let window = &calls[5 + batch * 5..10 + batch * 5];
        assert!(window.iter().all(|p| p.is_some()));
        assert!(window.windows(2).all(|pair| pair[0] == pair[1]));
    }
    // different candidates, different prompts
    assert_ne!(calls[5], calls[10]);
    assert_ne!(calls[10], calls[15]);
}

#[tokio::test]
async fn tie_with_baseline_does_not_commit() {
    let mut script = vec![RunScript::Score(6.0); 5];
    script.extend(vec![RunScript::Score(5.0); 5]);
    script.extend(vec![RunScript::Score(5.5); 5]);
    script.extend(vec![RunScript::Score(6.0); 5]); // best ties baseline
    let f = fixture(script, 1);

    let report = f
        .orchestrator
        .run_cycle(f.persona_id, &f.scenario_ids)
        .await
        .unwrap();

    assert!(!report.evolved);
    assert_eq!(report.reason, "no improvement");
    assert!((report.best_mutation_score.unwrap() - 6.0).abs() < 1e-9);
    assert!(f.store.versions.lock().unwrap().is_empty());
    // live prompt untouched after candidate testing
    assert_eq!(f.store.live_prompt(f.persona_id), f.original_prompt);
}

#[tokio::test]
async fn missing_evaluations_and_failed_runs_are_excluded_from_the_average() {
    let script = vec![
        RunScript::Score(9.0),
        RunScript::NoEvaluation,
        RunScript::Score(9.0),
        RunScript::Fail,
        RunScript::Score(9.0),
    ];
    let f = fixture(script, 2);

    let report = f
        .orchestrator
        .run_cycle(f.persona_id, &f.scenario_ids)
        .await
        .unwrap();

    // three usable data points, all 9.0 -> above threshold, cycle intact
    assert!(!report.evolved);
    assert_eq!(report.reason, "above threshold");
    assert!((report.baseline_score - 9.0).abs() < 1e-9);
    assert_eq!(report.baseline_scores.len(), 3);
}

#[tokio::test]
async fn committed_versions_form_a_gap_free_sequence() {
    let mut script = vec![RunScript::Score(6.0); 5];
    script.extend(vec![RunScript::Score(7.0); 15]);
    let f = fixture(script, 1);
    let seed_id = f.store.seed_version(f.persona_id, 1, 6.5);

    let report = f
        .orchestrator
        .run_cycle(f.persona_id, &f.scenario_ids)
        .await
        .unwrap();

    assert!(report.evolved);
    assert_eq!(report.new_version, Some(2));
    let versions = f.store.recent_versions(f.persona_id, 10).await.unwrap();
    assert_eq!(
        versions.iter().map(|v| v.version).collect::<Vec<_>>(),
        vec![2, 1]
    );
    assert_eq!(versions[0].parent_version_id, Some(seed_id));
}

#[tokio::test]
async fn plateau_status_is_queryable_without_running_a_cycle() {
    let f = fixture(vec![], 1);
    let status = f.orchestrator.plateau_status(f.persona_id).await.unwrap();
    assert!(!status.is_plateau);
    assert_eq!(status.reason, "insufficient history");
    assert!(f.runner.calls().is_empty());

    f.store.seed_version(f.persona_id, 1, 5.9);
    f.store.seed_version(f.persona_id, 2, 6.0);
    f.store.seed_version(f.persona_id, 3, 6.1);
    let status = f.orchestrator.plateau_status(f.persona_id).await.unwrap();
    assert!(status.is_plateau);
    assert_eq!(status.reason, "stagnated");
}

#[tokio::test]
async fn activate_rolls_the_live_prompt_back() {
    let f = fixture(vec![], 1);
    let version_id = f.store.seed_version(f.persona_id, 1, 7.0);

    let report = f.orchestrator.activate_version(version_id).await.unwrap();
    assert_eq!(report.activated_version, 1);
    assert_eq!(f.store.live_prompt(f.persona_id), "seed v1");

    let err = f
        .orchestrator
        .activate_version(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, EvolveError::VersionNotFound(_)));
}
