//! Collaborator seams consumed by the evolution core.
//!
//! All three traits are dyn-compatible so the orchestrator can be exercised
//! against in-memory doubles in tests.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::types::*;

/// Produces one executed conversation for a scenario.
///
/// When `agent_prompt` is Some it replaces persona A's stored system prompt
/// for this run only; the persona record itself is never written. This is the
/// seam candidate prompts are threaded through during evolution.
#[async_trait]
pub trait SimulationRunner: Send + Sync {
    async fn run(&self, scenario: &Scenario, agent_prompt: Option<&str>) -> Result<SimulationRun>;
}

/// Semantic similarity store over completed-conversation transcripts.
#[async_trait]
pub trait TranscriptIndex: Send + Sync {
    async fn add(&self, run_id: Uuid, document: &str, metadata: &TranscriptMeta) -> Result<()>;

    /// Ranked nearest-neighbor search, closest first.
    async fn search(&self, query: &str, k: i64, filter: &SearchFilter)
        -> Result<Vec<SearchHit>>;
}

/// Persistence for personas, runs, evaluations, and the version ledger.
#[async_trait]
pub trait EvolutionStore: Send + Sync {
    async fn persona(&self, id: Uuid) -> Result<Option<Persona>>;

    /// Fetch scenarios preserving the order of `ids`. Ids that do not exist
    /// are simply absent from the result; callers decide whether that is fatal.
    async fn scenarios_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Scenario>>;

    /// Rewrite a persona's live prompt. Reserved for the committed winner of
    /// an evolution cycle and for explicit version activation.
    async fn set_live_prompt(&self, persona_id: Uuid, prompt: &str) -> Result<()>;

    async fn create_run(&self, scenario_id: Uuid) -> Result<SimulationRun>;
    async fn complete_run(
        &self,
        run_id: Uuid,
        transcript: &[Turn],
        duration_seconds: f64,
    ) -> Result<()>;
    async fn fail_run(&self, run_id: Uuid) -> Result<()>;

    async fn save_evaluation(&self, run_id: Uuid, verdict: &Verdict) -> Result<Evaluation>;
    async fn evaluation_for_run(&self, run_id: Uuid) -> Result<Option<Evaluation>>;

    async fn latest_version(&self, persona_id: Uuid) -> Result<Option<AgentVersion>>;

    /// Most recent versions, newest first.
    async fn recent_versions(&self, persona_id: Uuid, limit: i64) -> Result<Vec<AgentVersion>>;

    async fn version(&self, id: Uuid) -> Result<Option<AgentVersion>>;

    async fn versions_with_attempts(&self, persona_id: Uuid)
        -> Result<Vec<VersionWithAttempts>>;

    /// Persist a new version plus its mutation attempts atomically. Fails with
    /// an invariant error when `new.version` is not exactly one past the
    /// persona's latest committed version.
    async fn commit_version(
        &self,
        new: NewAgentVersion,
        attempts: Vec<NewMutationAttempt>,
    ) -> Result<AgentVersion>;
}
