//! `EvolutionStore` backed by Postgres.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use parley_common::{
    AgentVersion, Evaluation, EvolutionStore, EvolveError, MetricScores, MutationAttempt,
    NewAgentVersion, NewMutationAttempt, Persona, RunStatus, Scenario, SimulationRun, Turn,
    Verdict, VersionWithAttempts,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row mirrors
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct PersonaRow {
    id: Uuid,
    name: String,
    personality: Option<String>,
    mood: Option<String>,
    voice_id: Option<String>,
    system_prompt: String,
    created_at: DateTime<Utc>,
}

impl From<PersonaRow> for Persona {
    fn from(r: PersonaRow) -> Self {
        Persona {
            id: r.id,
            name: r.name,
            personality: r.personality,
            mood: r.mood,
            voice_id: r.voice_id,
            system_prompt: r.system_prompt,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ScenarioRow {
    id: Uuid,
    name: String,
    context: String,
    goal: Option<String>,
    persona_a_id: Uuid,
    persona_b_id: Uuid,
    max_turns: i32,
    created_at: DateTime<Utc>,
}

impl From<ScenarioRow> for Scenario {
    fn from(r: ScenarioRow) -> Self {
        Scenario {
            id: r.id,
            name: r.name,
            context: r.context,
            goal: r.goal,
            persona_a_id: r.persona_a_id,
            persona_b_id: r.persona_b_id,
            max_turns: r.max_turns,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    scenario_id: Uuid,
    transcript: serde_json::Value,
    status: String,
    duration_seconds: Option<f64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for SimulationRun {
    type Error = anyhow::Error;

    fn try_from(r: RunRow) -> Result<Self> {
        let status = RunStatus::parse(&r.status)
            .ok_or_else(|| anyhow!("unknown run status '{}' for run {}", r.status, r.id))?;
        Ok(SimulationRun {
            id: r.id,
            scenario_id: r.scenario_id,
            transcript: serde_json::from_value::<Vec<Turn>>(r.transcript)?,
            status,
            duration_seconds: r.duration_seconds,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EvaluationRow {
    id: Uuid,
    run_id: Uuid,
    scores: serde_json::Value,
    overall_score: f64,
    feedback: String,
    structured_issues: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EvaluationRow> for Evaluation {
    type Error = anyhow::Error;

    fn try_from(r: EvaluationRow) -> Result<Self> {
        Ok(Evaluation {
            id: r.id,
            run_id: r.run_id,
            scores: serde_json::from_value::<MetricScores>(r.scores)?,
            overall_score: r.overall_score,
            feedback: r.feedback,
            structured_issues: serde_json::from_value(r.structured_issues)?,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: Uuid,
    persona_id: Uuid,
    version: i32,
    system_prompt: String,
    fitness_score: f64,
    baseline_score: f64,
    parent_version_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<VersionRow> for AgentVersion {
    fn from(r: VersionRow) -> Self {
        AgentVersion {
            id: r.id,
            persona_id: r.persona_id,
            version: r.version,
            system_prompt: r.system_prompt,
            fitness_score: r.fitness_score,
            baseline_score: r.baseline_score,
            parent_version_id: r.parent_version_id,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    version_id: Uuid,
    mutation_index: i32,
    mutated_prompt: String,
    avg_score: f64,
    is_winner: bool,
    mutation_metadata: serde_json::Value,
    reasoning_prompt: String,
    created_at: DateTime<Utc>,
}

impl From<AttemptRow> for MutationAttempt {
    fn from(r: AttemptRow) -> Self {
        MutationAttempt {
            id: r.id,
            version_id: r.version_id,
            mutation_index: r.mutation_index,
            mutated_prompt: r.mutated_prompt,
            avg_score: r.avg_score,
            is_winner: r.is_winner,
            mutation_metadata: r.mutation_metadata,
            reasoning_prompt: r.reasoning_prompt,
            created_at: r.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait]
impl EvolutionStore for PgStore {
    async fn persona(&self, id: Uuid) -> Result<Option<Persona>> {
        let row = sqlx::query_as::<_, PersonaRow>("SELECT * FROM personas WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn scenarios_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Scenario>> {
        let rows = sqlx::query_as::<_, ScenarioRow>("SELECT * FROM scenarios WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        let fetched: Vec<Scenario> = rows.into_iter().map(Into::into).collect();
        // ANY() loses caller order; restore it
        Ok(ids
            .iter()
            .filter_map(|id| fetched.iter().find(|s| s.id == *id).cloned())
            .collect())
    }

    async fn set_live_prompt(&self, persona_id: Uuid, prompt: &str) -> Result<()> {
        let result = sqlx::query("UPDATE personas SET system_prompt = $2 WHERE id = $1")
            .bind(persona_id)
            .bind(prompt)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("persona {persona_id} not found"));
        }
        Ok(())
    }

    async fn create_run(&self, scenario_id: Uuid) -> Result<SimulationRun> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO simulation_runs (scenario_id, transcript, status)
            VALUES ($1, '[]'::jsonb, 'running')
            RETURNING *
            "#,
        )
        .bind(scenario_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        transcript: &[Turn],
        duration_seconds: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE simulation_runs
            SET transcript = $2, status = 'completed', duration_seconds = $3
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(serde_json::to_value(transcript)?)
        .bind(duration_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE simulation_runs SET status = 'failed' WHERE id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_evaluation(&self, run_id: Uuid, verdict: &Verdict) -> Result<Evaluation> {
        let row = sqlx::query_as::<_, EvaluationRow>(
            r#"
            INSERT INTO evaluations (run_id, scores, overall_score, feedback, structured_issues)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id) DO UPDATE SET
                scores = EXCLUDED.scores,
                overall_score = EXCLUDED.overall_score,
                feedback = EXCLUDED.feedback,
                structured_issues = EXCLUDED.structured_issues
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(serde_json::to_value(&verdict.scores)?)
        .bind(verdict.overall())
        .bind(&verdict.feedback)
        .bind(serde_json::to_value(&verdict.structured_issues)?)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn evaluation_for_run(&self, run_id: Uuid) -> Result<Option<Evaluation>> {
        let row =
            sqlx::query_as::<_, EvaluationRow>("SELECT * FROM evaluations WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn latest_version(&self, persona_id: Uuid) -> Result<Option<AgentVersion>> {
        let row = sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM agent_versions WHERE persona_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(persona_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn recent_versions(&self, persona_id: Uuid, limit: i64) -> Result<Vec<AgentVersion>> {
        let rows = sqlx::query_as::<_, VersionRow>(
            "SELECT * FROM agent_versions WHERE persona_id = $1 ORDER BY version DESC LIMIT $2",
        )
        .bind(persona_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn version(&self, id: Uuid) -> Result<Option<AgentVersion>> {
        let row = sqlx::query_as::<_, VersionRow>("SELECT * FROM agent_versions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn versions_with_attempts(&self, persona_id: Uuid) -> Result<Vec<VersionWithAttempts>> {
        let versions = self.recent_versions(persona_id, i64::MAX).await?;
        let attempt_rows = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT a.* FROM mutation_attempts a
            JOIN agent_versions v ON v.id = a.version_id
            WHERE v.persona_id = $1
            ORDER BY a.mutation_index
            "#,
        )
        .bind(persona_id)
        .fetch_all(&self.pool)
        .await?;
        let attempts: Vec<MutationAttempt> = attempt_rows.into_iter().map(Into::into).collect();

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
        let mut tx = self.pool.begin().await?;

        // Lock the lineage head so concurrent cycles cannot race the sequence.
        let latest: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT version FROM agent_versions
            WHERE persona_id = $1
            ORDER BY version DESC LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(new.persona_id)
        .fetch_optional(&mut *tx)
        .await?;
        let expected = latest.map(|(v,)| v + 1).unwrap_or(1);
        if new.version != expected {
            return Err(EvolveError::Invariant(format!(
                "version {} committed out of sequence for persona {} (expected {expected})",
                new.version, new.persona_id
            ))
            .into());
        }

        let version_row = sqlx::query_as::<_, VersionRow>(
            r#"
            INSERT INTO agent_versions
                (persona_id, version, system_prompt, fitness_score, baseline_score, parent_version_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(new.persona_id)
        .bind(new.version)
        .bind(&new.system_prompt)
        .bind(new.fitness_score)
        .bind(new.baseline_score)
        .bind(new.parent_version_id)
        .fetch_one(&mut *tx)
        .await?;

        for attempt in &attempts {
            sqlx::query(
                r#"
                INSERT INTO mutation_attempts
                    (version_id, mutation_index, mutated_prompt, avg_score, is_winner,
                     mutation_metadata, reasoning_prompt)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(version_row.id)
            .bind(attempt.mutation_index)
            .bind(&attempt.mutated_prompt)
            .bind(attempt.avg_score)
            .bind(attempt.is_winner)
            .bind(&attempt.mutation_metadata)
            .bind(&attempt.reasoning_prompt)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            persona_id = %new.persona_id,
            version = new.version,
            attempts = attempts.len(),
            "committed agent version"
        );
        Ok(version_row.into())
    }
}
