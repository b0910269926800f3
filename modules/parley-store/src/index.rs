//! `TranscriptIndex` backed by pgvector.
//!
//! Transcripts are embedded on write; search embeds the query text and ranks
//! by cosine distance with optional score-range and persona filters.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use llm_client::Embedder;
use parley_common::{SearchFilter, SearchHit, TranscriptIndex, TranscriptMeta};

#[derive(Clone)]
pub struct PgTranscriptIndex {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
}

impl PgTranscriptIndex {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }
}

#[derive(sqlx::FromRow)]
struct HitRow {
    run_id: Uuid,
    distance: f64,
    document: String,
    persona_a: String,
    persona_b: String,
    scenario: String,
    overall_score: f64,
}

impl From<HitRow> for SearchHit {
    fn from(r: HitRow) -> Self {
        SearchHit {
            run_id: r.run_id,
            distance: r.distance,
            document: r.document,
            metadata: TranscriptMeta {
                persona_a: r.persona_a,
                persona_b: r.persona_b,
                scenario: r.scenario,
                overall_score: r.overall_score,
            },
        }
    }
}

#[async_trait]
impl TranscriptIndex for PgTranscriptIndex {
    async fn add(&self, run_id: Uuid, document: &str, metadata: &TranscriptMeta) -> Result<()> {
        let embedding = Vector::from(self.embedder.embed(document).await?);
        sqlx::query(
            r#"
            INSERT INTO transcript_embeddings
                (run_id, document, embedding, persona_a, persona_b, scenario, overall_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (run_id) DO UPDATE SET
                document = EXCLUDED.document,
                embedding = EXCLUDED.embedding,
                overall_score = EXCLUDED.overall_score
            "#,
        )
        .bind(run_id)
        .bind(document)
        .bind(&embedding)
        .bind(&metadata.persona_a)
        .bind(&metadata.persona_b)
        .bind(&metadata.scenario)
        .bind(metadata.overall_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        k: i64,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let embedding = Vector::from(self.embedder.embed(query).await?);

        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT run_id, document, persona_a, persona_b, scenario, overall_score, \
             (embedding <=> ",
        );
        qb.push_bind(&embedding);
        qb.push(") AS distance FROM transcript_embeddings WHERE TRUE");
        if let Some(min) = filter.min_score {
            qb.push(" AND overall_score >= ");
            qb.push_bind(min);
        }
        if let Some(max) = filter.max_score {
            qb.push(" AND overall_score < ");
            qb.push_bind(max);
        }
        if let Some(persona_a) = &filter.persona_a {
            qb.push(" AND persona_a = ");
            qb.push_bind(persona_a);
        }
        qb.push(" ORDER BY embedding <=> ");
        qb.push_bind(&embedding);
        qb.push(" LIMIT ");
        qb.push_bind(k);

        let rows: Vec<HitRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
