//! HTTP surface over the evolution orchestrator.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use parley_common::EvolveError;
use parley_engine::EvolutionOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<EvolutionOrchestrator>,
}

pub fn build_router(orchestrator: Arc<EvolutionOrchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/evolve/{persona_id}", post(evolve))
        .route("/api/evolve/versions/{persona_id}", get(versions))
        .route("/api/evolve/versions/{version_id}/activate", post(activate))
        .route("/api/evolve/plateau/{persona_id}", get(plateau))
        .route("/healthz", get(health))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// `EvolveError` mapped onto the HTTP status space.
struct ApiError(EvolveError);

impl From<EvolveError> for ApiError {
    fn from(e: EvolveError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EvolveError::InvalidScenarioIds(_) => StatusCode::BAD_REQUEST,
            EvolveError::PersonaNotFound(_)
            | EvolveError::ScenarioNotFound(_)
            | EvolveError::VersionNotFound(_) => StatusCode::NOT_FOUND,
            EvolveError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EvolveError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::warn!(error = %self.0, "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct EvolveQuery {
    scenario_ids: Option<String>,
}

fn parse_scenario_ids(raw: Option<&str>) -> Result<Vec<Uuid>, EvolveError> {
    let raw = raw
        .ok_or_else(|| EvolveError::InvalidScenarioIds("scenario_ids is required".to_string()))?;
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s)
                .map_err(|_| EvolveError::InvalidScenarioIds(format!("not a uuid: '{s}'")))
        })
        .collect()
}

async fn evolve(
    State(state): State<AppState>,
    Path(persona_id): Path<Uuid>,
    Query(query): Query<EvolveQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let scenario_ids = parse_scenario_ids(query.scenario_ids.as_deref())?;
    let report = state
        .orchestrator
        .run_cycle(persona_id, &scenario_ids)
        .await?;
    Ok(Json(report))
}

async fn versions(
    State(state): State<AppState>,
    Path(persona_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.orchestrator.version_history(persona_id).await?;
    Ok(Json(history))
}

async fn activate(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.orchestrator.activate_version(version_id).await?;
    Ok(Json(report))
}

async fn plateau(
    State(state): State<AppState>,
    Path(persona_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.orchestrator.plateau_status(persona_id).await?;
    Ok(Json(status))
}

async fn health() -> &'static str {
    "ok"
}
