use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use llm_client::{ChatClient, ChatResponder, Embedder};
use parley_api::routes;
use parley_common::AppConfig;
use parley_engine::{EngineDeps, EvolutionConfig, EvolutionOrchestrator, Simulator, TtsClient};
use parley_store::{PgStore, PgTranscriptIndex};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting parley-api");

    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;
    tracing::info!("Connected to database");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Migrations complete");

    let mut chat = ChatClient::from_env(config.llm_provider)?;
    if let Some(model) = &config.llm_model {
        chat = chat.with_model(model);
    }
    if let Some(model) = &config.embedding_model {
        chat = chat.with_embedding_model(model);
    }
    let chat = Arc::new(chat);
    let llm: Arc<dyn ChatResponder> = chat.clone();
    let embedder: Arc<dyn Embedder> = chat.clone();

    let store = Arc::new(PgStore::new(pool.clone()));
    let index = Arc::new(PgTranscriptIndex::new(pool.clone(), embedder));

    let tts = config
        .deepgram_api_key
        .as_ref()
        .map(|key| TtsClient::new(key, &config.audio_dir));
    if tts.is_none() {
        tracing::info!("DEEPGRAM_API_KEY not set; simulations run without audio");
    }

    let runner = Arc::new(Simulator::new(
        store.clone(),
        index.clone(),
        llm.clone(),
        tts,
    ));

    let orchestrator = Arc::new(EvolutionOrchestrator::new(EngineDeps {
        store,
        runner,
        index,
        llm,
        config: EvolutionConfig::default(),
    }));

    let app = routes::build_router(orchestrator);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
