use anyhow::Result;
use llm_client::Provider;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,

    // LLM provider
    pub llm_provider: Provider,
    pub llm_model: Option<String>,
    pub embedding_model: Option<String>,

    // TTS (optional; simulations run without audio when absent)
    pub deepgram_api_key: Option<String>,
    pub audio_dir: String,

    // HTTP surface
    pub api_host: String,
    pub api_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let provider = Provider::parse(
            &std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "nvidia".to_string()),
        )?;

        let config = Self {
            database_url: std::env::var("DATABASE_URL")?,
            llm_provider: provider,
            llm_model: std::env::var("LLM_MODEL").ok(),
            embedding_model: std::env::var("EMBEDDING_MODEL").ok(),
            deepgram_api_key: std::env::var("DEEPGRAM_API_KEY").ok(),
            audio_dir: std::env::var("AUDIO_DIR").unwrap_or_else(|_| "static/audio".to_string()),
            api_host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.len().min(5);
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  LLM_PROVIDER: {:?}", self.llm_provider);
        tracing::info!("  LLM_MODEL: {}", self.llm_model.as_deref().unwrap_or("<provider default>"));
        tracing::info!("  DEEPGRAM_API_KEY: {}", preview_opt(&self.deepgram_api_key));
        tracing::info!("  AUDIO_DIR: {}", self.audio_dir);
    }
}
