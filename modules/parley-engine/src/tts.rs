//! Deepgram text-to-speech. Audio is garnish: any failure logs a warning and
//! the conversation continues without it.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::warn;
use uuid::Uuid;

const DEEPGRAM_SPEAK_URL: &str = "https://api.deepgram.com/v1/speak";
const DEFAULT_VOICE: &str = "aura-asteria-en";

#[derive(Clone)]
pub struct TtsClient {
    api_key: String,
    audio_dir: PathBuf,
    http: reqwest::Client,
}

impl TtsClient {
    pub fn new(api_key: impl Into<String>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: api_key.into(),
            audio_dir: audio_dir.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Synthesize `text` and return the saved mp3 path, or None on any
    /// failure.
    pub async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Option<String> {
        match self.try_synthesize(text, voice_id).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "TTS failed, continuing without audio");
                None
            }
        }
    }

    async fn try_synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<String> {
        let voice = voice_id.unwrap_or(DEFAULT_VOICE);

        let response = self
            .http
            .post(DEEPGRAM_SPEAK_URL)
            .header("Authorization", format!("Token {}", self.api_key))
            .query(&[("model", voice)])
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("TTS API error ({status}): {error_text}"));
        }

        let audio = response.bytes().await?;

        tokio::fs::create_dir_all(&self.audio_dir).await?;
        let path = self.audio_dir.join(format!("{}.mp3", Uuid::new_v4()));
        tokio::fs::write(&path, &audio).await?;

        Ok(path.to_string_lossy().into_owned())
    }
}
