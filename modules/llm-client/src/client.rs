use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::traits::{ChatResponder, Embedder, Message};
use crate::types::*;

/// Supported OpenAI-compatible inference providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Groq,
    Cerebras,
    Nvidia,
}

impl Provider {
    pub fn base_url(&self) -> &'static str {
        match self {
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Cerebras => "https://api.cerebras.ai/v1",
            Provider::Nvidia => "https://integrate.api.nvidia.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::Cerebras => "llama-3.3-70b",
            Provider::Nvidia => "meta/llama-3.3-70b-instruct",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::Cerebras => "CEREBRAS_API_KEY",
            Provider::Nvidia => "NVIDIA_API_KEY",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "groq" => Ok(Provider::Groq),
            "cerebras" => Ok(Provider::Cerebras),
            "nvidia" => Ok(Provider::Nvidia),
            other => Err(anyhow!(
                "invalid LLM provider '{other}'; use 'groq', 'cerebras', or 'nvidia'"
            )),
        }
    }
}

/// Chat + embedding client for any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatClient {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, provider: Provider) -> Self {
        Self {
            api_key: api_key.into(),
            model: provider.default_model().to_string(),
            embedding_model: "baai/bge-m3".to_string(),
            base_url: provider.base_url().to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Build from environment. Fails with a configuration error when the
    /// provider's API key is not set.
    pub fn from_env(provider: Provider) -> Result<Self> {
        let api_key = std::env::var(provider.api_key_var())
            .map_err(|_| anyhow!("{} environment variable not set", provider.api_key_var()))?;
        Ok(Self::new(api_key, provider))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, messages = request.messages.len(), "chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("chat completion error ({}): {}", status, error_text));
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("empty chat completion response"))
    }
}

#[async_trait]
impl ChatResponder for ChatClient {
    async fn respond(
        &self,
        system_prompt: &str,
        history: &[Message],
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: system_prompt.to_string(),
        });
        for m in history {
            messages.push(WireMessage {
                role: m.role.as_wire_str(),
                content: m.content.clone(),
            });
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens,
            temperature: None,
        };

        self.chat(&request).await
    }
}

#[async_trait]
impl Embedder for ChatClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: text.to_string(),
        };

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("embedding error ({}): {}", status, error_text));
        }

        let embed_response: EmbeddingResponse = response.json().await?;

        embed_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("no embedding in response"))
    }
}
