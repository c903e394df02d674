use crate::{
    chat::PromptTurn,
    config::Config,
    error::{ChatError, Result},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

const TRUNCATION_MARKER: &str = "...";

/// Boundary to the hosted language model. One call per inbound message.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(
        &self,
        turns: &[PromptTurn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;
}

/// OpenAI-compatible `POST {base_url}/v1/chat/completions`.
pub struct OpenAiGateway {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGateway")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptTurn],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiGateway {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.openai_model.clone(),
        )
    }
}

#[async_trait]
impl CompletionGateway for OpenAiGateway {
    async fn complete(
        &self,
        turns: &[PromptTurn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ChatError::Config("OpenAI API key not configured".into()))?;

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = CompletionRequest {
            model: &self.model,
            messages: turns,
            max_tokens,
            temperature,
        };

        debug!(
            "Requesting completion: {} turns, max_tokens={}",
            turns.len(),
            max_tokens
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!("OpenAI API error {}: {}", status, text);
            return Err(ChatError::Upstream(format!("status {}", status.as_u16())));
        }

        let parsed: CompletionResponse = resp.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::Upstream("response missing choices[0].message.content".into()))
    }
}

/// Enforce a channel's reply cap. Over-long text keeps its first
/// `limit - 3` characters followed by `...`.
pub fn bound_reply(text: String, limit: Option<usize>) -> String {
    match limit {
        Some(limit) if text.chars().count() > limit => {
            let keep = limit.saturating_sub(TRUNCATION_MARKER.len());
            let mut bounded: String = text.chars().take(keep).collect();
            bounded.push_str(TRUNCATION_MARKER);
            bounded
        }
        _ => text,
    }
}
