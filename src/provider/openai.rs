//! OpenAI chat completions backend.
//!
//! Also hosts the shared chat-completions envelope that the Azure backend
//! reuses: the two differ only in endpoint shape and auth header.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{
    error_from_response, error_from_transport, Completion, CompletionBackend, CompletionRequest,
};
use crate::error::{ProviderCallError, ProviderErrorKind};

/// Public OpenAI API root.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions over the public API or a compatible endpoint.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, api_key: String, base_url: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

// ── Shared chat-completions envelope (OpenAI + Azure) ───────────────

#[derive(Debug, Serialize)]
pub(super) struct ChatCompletionBody {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
pub(super) struct WireMessage {
    role: String,
    content: String,
}

/// Assemble the message array: optional system turn, prior context, then the
/// current user prompt.
pub(super) fn chat_body(req: &CompletionRequest<'_>) -> ChatCompletionBody {
    let mut messages = Vec::with_capacity(req.context.len() + 2);
    if let Some(system) = req.system_prompt {
        messages.push(WireMessage {
            role: "system".to_string(),
            content: system.to_string(),
        });
    }
    for turn in req.context {
        messages.push(WireMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        });
    }
    messages.push(WireMessage {
        role: "user".to_string(),
        content: req.prompt.to_string(),
    });

    ChatCompletionBody {
        model: req.model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChatUsage {
    #[serde(default)]
    total_tokens: i64,
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

/// Extract the normalized completion from a parsed chat-completions body.
pub(super) fn completion_from(
    provider: &str,
    parsed: ChatCompletionResponse,
    latency_ms: i64,
) -> Result<Completion, ProviderCallError> {
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| {
            ProviderCallError::new(
                ProviderErrorKind::Unknown,
                format!("{provider} response carried no choices"),
            )
        })?;

    let usage = parsed.usage.unwrap_or_default();
    Ok(Completion {
        text,
        tokens_used: usage.total_tokens,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        latency_ms,
    })
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<Completion, ProviderCallError> {
        let started = Instant::now();
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&chat_body(&req))
            .send()
            .await
            .map_err(|e| error_from_transport("openai", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("openai", response).await);
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            ProviderCallError::new(
                ProviderErrorKind::Unknown,
                format!("openai response parse failed: {e}"),
            )
        })?;

        completion_from("openai", parsed, started.elapsed().as_millis() as i64)
    }
}
