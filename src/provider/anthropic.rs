//! Anthropic messages backend.
//!
//! The system prompt rides in a top-level `system` field rather than the
//! message array, and usage comes back as separate input/output token
//! counts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{
    error_from_response, error_from_transport, Completion, CompletionBackend, CompletionRequest,
};
use crate::error::{ProviderCallError, ProviderErrorKind};

/// Public Anthropic API root.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header Anthropic requires on every call.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicBackend {
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

#[derive(Debug, Serialize)]
struct MessagesBody {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<Completion, ProviderCallError> {
        let started = Instant::now();
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let mut messages = Vec::with_capacity(req.context.len() + 1);
        for turn in req.context {
            messages.push(Message {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: req.prompt.to_string(),
        });

        let body = MessagesBody {
            model: req.model.to_string(),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            system: req.system_prompt.map(str::to_string),
            messages,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| error_from_transport("anthropic", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("anthropic", response).await);
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            ProviderCallError::new(
                ProviderErrorKind::Unknown,
                format!("anthropic response parse failed: {e}"),
            )
        })?;

        let text = parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| {
                ProviderCallError::new(
                    ProviderErrorKind::Unknown,
                    "anthropic response carried no content blocks",
                )
            })?;

        Ok(Completion {
            text,
            tokens_used: parsed.usage.input_tokens + parsed.usage.output_tokens,
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest<'static> {
        CompletionRequest {
            prompt: "List the symptoms",
            system_prompt: Some("You are a medical AI assistant."),
            context: &[],
            model: "claude-sonnet-4-20250514",
            max_tokens: 256,
            temperature: 0.5,
        }
    }

    #[tokio::test]
    async fn system_prompt_is_a_top_level_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "anthropic-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-sonnet-4-20250514",
                "system": "You are a medical AI assistant.",
                "messages": [{"role": "user", "content": "List the symptoms"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Fever, cough."}],
                "usage": {"input_tokens": 25, "output_tokens": 8}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            reqwest::Client::new(),
            "anthropic-key".into(),
            Some(server.uri()),
        );
        let completion = backend.complete(request()).await.unwrap();

        assert_eq!(completion.text, "Fever, cough.");
        assert_eq!(completion.prompt_tokens, 25);
        assert_eq!(completion.completion_tokens, 8);
        assert_eq!(completion.tokens_used, 33);
    }

    #[tokio::test]
    async fn forbidden_maps_to_auth_kind() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            reqwest::Client::new(),
            "anthropic-key".into(),
            Some(server.uri()),
        );
        let err = backend.complete(request()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Auth);
    }

    #[tokio::test]
    async fn missing_content_blocks_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [],
                "usage": {"input_tokens": 1, "output_tokens": 0}
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            reqwest::Client::new(),
            "anthropic-key".into(),
            Some(server.uri()),
        );
        let err = backend.complete(request()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Unknown);
    }
}
