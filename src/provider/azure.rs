//! Azure OpenAI backend.
//!
//! Same chat-completions envelope as OpenAI; differs in the `api-key` auth
//! header, the mandatory deployment base URL, and the `api-version` query
//! parameter.

use async_trait::async_trait;
use std::time::Instant;

use super::openai::{chat_body, completion_from, ChatCompletionResponse};
use super::{
    error_from_response, error_from_transport, Completion, CompletionBackend, CompletionRequest,
};
use crate::error::{ProviderCallError, ProviderErrorKind};

/// Azure OpenAI REST API version pinned by the platform.
const API_VERSION: &str = "2024-02-15-preview";

/// Azure-hosted OpenAI deployment.
pub struct AzureOpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AzureOpenAiBackend {
    /// `base_url` points at the clinic's deployment root; `backend_for`
    /// guarantees it is present.
    pub fn new(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl CompletionBackend for AzureOpenAiBackend {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<Completion, ProviderCallError> {
        let started = Instant::now();
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .query(&[("api-version", API_VERSION)])
            .header("api-key", &self.api_key)
            .json(&chat_body(&req))
            .send()
            .await
            .map_err(|e| error_from_transport("azure", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("azure", response).await);
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            ProviderCallError::new(
                ProviderErrorKind::Unknown,
                format!("azure response parse failed: {e}"),
            )
        })?;

        completion_from("azure", parsed, started.elapsed().as_millis() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest<'static> {
        CompletionRequest {
            prompt: "ping",
            system_prompt: None,
            context: &[],
            model: "gpt-4o",
            max_tokens: 128,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn sends_api_key_header_and_api_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("api-key", "azure-key"))
            .and(query_param("api-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "pong"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            AzureOpenAiBackend::new(reqwest::Client::new(), "azure-key".into(), server.uri());
        let completion = backend.complete(request()).await.unwrap();
        assert_eq!(completion.text, "pong");
        assert_eq!(completion.tokens_used, 5);
    }

    #[tokio::test]
    async fn throttling_maps_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("throttled"))
            .mount(&server)
            .await;

        let backend =
            AzureOpenAiBackend::new(reqwest::Client::new(), "azure-key".into(), server.uri());
        let err = backend.complete(request()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::RateLimit);
    }
}
