//! Provider adapters: one capability surface over four AI completion APIs.
//!
//! Each backend differs in request envelope, auth header scheme, and the
//! field names carrying token usage; `CompletionBackend` hides all of that.
//! One attempt per logical request; retry policy belongs to the caller.

pub mod anthropic;
pub mod azure;
pub mod google;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use azure::AzureOpenAiBackend;
pub use google::GoogleBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::AiProvider;
use crate::error::{AiError, ProviderCallError, ProviderErrorKind};

/// Prompt used by `test_connection`; small enough to cost a handful of
/// tokens on any provider.
const TEST_PROMPT: &str = "Hello, this is a connection test. Please respond with 'OK'.";

/// Completion budget for connection tests.
const TEST_MAX_TOKENS: u32 = 10;

/// Longest provider error body kept in normalized messages.
const MAX_ERROR_BODY: usize = 300;

/// One prior turn of a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    /// Role label in OpenAI-style message arrays.
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub system_prompt: Option<&'a str>,
    /// Prior conversation turns, oldest first.
    pub context: &'a [ChatTurn],
    pub model: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A normalized completion result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Total billed tokens as reported (or estimated) by the provider.
    pub tokens_used: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub latency_ms: i64,
}

/// Result of a minimal real round trip against the configured provider.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub latency_ms: i64,
    pub error: Option<String>,
}

/// Uniform interface over the four supported completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Perform one completion call. A single attempt; failures are
    /// normalized into `ProviderCallError`.
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<Completion, ProviderCallError>;

    /// Perform a minimal real round trip (not a mock) to verify credentials
    /// and reachability.
    async fn test_connection(&self, model: &str) -> ConnectionTest {
        let started = Instant::now();
        let req = CompletionRequest {
            prompt: TEST_PROMPT,
            system_prompt: None,
            context: &[],
            model,
            max_tokens: TEST_MAX_TOKENS,
            temperature: 0.0,
        };
        match self.complete(req).await {
            Ok(completion) => ConnectionTest {
                success: true,
                latency_ms: completion.latency_ms,
                error: None,
            },
            Err(e) => ConnectionTest {
                success: false,
                latency_ms: started.elapsed().as_millis() as i64,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Build the backend for a clinic's configured provider.
///
/// Azure is the only variant with a mandatory base URL; the others fall back
/// to their public endpoints when none is stored.
pub fn backend_for(
    provider: AiProvider,
    client: reqwest::Client,
    api_key: String,
    base_url: Option<String>,
) -> Result<Box<dyn CompletionBackend>, AiError> {
    match provider {
        AiProvider::OpenAi => Ok(Box::new(OpenAiBackend::new(client, api_key, base_url))),
        AiProvider::Azure => {
            let base_url = base_url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
                AiError::Configuration("base_url is required for Azure OpenAI".into())
            })?;
            Ok(Box::new(AzureOpenAiBackend::new(client, api_key, base_url)))
        }
        AiProvider::Anthropic => Ok(Box::new(AnthropicBackend::new(client, api_key, base_url))),
        AiProvider::Google => Ok(Box::new(GoogleBackend::new(client, api_key, base_url))),
    }
}

/// Normalize a non-success HTTP response into a `ProviderCallError`.
pub(crate) async fn error_from_response(
    provider: &str,
    response: reqwest::Response,
) -> ProviderCallError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unreadable error body".to_string());
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();

    let kind = match status.as_u16() {
        401 | 403 => ProviderErrorKind::Auth,
        429 => ProviderErrorKind::RateLimit,
        404 => ProviderErrorKind::InvalidModel,
        400 if body.contains("model") => ProviderErrorKind::InvalidModel,
        _ => ProviderErrorKind::Unknown,
    };

    ProviderCallError::new(kind, format!("{provider} returned {status}: {body}"))
}

/// Normalize a transport-level failure into a `ProviderCallError`.
pub(crate) fn error_from_transport(provider: &str, err: reqwest::Error) -> ProviderCallError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Unknown
    };
    ProviderCallError::new(kind, format!("{provider} request failed: {err}"))
}

/// Rough token estimate for providers that omit usage metadata:
/// one token per four characters, the convention the platform has always
/// used for Gemini responses.
pub(crate) fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() / 4) as i64
}
