//! Google Gemini backend.
//!
//! `generateContent` has no system role in the v1beta surface this platform
//! targets, so the system prompt is prepended to the user prompt. Usage
//! metadata is optional in responses; when absent, tokens are estimated at
//! one per four characters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{
    error_from_response, error_from_transport, estimate_tokens, ChatRole, Completion,
    CompletionBackend, CompletionRequest,
};
use crate::error::{ProviderCallError, ProviderErrorKind};

/// Public Generative Language API root.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini `generateContent`.
pub struct GoogleBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleBackend {
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
struct GenerateContentBody {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: i64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: i64,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: i64,
}

#[async_trait]
impl CompletionBackend for GoogleBackend {
    async fn complete(&self, req: CompletionRequest<'_>) -> Result<Completion, ProviderCallError> {
        let started = Instant::now();
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            req.model
        );

        let full_prompt = match req.system_prompt {
            Some(system) => format!("{system}\n\n{}", req.prompt),
            None => req.prompt.to_string(),
        };

        let mut contents = Vec::with_capacity(req.context.len() + 1);
        for turn in req.context {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            contents.push(Content {
                role: role.to_string(),
                parts: vec![Part {
                    text: turn.content.clone(),
                }],
            });
        }
        contents.push(Content {
            role: "user".to_string(),
            parts: vec![Part {
                text: full_prompt.clone(),
            }],
        });

        let body = GenerateContentBody {
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: req.max_tokens,
                temperature: req.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| error_from_transport("google", e))?;

        if !response.status().is_success() {
            return Err(error_from_response("google", response).await);
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderCallError::new(
                ProviderErrorKind::Unknown,
                format!("google response parse failed: {e}"),
            )
        })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| {
                ProviderCallError::new(
                    ProviderErrorKind::Unknown,
                    "google response carried no candidates",
                )
            })?;

        let (tokens_used, prompt_tokens, completion_tokens) = match parsed.usage_metadata {
            Some(usage) => {
                let total = if usage.total_token_count > 0 {
                    usage.total_token_count
                } else {
                    usage.prompt_token_count + usage.candidates_token_count
                };
                (total, usage.prompt_token_count, usage.candidates_token_count)
            }
            None => {
                let prompt_tokens = estimate_tokens(&full_prompt);
                let completion_tokens = estimate_tokens(&text);
                (prompt_tokens + completion_tokens, prompt_tokens, completion_tokens)
            }
        };

        Ok(Completion {
            text,
            tokens_used,
            prompt_tokens,
            completion_tokens,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }
}
