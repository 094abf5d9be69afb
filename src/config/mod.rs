//! Per-clinic AI configuration.
//!
//! One `ClinicAiConfig` row per clinic: which provider to call, which model,
//! the encrypted API key, generation parameters, and per-feature toggles.
//! Usage counters live in the ledger, not here.

mod store;

pub use store::{AiConfigStore, ClinicAiConfigUpdate, ClinicAiConfigView};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AiError;

/// Default completion budget per request.
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Supported AI completion providers.
///
/// Closed set: adding a provider means adding a variant here plus one backend
/// module under `crate::provider`, not extending a conditional chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// OpenAI chat completions, optionally against a custom base URL.
    OpenAi,
    /// Azure-hosted OpenAI deployment; requires a base URL.
    Azure,
    /// Anthropic messages API.
    Anthropic,
    /// Google Gemini `generateContent`.
    Google,
}

impl AiProvider {
    /// Stable lowercase name, matching the stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }

    /// All supported providers, for validation messages.
    pub fn all() -> [AiProvider; 4] {
        [Self::OpenAi, Self::Azure, Self::Anthropic, Self::Google]
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiProvider {
    type Err = AiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "azure" => Ok(Self::Azure),
            "anthropic" => Ok(Self::Anthropic),
            "google" => Ok(Self::Google),
            other => Err(AiError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Feature toggle names used by the orchestrator's use cases.
pub mod features {
    pub const CLINICAL_ANALYSIS: &str = "clinical_analysis";
    pub const DIAGNOSIS_SUGGESTIONS: &str = "diagnosis_suggestions";
    pub const TREATMENT_SUGGESTIONS: &str = "treatment_suggestions";
    pub const CHAT: &str = "chat";
}

/// AI configuration for one clinic.
///
/// `api_key_encrypted` only ever holds vault ciphertext; plaintext keys exist
/// in memory for the duration of a provider call and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicAiConfig {
    pub clinic_id: String,
    pub enabled: bool,
    pub provider: AiProvider,
    pub api_key_encrypted: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-feature toggles. Absent entries count as enabled; only an explicit
    /// `false` disables a use case.
    pub features: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClinicAiConfig {
    /// Whether a named feature is enabled for this clinic.
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parse_roundtrip() {
        for provider in AiProvider::all() {
            let parsed: AiProvider = provider.as_str().parse().unwrap();
            assert_eq!(parsed, provider);
        }
    }

    #[test]
    fn provider_parse_is_case_insensitive() {
        let parsed: AiProvider = "Anthropic".parse().unwrap();
        assert_eq!(parsed, AiProvider::Anthropic);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = "cohere".parse::<AiProvider>().unwrap_err();
        assert!(matches!(err, AiError::UnsupportedProvider(name) if name == "cohere"));
    }

    #[test]
    fn absent_feature_counts_as_enabled() {
        let config = ClinicAiConfig {
            clinic_id: "clinic-1".into(),
            enabled: true,
            provider: AiProvider::OpenAi,
            api_key_encrypted: None,
            model: "gpt-4o".into(),
            base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            features: BTreeMap::from([(features::CHAT.to_string(), false)]),
            created_at: Utc::now(),
            updated_at: None,
        };

        assert!(config.feature_enabled(features::CLINICAL_ANALYSIS));
        assert!(!config.feature_enabled(features::CHAT));
    }
}
