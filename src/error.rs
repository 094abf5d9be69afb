//! Error taxonomy for the CliniCore AI core.
//!
//! Every failure a caller can observe maps to one `AiError` variant.
//! Provider-side failures are normalized into `ProviderCallError` with a
//! closed set of kinds so the HTTP layer can translate them uniformly,
//! regardless of which backend produced them.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Normalized category for a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Rejected credentials (HTTP 401/403).
    Auth,
    /// Provider-side throttling (HTTP 429).
    RateLimit,
    /// The call did not complete within the request deadline.
    Timeout,
    /// The configured model is unknown to the provider.
    InvalidModel,
    /// Anything else: transport failures, 5xx, malformed responses.
    Unknown,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::InvalidModel => "invalid_model",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// A single failed provider call, normalized across all backends.
///
/// This crate never retries; the caller decides what to do with each kind.
#[derive(Debug, Clone, Error)]
#[error("provider call failed ({kind}): {message}")]
pub struct ProviderCallError {
    /// Failure category.
    pub kind: ProviderErrorKind,
    /// Human-readable detail from the transport or the provider body.
    pub message: String,
}

impl ProviderCallError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum AiError {
    /// Missing or malformed configuration: vault key, API key, base URL.
    /// Fatal to the operation and never charged to the clinic's ledger.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The AI module is switched off for this clinic, either on the license
    /// or on the clinic's own configuration.
    #[error("AI module disabled: {0}")]
    ModuleDisabled(String),

    /// The clinic's monthly token budget is exhausted. Denied requests are
    /// never charged; `resets_at` is the start of the next calendar month.
    #[error("monthly token budget exceeded: used {used} of {limit}, remaining 0, resets {resets_at}")]
    BudgetExceeded {
        limit: i64,
        used: i64,
        resets_at: DateTime<Utc>,
    },

    /// A stored provider value outside the supported set.
    #[error("unsupported AI provider: {0:?}")]
    UnsupportedProvider(String),

    /// Normalized provider failure; counted as a failed request.
    #[error(transparent)]
    Provider(#[from] ProviderCallError),

    /// Underlying SQLite failure in the ledger or config store.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// No AI configuration row exists for the clinic.
    #[error("no AI configuration for clinic {0}")]
    NotFound(String),
}

impl AiError {
    /// Whether this failure should be counted against the clinic's ledger.
    ///
    /// Gate denials and configuration problems happen before any provider
    /// work and must not charge the clinic.
    pub fn counts_as_failed_request(&self) -> bool {
        matches!(self, Self::Provider(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display_includes_kind() {
        let err = ProviderCallError::new(ProviderErrorKind::RateLimit, "429 from upstream");
        let text = err.to_string();
        assert!(text.contains("rate_limit"));
        assert!(text.contains("429 from upstream"));
    }

    #[test]
    fn budget_exceeded_reports_zero_remaining() {
        let err = AiError::BudgetExceeded {
            limit: 10_000,
            used: 10_050,
            resets_at: chrono::Utc::now(),
        };
        assert!(err.to_string().contains("remaining 0"));
    }

    #[test]
    fn only_provider_failures_are_charged() {
        let provider = AiError::Provider(ProviderCallError::new(ProviderErrorKind::Unknown, "x"));
        assert!(provider.counts_as_failed_request());

        let disabled = AiError::ModuleDisabled("license".into());
        assert!(!disabled.counts_as_failed_request());

        let config = AiError::Configuration("missing key".into());
        assert!(!config.counts_as_failed_request());
    }
}
