//! CliniCore AI core.
//!
//! Library backing the clinic-facing AI features of CliniCore: provider
//! integration (OpenAI, Azure OpenAI, Anthropic, Google Gemini), per-clinic
//! credential encryption, and token-budget accounting. The HTTP layer above
//! this crate handles authentication and routing; license records are read
//! from the licensing module and passed in per request.
//!
//! ## Layout
//! - [`vault`]: AES-256-GCM encryption of stored provider API keys
//! - [`provider`]: uniform `CompletionBackend` over the four providers
//! - [`ledger`]: per-clinic usage counters with lazy monthly rollover
//! - [`gate`]: license/plan token limits and the allow/deny decision
//! - [`config`]: per-clinic AI configuration store
//! - [`prompt`]: prompt templates and suggestion parsers for the use cases
//! - [`orchestrator`]: the per-request flow composing all of the above
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use clinicore_ai::{
//!     AiConfigStore, AiOrchestrator, CredentialVault, License, LicensePlan, UsageLedger,
//! };
//!
//! # async fn run() -> Result<(), clinicore_ai::AiError> {
//! let db = std::path::Path::new("/var/lib/clinicore/ai.db");
//! let vault = Arc::new(CredentialVault::from_base64("…32-byte key, base64…")?);
//! let store = Arc::new(AiConfigStore::new(db)?);
//! let ledger = Arc::new(UsageLedger::new(db)?);
//! let ai = AiOrchestrator::new(store, ledger, vault);
//!
//! let license = License {
//!     ai_enabled: true,
//!     ai_token_limit: None,
//!     plan: LicensePlan::Professional,
//! };
//! let reply = ai.chat("clinic-42", &license, "Summarize the visit", &[], None).await?;
//! println!("{}", reply.reply);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod vault;

pub use config::{AiConfigStore, AiProvider, ClinicAiConfig, ClinicAiConfigUpdate, ClinicAiConfigView};
pub use error::{AiError, ProviderCallError, ProviderErrorKind};
pub use gate::{Allowance, BudgetGate, License, LicensePlan, UNLIMITED_TOKENS};
pub use ledger::{UsageLedger, UsageStats};
pub use orchestrator::{
    AiOrchestrator, ChatReply, ClinicalAnalysis, DiagnosisSuggestions, TreatmentSuggestions,
};
pub use prompt::{AnalysisType, DiagnosisSuggestion, TreatmentSuggestion};
pub use provider::{ChatRole, ChatTurn, Completion, CompletionBackend, ConnectionTest};
pub use vault::CredentialVault;
