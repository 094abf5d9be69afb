//! Request orchestrator: one flow for every clinical use case.
//!
//! Gate → Decrypt → Compose → Call → Record → Respond. The four use cases
//! differ only in prompt template and result shape; everything else,
//! including the guarantee that the ledger is updated exactly once per
//! request that reaches the provider, lives here.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::{features, AiConfigStore, ClinicAiConfig};
use crate::error::{AiError, ProviderCallError, ProviderErrorKind};
use crate::gate::{BudgetGate, License};
use crate::ledger::UsageLedger;
use crate::prompt::{
    self, AnalysisType, DiagnosisSuggestion, PromptParts, TreatmentSuggestion,
};
use crate::provider::{
    backend_for, ChatTurn, Completion, CompletionRequest, ConnectionTest,
};
use crate::vault::CredentialVault;

/// Default deadline for a provider completion call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline for connection tests; these are interactive admin actions.
const CONNECT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP connect budget for the shared HTTP client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a clinical data analysis.
#[derive(Debug, Clone, Serialize)]
pub struct ClinicalAnalysis {
    pub analysis: String,
    pub analysis_type: AnalysisType,
    pub tokens_used: i64,
    pub response_time_ms: i64,
}

/// Result of a diagnosis suggestion request.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisSuggestions {
    pub suggestions: Vec<DiagnosisSuggestion>,
    pub tokens_used: i64,
    pub response_time_ms: i64,
}

/// Result of a treatment suggestion request.
#[derive(Debug, Clone, Serialize)]
pub struct TreatmentSuggestions {
    pub suggestions: Vec<TreatmentSuggestion>,
    pub tokens_used: i64,
    pub response_time_ms: i64,
}

/// Result of a free-form chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub tokens_used: i64,
    pub response_time_ms: i64,
}

/// The four clinical use cases sharing the orchestration flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UseCase {
    ClinicalAnalysis,
    DiagnosisSuggestion,
    TreatmentSuggestion,
    Chat,
}

impl UseCase {
    fn feature_name(self) -> &'static str {
        match self {
            Self::ClinicalAnalysis => features::CLINICAL_ANALYSIS,
            Self::DiagnosisSuggestion => features::DIAGNOSIS_SUGGESTIONS,
            Self::TreatmentSuggestion => features::TREATMENT_SUGGESTIONS,
            Self::Chat => features::CHAT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::ClinicalAnalysis => "clinical_analysis",
            Self::DiagnosisSuggestion => "diagnosis_suggestion",
            Self::TreatmentSuggestion => "treatment_suggestion",
            Self::Chat => "chat",
        }
    }
}

/// Orchestrates clinic AI requests against the configured provider, charging
/// the usage ledger exactly once per request that passes the gate and the
/// configuration checks.
pub struct AiOrchestrator {
    store: Arc<AiConfigStore>,
    ledger: Arc<UsageLedger>,
    vault: Arc<CredentialVault>,
    gate: BudgetGate,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl AiOrchestrator {
    pub fn new(
        store: Arc<AiConfigStore>,
        ledger: Arc<UsageLedger>,
        vault: Arc<CredentialVault>,
    ) -> Self {
        // Overall deadlines are enforced per request with tokio::time::timeout.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            store,
            gate: BudgetGate::new(Arc::clone(&ledger)),
            ledger,
            vault,
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request provider deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Analyze structured clinical data. Counts one processed document.
    pub async fn analyze_clinical(
        &self,
        clinic_id: &str,
        license: &License,
        clinical_data: &Value,
        analysis_type: AnalysisType,
    ) -> Result<ClinicalAnalysis, AiError> {
        let parts = prompt::clinical_analysis(clinical_data, analysis_type);
        self.run(clinic_id, license, UseCase::ClinicalAnalysis, parts, &[], |c| {
            (
                ClinicalAnalysis {
                    analysis: c.text.clone(),
                    analysis_type,
                    tokens_used: c.tokens_used,
                    response_time_ms: c.latency_ms,
                },
                1,
                0,
            )
        })
        .await
    }

    /// Suggest diagnoses for a symptom list. Counts the parsed suggestions.
    pub async fn suggest_diagnosis(
        &self,
        clinic_id: &str,
        license: &License,
        symptoms: &[String],
        patient_history: Option<&Value>,
    ) -> Result<DiagnosisSuggestions, AiError> {
        let parts = prompt::diagnosis_suggestion(symptoms, patient_history);
        self.run(clinic_id, license, UseCase::DiagnosisSuggestion, parts, &[], |c| {
            let suggestions = prompt::parse_suggestions(&c.text)
                .unwrap_or_else(|| prompt::fallback_diagnosis(&c.text));
            let count = suggestions.len() as i64;
            (
                DiagnosisSuggestions {
                    suggestions,
                    tokens_used: c.tokens_used,
                    response_time_ms: c.latency_ms,
                },
                0,
                count,
            )
        })
        .await
    }

    /// Suggest treatments for a diagnosis. Counts the parsed suggestions.
    pub async fn suggest_treatment(
        &self,
        clinic_id: &str,
        license: &License,
        diagnosis: &str,
        patient_data: Option<&Value>,
    ) -> Result<TreatmentSuggestions, AiError> {
        let parts = prompt::treatment_suggestion(diagnosis, patient_data);
        self.run(clinic_id, license, UseCase::TreatmentSuggestion, parts, &[], |c| {
            let suggestions = prompt::parse_suggestions(&c.text)
                .unwrap_or_else(|| prompt::fallback_treatment(&c.text));
            let count = suggestions.len() as i64;
            (
                TreatmentSuggestions {
                    suggestions,
                    tokens_used: c.tokens_used,
                    response_time_ms: c.latency_ms,
                },
                0,
                count,
            )
        })
        .await
    }

    /// Free-form assistant chat with optional prior context.
    pub async fn chat(
        &self,
        clinic_id: &str,
        license: &License,
        message: &str,
        context: &[ChatTurn],
        system_prompt: Option<&str>,
    ) -> Result<ChatReply, AiError> {
        let parts = prompt::chat(message, system_prompt);
        self.run(clinic_id, license, UseCase::Chat, parts, context, |c| {
            (
                ChatReply {
                    reply: c.text.clone(),
                    tokens_used: c.tokens_used,
                    response_time_ms: c.latency_ms,
                },
                0,
                0,
            )
        })
        .await
    }

    /// Perform a minimal real round trip against the clinic's configured
    /// provider. Never touches the ledger.
    pub async fn test_connection(&self, clinic_id: &str) -> Result<ConnectionTest, AiError> {
        let config = self.load_config(clinic_id)?;
        let api_key = self.decrypt_key(&config)?;
        let backend = backend_for(
            config.provider,
            self.client.clone(),
            api_key,
            config.base_url.clone(),
        )?;

        match tokio::time::timeout(CONNECT_TEST_TIMEOUT, backend.test_connection(&config.model))
            .await
        {
            Ok(result) => Ok(result),
            Err(_) => Ok(ConnectionTest {
                success: false,
                latency_ms: CONNECT_TEST_TIMEOUT.as_millis() as i64,
                error: Some(format!(
                    "no response within {}s",
                    CONNECT_TEST_TIMEOUT.as_secs()
                )),
            }),
        }
    }

    /// The shared per-request flow.
    ///
    /// `finish` turns a successful completion into the use-case result plus
    /// the (documents, suggestions) counter increments, so the whole outcome
    /// lands in one ledger update.
    async fn run<T: Send>(
        &self,
        clinic_id: &str,
        license: &License,
        use_case: UseCase,
        parts: PromptParts,
        context: &[ChatTurn],
        finish: impl FnOnce(&Completion) -> (T, i64, i64) + Send,
    ) -> Result<T, AiError> {
        let request_id = uuid::Uuid::new_v4();
        let config = self.load_config(clinic_id)?;

        // Gate first: denied requests are never charged and never reach the
        // provider.
        let allowance = self.gate.check(clinic_id, &config, license)?;
        if !config.feature_enabled(use_case.feature_name()) {
            return Err(AiError::ModuleDisabled(format!(
                "feature '{}' is disabled for this clinic",
                use_case.feature_name()
            )));
        }

        let api_key = self.decrypt_key(&config)?;
        let backend = backend_for(
            config.provider,
            self.client.clone(),
            api_key,
            config.base_url.clone(),
        )?;

        let request = CompletionRequest {
            prompt: &parts.user,
            system_prompt: parts.system.as_deref(),
            context,
            model: &config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let outcome = match tokio::time::timeout(self.request_timeout, backend.complete(request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderCallError::new(
                ProviderErrorKind::Timeout,
                format!(
                    "no response from {} within {}s",
                    config.provider,
                    self.request_timeout.as_secs()
                ),
            )),
        };

        // From here on the request is accounted exactly once, success or
        // failure.
        match outcome {
            Ok(completion) => {
                let (value, documents, suggestions) = finish(&completion);
                self.ledger.record_success(
                    clinic_id,
                    completion.tokens_used,
                    completion.latency_ms,
                    documents,
                    suggestions,
                )?;
                tracing::info!(
                    request_id = %request_id,
                    clinic_id,
                    use_case = use_case.label(),
                    provider = config.provider.as_str(),
                    model = %config.model,
                    tokens = completion.tokens_used,
                    latency_ms = completion.latency_ms,
                    remaining = ?allowance.remaining,
                    "AI request completed"
                );
                Ok(value)
            }
            Err(e) => {
                self.ledger.record_failure(clinic_id)?;
                tracing::warn!(
                    request_id = %request_id,
                    clinic_id,
                    use_case = use_case.label(),
                    provider = config.provider.as_str(),
                    kind = %e.kind,
                    "AI request failed: {}",
                    e.message
                );
                Err(e.into())
            }
        }
    }

    fn load_config(&self, clinic_id: &str) -> Result<ClinicAiConfig, AiError> {
        self.store
            .load(clinic_id)?
            .ok_or_else(|| AiError::NotFound(clinic_id.to_string()))
    }

    fn decrypt_key(&self, config: &ClinicAiConfig) -> Result<String, AiError> {
        let ciphertext = config.api_key_encrypted.as_deref().ok_or_else(|| {
            AiError::Configuration("no API key configured for this clinic".into())
        })?;
        self.vault.decrypt(ciphertext)
    }
}
