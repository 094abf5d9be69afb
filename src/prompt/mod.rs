//! Prompt composition for the clinical use cases.
//!
//! Pure functions: structured input in, provider-agnostic prompt text out.
//! The parsers in the second half turn completion text back into structured
//! suggestions, tolerating the markdown fences and prose that models wrap
//! around JSON.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Kind of clinical analysis requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    General,
    Diagnosis,
    Treatment,
    Risk,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Diagnosis => "diagnosis",
            Self::Treatment => "treatment",
            Self::Risk => "risk",
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A composed prompt: optional system instruction plus the user message.
#[derive(Debug, Clone)]
pub struct PromptParts {
    pub system: Option<String>,
    pub user: String,
}

/// One suggested diagnosis with the model's stated confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisSuggestion {
    pub diagnosis: String,
    /// Free-form confidence label; models are asked for low/medium/high.
    pub confidence: String,
    pub reasoning: String,
}

/// One suggested treatment option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentSuggestion {
    pub treatment: String,
    /// medication / procedure / lifestyle / general.
    #[serde(rename = "type")]
    pub kind: String,
    pub notes: String,
}

/// Prompt for free-form clinical data analysis.
pub fn clinical_analysis(clinical_data: &Value, analysis_type: AnalysisType) -> PromptParts {
    let system = match analysis_type {
        AnalysisType::General => {
            "You are a medical AI assistant. Analyze the provided clinical data and provide insights."
        }
        AnalysisType::Diagnosis => {
            "You are a medical AI assistant specialized in diagnosis. Analyze symptoms and clinical data to suggest possible diagnoses."
        }
        AnalysisType::Treatment => {
            "You are a medical AI assistant specialized in treatment recommendations. Analyze clinical data and suggest treatment options."
        }
        AnalysisType::Risk => {
            "You are a medical AI assistant specialized in risk assessment. Analyze clinical data and assess patient risk factors."
        }
    };

    let data = serde_json::to_string_pretty(clinical_data).unwrap_or_else(|_| clinical_data.to_string());
    PromptParts {
        system: Some(system.to_string()),
        user: format!("Analyze the following clinical data:\n\n{data}\n\nProvide a detailed analysis."),
    }
}

/// Prompt for diagnosis suggestions from a symptom list.
pub fn diagnosis_suggestion(symptoms: &[String], patient_history: Option<&Value>) -> PromptParts {
    let mut user = format!("Symptoms: {}\n\n", symptoms.join(", "));
    if let Some(history) = patient_history {
        let data = serde_json::to_string_pretty(history).unwrap_or_else(|_| history.to_string());
        user.push_str(&format!("Patient History: {data}\n\n"));
    }
    user.push_str("Suggest possible diagnoses with confidence levels and reasoning.");

    PromptParts {
        system: Some(
            "You are a medical AI assistant. Suggest possible diagnoses based on symptoms. \
             Return your response as a JSON array of objects with 'diagnosis', 'confidence' \
             (low/medium/high), and 'reasoning' fields."
                .to_string(),
        ),
        user,
    }
}

/// Prompt for treatment suggestions for a given diagnosis.
pub fn treatment_suggestion(diagnosis: &str, patient_data: Option<&Value>) -> PromptParts {
    let mut user = format!("Diagnosis: {diagnosis}\n\n");
    if let Some(data) = patient_data {
        let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        user.push_str(&format!("Patient Data: {pretty}\n\n"));
    }
    user.push_str("Suggest treatment options.");

    PromptParts {
        system: Some(
            "You are a medical AI assistant. Suggest treatment options for diagnoses. \
             Return your response as a JSON array of objects with 'treatment', 'type' \
             (medication/procedure/lifestyle), and 'notes' fields."
                .to_string(),
        ),
        user,
    }
}

/// Prompt for the free-form assistant chat.
pub fn chat(message: &str, system_prompt: Option<&str>) -> PromptParts {
    PromptParts {
        system: system_prompt.map(str::to_string),
        user: message.to_string(),
    }
}

/// Parse a JSON array of suggestions out of completion text.
///
/// Strips markdown code fences, then tries the first `[...]` span, then the
/// whole text. Returns `None` when nothing deserializes, in which case
/// callers fall back to wrapping the raw text.
pub fn parse_suggestions<T: DeserializeOwned>(text: &str) -> Option<Vec<T>> {
    let cleaned = strip_code_fences(text);

    if let Some(span) = bracketed_span(cleaned) {
        if let Ok(parsed) = serde_json::from_str::<Vec<T>>(span) {
            return Some(parsed);
        }
    }

    serde_json::from_str::<Vec<T>>(cleaned).ok()
}

/// Wrap unparseable diagnosis output in a single medium-confidence entry.
pub fn fallback_diagnosis(text: &str) -> Vec<DiagnosisSuggestion> {
    vec![DiagnosisSuggestion {
        diagnosis: "See analysis".to_string(),
        confidence: "medium".to_string(),
        reasoning: text.to_string(),
    }]
}

/// Wrap unparseable treatment output in a single general entry.
pub fn fallback_treatment(text: &str) -> Vec<TreatmentSuggestion> {
    vec![TreatmentSuggestion {
        treatment: "See analysis".to_string(),
        kind: "general".to_string(),
        notes: text.to_string(),
    }]
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let start = trimmed.find('\n').map(|i| i + 1).unwrap_or(0);
    let end = trimmed[start..]
        .rfind("```")
        .map(|i| i + start)
        .unwrap_or(trimmed.len());
    trimmed[start..end].trim()
}

/// Outermost `[...]` span, for responses that wrap the array in prose.
fn bracketed_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clinical_analysis_embeds_data_and_type() {
        let data = json!({"symptoms": ["fever"], "vitals": {"bpm": 90}});
        let parts = clinical_analysis(&data, AnalysisType::Risk);

        assert!(parts.system.as_deref().unwrap().contains("risk assessment"));
        assert!(parts.user.contains("\"fever\""));
        assert!(parts.user.contains("detailed analysis"));
    }

    #[test]
    fn diagnosis_prompt_lists_symptoms_and_requests_json() {
        let symptoms = vec!["fever".to_string(), "cough".to_string()];
        let parts = diagnosis_suggestion(&symptoms, None);

        assert!(parts.user.starts_with("Symptoms: fever, cough"));
        assert!(parts.system.as_deref().unwrap().contains("JSON array"));
        assert!(!parts.user.contains("Patient History"));
    }

    #[test]
    fn diagnosis_prompt_includes_history_when_present() {
        let history = json!({"allergies": ["penicillin"]});
        let parts = diagnosis_suggestion(&["rash".to_string()], Some(&history));
        assert!(parts.user.contains("Patient History"));
        assert!(parts.user.contains("penicillin"));
    }

    #[test]
    fn treatment_prompt_names_the_diagnosis() {
        let parts = treatment_suggestion("hypertension", None);
        assert!(parts.user.starts_with("Diagnosis: hypertension"));
        assert!(parts.system.as_deref().unwrap().contains("'treatment'"));
    }

    #[test]
    fn chat_passes_message_and_system_through() {
        let parts = chat("how do I dose this?", Some("be brief"));
        assert_eq!(parts.user, "how do I dose this?");
        assert_eq!(parts.system.as_deref(), Some("be brief"));

        let bare = chat("hello", None);
        assert!(bare.system.is_none());
    }

    #[test]
    fn parses_plain_json_array() {
        let text = r#"[{"diagnosis": "flu", "confidence": "high", "reasoning": "classic"}]"#;
        let parsed: Vec<DiagnosisSuggestion> = parse_suggestions(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].diagnosis, "flu");
    }

    #[test]
    fn parses_fenced_json_array() {
        let text = "```json\n[{\"diagnosis\": \"flu\", \"confidence\": \"low\", \"reasoning\": \"r\"}]\n```";
        let parsed: Vec<DiagnosisSuggestion> = parse_suggestions(text).unwrap();
        assert_eq!(parsed[0].confidence, "low");
    }

    #[test]
    fn parses_array_embedded_in_prose() {
        let text = "Here are my suggestions:\n[{\"treatment\": \"rest\", \"type\": \"lifestyle\", \"notes\": \"n\"}]\nHope that helps.";
        let parsed: Vec<TreatmentSuggestion> = parse_suggestions(text).unwrap();
        assert_eq!(parsed[0].kind, "lifestyle");
    }

    #[test]
    fn unparseable_text_returns_none() {
        assert!(parse_suggestions::<DiagnosisSuggestion>("I think it's probably a cold.").is_none());
    }

    #[test]
    fn fallbacks_wrap_the_raw_text() {
        let diagnosis = fallback_diagnosis("free-form answer");
        assert_eq!(diagnosis.len(), 1);
        assert_eq!(diagnosis[0].reasoning, "free-form answer");
        assert_eq!(diagnosis[0].confidence, "medium");

        let treatment = fallback_treatment("free-form answer");
        assert_eq!(treatment[0].kind, "general");
    }
}
