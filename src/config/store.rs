//! SQLite-backed store for per-clinic AI configuration.
//!
//! Reads through the public surface never expose key material: `get` returns
//! a view with a masked presence indicator, and `upsert` re-encrypts a key
//! only when the caller supplies a new plaintext one.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::{AiProvider, ClinicAiConfig};
use crate::error::AiError;
use crate::vault::CredentialVault;

/// Placeholder shown to callers when a key is configured.
const MASKED_KEY: &str = "••••••••";

/// Caller-facing configuration view. The stored key is reduced to a masked
/// indicator of presence; neither ciphertext nor plaintext leaves the store.
#[derive(Debug, Clone, Serialize)]
pub struct ClinicAiConfigView {
    pub clinic_id: String,
    pub enabled: bool,
    pub provider: AiProvider,
    /// `Some("••••••••")` when a key is configured, `None` otherwise.
    pub api_key_masked: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub features: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Configuration update payload.
///
/// `api_key: None` keeps the currently stored ciphertext; `Some(plaintext)`
/// re-encrypts through the vault. `features: None` keeps the stored toggles.
#[derive(Debug, Clone)]
pub struct ClinicAiConfigUpdate {
    pub enabled: bool,
    pub provider: String,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub features: Option<BTreeMap<String, bool>>,
}

/// SQLite-backed configuration store.
pub struct AiConfigStore {
    conn: Mutex<Connection>,
}

impl AiConfigStore {
    /// Open (or create) the configuration table in the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, AiError> {
        let conn = Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS clinic_ai_configs (
                clinic_id TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 0,
                provider TEXT NOT NULL,
                api_key_encrypted TEXT,
                model TEXT NOT NULL,
                base_url TEXT,
                max_tokens INTEGER NOT NULL,
                temperature REAL NOT NULL,
                features TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or update a clinic's configuration.
    ///
    /// Validates the provider name, `max_tokens` and `temperature` before
    /// touching the database, and encrypts a newly supplied key through the
    /// vault. Returns the stored record with the key masked, like `get`.
    pub fn upsert(
        &self,
        clinic_id: &str,
        update: ClinicAiConfigUpdate,
        vault: &CredentialVault,
    ) -> Result<ClinicAiConfigView, AiError> {
        let provider: AiProvider = update.provider.parse()?;

        if update.max_tokens == 0 {
            return Err(AiError::Configuration(
                "max_tokens must be a positive integer".into(),
            ));
        }
        if !(0.0..=1.0).contains(&update.temperature) {
            return Err(AiError::Configuration(format!(
                "temperature must be within [0, 1], got {}",
                update.temperature
            )));
        }
        if update.model.trim().is_empty() {
            return Err(AiError::Configuration("model must not be empty".into()));
        }

        let new_key_encrypted = match update.api_key.as_deref() {
            Some(plaintext) if !plaintext.is_empty() => Some(vault.encrypt(plaintext)?),
            Some(_) => None,
            None => None,
        };
        let key_supplied = matches!(update.api_key.as_deref(), Some(k) if !k.is_empty());

        let now = Utc::now();
        let conn = self.conn.lock();

        let existing = Self::load_row(&conn, clinic_id)?;
        let (api_key_encrypted, created_at, features) = match existing {
            Some(current) => (
                if key_supplied {
                    new_key_encrypted
                } else {
                    current.api_key_encrypted
                },
                current.created_at,
                update.features.unwrap_or(current.features),
            ),
            None => (new_key_encrypted, now, update.features.unwrap_or_default()),
        };

        let features_json = serde_json::to_string(&features)
            .map_err(|e| AiError::Configuration(format!("features are not serializable: {e}")))?;

        conn.execute(
            "INSERT INTO clinic_ai_configs
                (clinic_id, enabled, provider, api_key_encrypted, model, base_url,
                 max_tokens, temperature, features, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(clinic_id) DO UPDATE SET
                enabled = excluded.enabled,
                provider = excluded.provider,
                api_key_encrypted = excluded.api_key_encrypted,
                model = excluded.model,
                base_url = excluded.base_url,
                max_tokens = excluded.max_tokens,
                temperature = excluded.temperature,
                features = excluded.features,
                updated_at = excluded.updated_at",
            params![
                clinic_id,
                update.enabled,
                provider.as_str(),
                api_key_encrypted,
                update.model,
                update.base_url,
                update.max_tokens,
                update.temperature,
                features_json,
                created_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        tracing::info!(
            clinic_id,
            provider = provider.as_str(),
            model = %update.model,
            enabled = update.enabled,
            key_rotated = key_supplied,
            "AI configuration updated"
        );

        Ok(ClinicAiConfigView {
            clinic_id: clinic_id.to_string(),
            enabled: update.enabled,
            provider,
            api_key_masked: api_key_encrypted.as_ref().map(|_| MASKED_KEY.to_string()),
            model: update.model,
            base_url: update.base_url,
            max_tokens: update.max_tokens,
            temperature: update.temperature,
            features,
            created_at,
            updated_at: Some(now),
        })
    }

    /// Fetch the caller-facing view for a clinic, key masked.
    pub fn get(&self, clinic_id: &str) -> Result<Option<ClinicAiConfigView>, AiError> {
        let config = match self.load(clinic_id)? {
            Some(config) => config,
            None => return Ok(None),
        };

        Ok(Some(ClinicAiConfigView {
            clinic_id: config.clinic_id,
            enabled: config.enabled,
            provider: config.provider,
            api_key_masked: config
                .api_key_encrypted
                .as_ref()
                .map(|_| MASKED_KEY.to_string()),
            model: config.model,
            base_url: config.base_url,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            features: config.features,
            created_at: config.created_at,
            updated_at: config.updated_at,
        }))
    }

    /// Remove a clinic's configuration (only meaningful when the owning
    /// clinic itself is destroyed).
    pub fn delete(&self, clinic_id: &str) -> Result<bool, AiError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM clinic_ai_configs WHERE clinic_id = ?1",
            params![clinic_id],
        )?;
        Ok(deleted > 0)
    }

    /// Load the full stored record, ciphertext included. In-crate consumers
    /// (the orchestrator) use this; the public read path is `get`.
    pub(crate) fn load(&self, clinic_id: &str) -> Result<Option<ClinicAiConfig>, AiError> {
        let conn = self.conn.lock();
        Self::load_row(&conn, clinic_id)
    }

    fn load_row(conn: &Connection, clinic_id: &str) -> Result<Option<ClinicAiConfig>, AiError> {
        let row = conn
            .query_row(
                "SELECT clinic_id, enabled, provider, api_key_encrypted, model, base_url,
                        max_tokens, temperature, features, created_at, updated_at
                 FROM clinic_ai_configs WHERE clinic_id = ?1",
                params![clinic_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, f32>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, Option<String>>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            clinic_id,
            enabled,
            provider,
            api_key_encrypted,
            model,
            base_url,
            max_tokens,
            temperature,
            features_json,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let provider: AiProvider = provider.parse()?;
        let features: BTreeMap<String, bool> = serde_json::from_str(&features_json)
            .map_err(|e| AiError::Configuration(format!("stored features are corrupt: {e}")))?;

        Ok(Some(ClinicAiConfig {
            clinic_id,
            enabled,
            provider,
            api_key_encrypted,
            model,
            base_url,
            max_tokens,
            temperature,
            features,
            created_at: parse_timestamp(&created_at)?,
            updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
        }))
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AiError::Configuration(format!("stored timestamp is corrupt: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::features;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, AiConfigStore, CredentialVault) {
        let tmp = TempDir::new().unwrap();
        let store = AiConfigStore::new(&tmp.path().join("clinicore-ai.db")).unwrap();
        let vault = CredentialVault::new(CredentialVault::generate_key());
        (tmp, store, vault)
    }

    fn base_update() -> ClinicAiConfigUpdate {
        ClinicAiConfigUpdate {
            enabled: true,
            provider: "openai".into(),
            api_key: Some("sk-clinic-key".into()),
            model: "gpt-4o".into(),
            base_url: None,
            max_tokens: 2000,
            temperature: 0.7,
            features: None,
        }
    }

    #[test]
    fn upsert_encrypts_and_get_masks_key() {
        let (_tmp, store, vault) = test_store();

        let stored = store.upsert("clinic-1", base_update(), &vault).unwrap();
        assert_eq!(stored.api_key_masked.as_deref(), Some("••••••••"));

        let ciphertext = store
            .load("clinic-1")
            .unwrap()
            .unwrap()
            .api_key_encrypted
            .unwrap();
        assert!(CredentialVault::is_encrypted(&ciphertext));
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), "sk-clinic-key");

        let view = store.get("clinic-1").unwrap().unwrap();
        assert_eq!(view.api_key_masked.as_deref(), Some("••••••••"));
    }

    #[test]
    fn get_missing_clinic_returns_none() {
        let (_tmp, store, _vault) = test_store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn update_without_key_preserves_stored_ciphertext() {
        let (_tmp, store, vault) = test_store();

        store.upsert("clinic-1", base_update(), &vault).unwrap();
        let original_ct = store
            .load("clinic-1")
            .unwrap()
            .unwrap()
            .api_key_encrypted
            .unwrap();

        let mut second = base_update();
        second.api_key = None;
        second.model = "gpt-4o-mini".into();
        let updated = store.upsert("clinic-1", second, &vault).unwrap();
        assert_eq!(updated.model, "gpt-4o-mini");

        let kept_ct = store
            .load("clinic-1")
            .unwrap()
            .unwrap()
            .api_key_encrypted
            .unwrap();
        assert_eq!(kept_ct, original_ct);
    }

    #[test]
    fn new_key_is_reencrypted() {
        let (_tmp, store, vault) = test_store();

        store.upsert("clinic-1", base_update(), &vault).unwrap();
        let original_ct = store
            .load("clinic-1")
            .unwrap()
            .unwrap()
            .api_key_encrypted
            .unwrap();

        let mut second = base_update();
        second.api_key = Some("sk-rotated".into());
        store.upsert("clinic-1", second, &vault).unwrap();
        let new_ct = store
            .load("clinic-1")
            .unwrap()
            .unwrap()
            .api_key_encrypted
            .unwrap();

        assert_ne!(new_ct, original_ct);
        assert_eq!(vault.decrypt(&new_ct).unwrap(), "sk-rotated");
    }

    #[test]
    fn invalid_provider_is_rejected() {
        let (_tmp, store, vault) = test_store();
        let mut update = base_update();
        update.provider = "mistral".into();

        let err = store.upsert("clinic-1", update, &vault).unwrap_err();
        assert!(matches!(err, AiError::UnsupportedProvider(_)));
    }

    #[test]
    fn invalid_temperature_is_rejected() {
        let (_tmp, store, vault) = test_store();
        let mut update = base_update();
        update.temperature = 1.5;

        let err = store.upsert("clinic-1", update, &vault).unwrap_err();
        assert!(matches!(err, AiError::Configuration(_)));
    }

    #[test]
    fn zero_max_tokens_is_rejected() {
        let (_tmp, store, vault) = test_store();
        let mut update = base_update();
        update.max_tokens = 0;

        let err = store.upsert("clinic-1", update, &vault).unwrap_err();
        assert!(matches!(err, AiError::Configuration(_)));
    }

    #[test]
    fn features_survive_roundtrip_and_partial_update() {
        let (_tmp, store, vault) = test_store();

        let mut update = base_update();
        update.features = Some(BTreeMap::from([
            (features::CHAT.to_string(), false),
            (features::CLINICAL_ANALYSIS.to_string(), true),
        ]));
        store.upsert("clinic-1", update, &vault).unwrap();

        // Update without features keeps the stored toggles.
        let mut second = base_update();
        second.api_key = None;
        store.upsert("clinic-1", second, &vault).unwrap();

        let config = store.load("clinic-1").unwrap().unwrap();
        assert!(!config.feature_enabled(features::CHAT));
        assert!(config.feature_enabled(features::CLINICAL_ANALYSIS));
    }

    #[test]
    fn delete_removes_row() {
        let (_tmp, store, vault) = test_store();
        store.upsert("clinic-1", base_update(), &vault).unwrap();

        assert!(store.delete("clinic-1").unwrap());
        assert!(!store.delete("clinic-1").unwrap());
        assert!(store.get("clinic-1").unwrap().is_none());
    }

    #[test]
    fn created_at_is_preserved_across_updates() {
        let (_tmp, store, vault) = test_store();

        let first = store.upsert("clinic-1", base_update(), &vault).unwrap();
        let second = store.upsert("clinic-1", base_update(), &vault).unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at.is_some());
    }
}
