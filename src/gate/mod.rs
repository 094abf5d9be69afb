//! Budget gate: converts a license entitlement and current month usage into
//! an allow/deny decision.
//!
//! The gate runs strictly before any provider call. Denied requests are
//! never charged to the ledger.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ClinicAiConfig;
use crate::error::AiError;
use crate::ledger::UsageLedger;

/// Sentinel limit value meaning "no monthly cap".
pub const UNLIMITED_TOKENS: i64 = -1;

/// License plan tiers, with their default monthly token allowances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicensePlan {
    Basic,
    Professional,
    Enterprise,
    Custom,
}

impl LicensePlan {
    /// Default monthly token limit for the plan, consulted only when the
    /// license carries no explicit override. `None` means unlimited.
    pub fn monthly_token_limit(self) -> Option<i64> {
        match self {
            Self::Basic => Some(10_000),
            Self::Professional => Some(100_000),
            Self::Enterprise => Some(1_000_000),
            Self::Custom => None,
        }
    }
}

/// The slice of a clinic's license this core reads. Owned and persisted by
/// the licensing module; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    /// Whether the AI module is entitled at all.
    pub ai_enabled: bool,
    /// Explicit monthly token limit. `Some(-1)` (or any non-positive value)
    /// means unlimited; `None` falls back to the plan table.
    pub ai_token_limit: Option<i64>,
    pub plan: LicensePlan,
}

impl License {
    /// Effective monthly limit after applying the plan fallback.
    /// `None` means unlimited.
    pub fn effective_token_limit(&self) -> Option<i64> {
        match self.ai_token_limit {
            Some(limit) if limit > 0 => Some(limit),
            Some(_) => None,
            None => self.plan.monthly_token_limit(),
        }
    }
}

/// A granted allowance, reported back for logging and response headers.
#[derive(Debug, Clone, Serialize)]
pub struct Allowance {
    /// Effective monthly limit; `None` when unlimited.
    pub limit: Option<i64>,
    /// Tokens already consumed this month.
    pub used: i64,
    /// Tokens left before the gate starts denying; `None` when unlimited.
    pub remaining: Option<i64>,
}

/// Budget gate over the usage ledger.
pub struct BudgetGate {
    ledger: Arc<UsageLedger>,
}

impl BudgetGate {
    pub fn new(ledger: Arc<UsageLedger>) -> Self {
        Self { ledger }
    }

    /// Decide whether the clinic may place one more provider call.
    ///
    /// Denies with `ModuleDisabled` when the license or the clinic config has
    /// AI switched off, and with `BudgetExceeded` when the month's usage has
    /// reached the effective limit. Reading month usage applies the lazy
    /// rollover, so a stale counter from a previous month never denies.
    pub fn check(
        &self,
        clinic_id: &str,
        config: &ClinicAiConfig,
        license: &License,
    ) -> Result<Allowance, AiError> {
        if !license.ai_enabled {
            return Err(AiError::ModuleDisabled(
                "AI module is not enabled on this clinic's license".into(),
            ));
        }
        if !config.enabled {
            return Err(AiError::ModuleDisabled(
                "AI is not enabled in this clinic's configuration".into(),
            ));
        }

        let used = self.ledger.monthly_tokens(clinic_id)?;

        match license.effective_token_limit() {
            None => Ok(Allowance {
                limit: None,
                used,
                remaining: None,
            }),
            Some(limit) if used < limit => Ok(Allowance {
                limit: Some(limit),
                used,
                remaining: Some(limit - used),
            }),
            Some(limit) => Err(AiError::BudgetExceeded {
                limit,
                used,
                resets_at: next_month_start(Utc::now()),
            }),
        }
    }
}

/// Start of the calendar month after `now` (UTC), when the lazy rollover
/// will next zero the monthly counter.
fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}
