//! Per-clinic usage ledger.
//!
//! Tracks token consumption and request outcomes in a SQLite table, one row
//! per clinic. Counter updates are single SQL statements computed from
//! pre-update column values under the connection lock, so two concurrent
//! requests for the same clinic can never lose an increment.
//!
//! Month and year counters roll over lazily: every read or write first
//! compares the stored `last_reset_date` against the current calendar month
//! and year. There is no background scheduler.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::AiError;

/// Usage statistics for one clinic.
///
/// Invariant: `successful_requests + failed_requests == requests_count`.
/// `total_tokens` never resets; `tokens_this_month` and `tokens_this_year`
/// reset on calendar month/year change respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_tokens: i64,
    pub tokens_this_month: i64,
    pub tokens_this_year: i64,
    pub requests_count: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    /// Running mean over successful requests only.
    pub average_response_time_ms: f64,
    pub last_reset_date: Option<DateTime<Utc>>,
    pub last_request_date: Option<DateTime<Utc>>,
    pub documents_processed: i64,
    pub suggestions_generated: i64,
}

/// SQLite-backed usage ledger.
pub struct UsageLedger {
    conn: Mutex<Connection>,
}

impl UsageLedger {
    /// Open (or create) the ledger table in the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self, AiError> {
        let conn = Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage_stats (
                clinic_id TEXT PRIMARY KEY,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                tokens_this_month INTEGER NOT NULL DEFAULT 0,
                tokens_this_year INTEGER NOT NULL DEFAULT 0,
                requests_count INTEGER NOT NULL DEFAULT 0,
                successful_requests INTEGER NOT NULL DEFAULT 0,
                failed_requests INTEGER NOT NULL DEFAULT 0,
                average_response_time_ms REAL NOT NULL DEFAULT 0.0,
                last_reset_date TEXT,
                last_request_date TEXT,
                documents_processed INTEGER NOT NULL DEFAULT 0,
                suggestions_generated INTEGER NOT NULL DEFAULT 0
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Account one successful request.
    ///
    /// `documents` and `suggestions` carry the use-case specific counter
    /// increments so the whole outcome lands in a single ledger update.
    pub fn record_success(
        &self,
        clinic_id: &str,
        tokens_used: i64,
        response_time_ms: i64,
        documents: i64,
        suggestions: i64,
    ) -> Result<UsageStats, AiError> {
        let now = Utc::now();
        let conn = self.conn.lock();
        Self::ensure_row(&conn, clinic_id, now)?;
        Self::apply_rollover(&conn, clinic_id, now)?;

        // All right-hand sides read pre-update values, so the running mean
        // uses the successful_requests count from before this request.
        conn.execute(
            "UPDATE usage_stats SET
                total_tokens = total_tokens + ?2,
                tokens_this_month = tokens_this_month + ?2,
                tokens_this_year = tokens_this_year + ?2,
                requests_count = requests_count + 1,
                average_response_time_ms =
                    (average_response_time_ms * successful_requests + ?3)
                        / (successful_requests + 1),
                successful_requests = successful_requests + 1,
                documents_processed = documents_processed + ?4,
                suggestions_generated = suggestions_generated + ?5,
                last_request_date = ?6
             WHERE clinic_id = ?1",
            params![
                clinic_id,
                tokens_used,
                response_time_ms as f64,
                documents,
                suggestions,
                now.to_rfc3339(),
            ],
        )?;

        Self::read_stats(&conn, clinic_id)
    }

    /// Account one failed request. Token counters and the latency mean are
    /// untouched.
    pub fn record_failure(&self, clinic_id: &str) -> Result<UsageStats, AiError> {
        let now = Utc::now();
        let conn = self.conn.lock();
        Self::ensure_row(&conn, clinic_id, now)?;
        Self::apply_rollover(&conn, clinic_id, now)?;

        conn.execute(
            "UPDATE usage_stats SET
                requests_count = requests_count + 1,
                failed_requests = failed_requests + 1,
                last_request_date = ?2
             WHERE clinic_id = ?1",
            params![clinic_id, now.to_rfc3339()],
        )?;

        Self::read_stats(&conn, clinic_id)
    }

    /// Tokens consumed this month, after applying any pending rollover.
    /// This is the figure the budget gate compares against the limit.
    pub fn monthly_tokens(&self, clinic_id: &str) -> Result<i64, AiError> {
        let now = Utc::now();
        let conn = self.conn.lock();
        Self::ensure_row(&conn, clinic_id, now)?;
        Self::apply_rollover(&conn, clinic_id, now)?;

        let tokens = conn.query_row(
            "SELECT tokens_this_month FROM usage_stats WHERE clinic_id = ?1",
            params![clinic_id],
            |row| row.get(0),
        )?;
        Ok(tokens)
    }

    /// Full statistics for a clinic, after applying any pending rollover.
    pub fn stats(&self, clinic_id: &str) -> Result<UsageStats, AiError> {
        let now = Utc::now();
        let conn = self.conn.lock();
        Self::ensure_row(&conn, clinic_id, now)?;
        Self::apply_rollover(&conn, clinic_id, now)?;
        Self::read_stats(&conn, clinic_id)
    }

    /// Administrative reset of the monthly counter, outside the lazy
    /// rollover path. Idempotent within a month; never touches
    /// `total_tokens` or `tokens_this_year`.
    pub fn reset_monthly(&self, clinic_id: &str) -> Result<UsageStats, AiError> {
        let now = Utc::now();
        let conn = self.conn.lock();
        Self::ensure_row(&conn, clinic_id, now)?;

        conn.execute(
            "UPDATE usage_stats SET
                tokens_this_month = 0,
                last_reset_date = ?2
             WHERE clinic_id = ?1",
            params![clinic_id, now.to_rfc3339()],
        )?;

        tracing::info!(clinic_id, "monthly token counter reset");
        Self::read_stats(&conn, clinic_id)
    }

    fn ensure_row(conn: &Connection, clinic_id: &str, now: DateTime<Utc>) -> Result<(), AiError> {
        conn.execute(
            "INSERT OR IGNORE INTO usage_stats (clinic_id, last_reset_date)
             VALUES (?1, ?2)",
            params![clinic_id, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Zero the month counter on calendar month change and the year counter
    /// on calendar year change, stamping `last_reset_date`.
    fn apply_rollover(
        conn: &Connection,
        clinic_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AiError> {
        let last_reset: Option<String> = conn
            .query_row(
                "SELECT last_reset_date FROM usage_stats WHERE clinic_id = ?1",
                params![clinic_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let last_reset = match last_reset.as_deref().map(parse_timestamp).transpose()? {
            Some(date) => date,
            None => {
                conn.execute(
                    "UPDATE usage_stats SET last_reset_date = ?2 WHERE clinic_id = ?1",
                    params![clinic_id, now.to_rfc3339()],
                )?;
                return Ok(());
            }
        };

        let year_changed = now.year() != last_reset.year();
        let month_changed = year_changed || now.month() != last_reset.month();

        if !month_changed {
            return Ok(());
        }

        if year_changed {
            conn.execute(
                "UPDATE usage_stats SET
                    tokens_this_month = 0,
                    tokens_this_year = 0,
                    last_reset_date = ?2
                 WHERE clinic_id = ?1",
                params![clinic_id, now.to_rfc3339()],
            )?;
        } else {
            conn.execute(
                "UPDATE usage_stats SET
                    tokens_this_month = 0,
                    last_reset_date = ?2
                 WHERE clinic_id = ?1",
                params![clinic_id, now.to_rfc3339()],
            )?;
        }

        tracing::debug!(
            clinic_id,
            year_changed,
            "lazy usage counter rollover applied"
        );
        Ok(())
    }

    fn read_stats(conn: &Connection, clinic_id: &str) -> Result<UsageStats, AiError> {
        let row = conn.query_row(
            "SELECT total_tokens, tokens_this_month, tokens_this_year,
                    requests_count, successful_requests, failed_requests,
                    average_response_time_ms, last_reset_date, last_request_date,
                    documents_processed, suggestions_generated
             FROM usage_stats WHERE clinic_id = ?1",
            params![clinic_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, i64>(10)?,
                ))
            },
        )?;

        Ok(UsageStats {
            total_tokens: row.0,
            tokens_this_month: row.1,
            tokens_this_year: row.2,
            requests_count: row.3,
            successful_requests: row.4,
            failed_requests: row.5,
            average_response_time_ms: row.6,
            last_reset_date: row.7.as_deref().map(parse_timestamp).transpose()?,
            last_request_date: row.8.as_deref().map(parse_timestamp).transpose()?,
            documents_processed: row.9,
            suggestions_generated: row.10,
        })
    }

    /// Overwrite `last_reset_date` directly, bypassing the rollover logic.
    /// Test hook for simulating stale months.
    #[cfg(test)]
    fn set_last_reset(&self, clinic_id: &str, date: DateTime<Utc>) {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE usage_stats SET last_reset_date = ?2 WHERE clinic_id = ?1",
            params![clinic_id, date.to_rfc3339()],
        )
        .unwrap();
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AiError::Configuration(format!("stored timestamp is corrupt: {e}")))
}
