use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::JournalError;
use crate::transaction::{BridgeTransaction, RecoveryAttempt, ValidatorSignature};
use crate::types::{Direction, Status};

// Amounts are NUMERIC in the database. They are bound as text and cast with
// `$n::NUMERIC` on write, and selected as `amount::TEXT` on read, then parsed
// back into BigDecimal here.

/// Row of `bridge_transactions`
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: String,
    pub direction: String,
    pub amount: String,
    pub fee: String,
    pub net_amount: String,
    pub from_address: String,
    pub to_address: String,
    pub status: String,
    pub source_tx_hash: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub refund_tx_hash: Option<String>,
    /// JSON array of `ValidatorSignature`
    pub signatures: String,
    /// JSON array of validator ids
    pub validators_used: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_minutes: i64,
    pub stuck_detection_time: Option<DateTime<Utc>>,
    pub alert_sent: bool,
    /// JSON array of `RecoveryAttempt`
    pub recovery_attempts: String,
    pub admin_override: bool,
    pub admin_notes: Option<String>,
    pub error: Option<String>,
}

fn decimal(field: &str, raw: &str) -> Result<BigDecimal, JournalError> {
    BigDecimal::from_str(raw)
        .map_err(|e| JournalError(format!("invalid {} {:?}: {}", field, raw, e)))
}

fn json<T: serde::de::DeserializeOwned>(field: &str, raw: &str) -> Result<T, JournalError> {
    serde_json::from_str(raw).map_err(|e| JournalError(format!("invalid {}: {}", field, e)))
}

impl TryFrom<TransactionRow> for BridgeTransaction {
    type Error = JournalError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let signatures: Vec<ValidatorSignature> = json("signatures", &row.signatures)?;
        let validators_used: Vec<String> = json("validators_used", &row.validators_used)?;
        let recovery_attempts: Vec<RecoveryAttempt> =
            json("recovery_attempts", &row.recovery_attempts)?;

        Ok(BridgeTransaction {
            direction: Direction::from_str(&row.direction).map_err(JournalError)?,
            status: Status::from_str(&row.status).map_err(JournalError)?,
            amount: decimal("amount", &row.amount)?,
            fee: decimal("fee", &row.fee)?,
            net_amount: decimal("net_amount", &row.net_amount)?,
            id: row.id,
            from_address: row.from_address,
            to_address: row.to_address,
            source_tx_hash: row.source_tx_hash,
            dest_tx_hash: row.dest_tx_hash,
            refund_tx_hash: row.refund_tx_hash,
            signatures,
            validators_used,
            created_at: row.created_at,
            completed_at: row.completed_at,
            last_retry_at: row.last_retry_at,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            timeout_minutes: row.timeout_minutes,
            stuck_detection_time: row.stuck_detection_time,
            alert_sent: row.alert_sent,
            recovery_attempts,
            admin_override: row.admin_override,
            admin_notes: row.admin_notes,
            error: row.error,
        })
    }
}
