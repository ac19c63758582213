//! Bridge transaction record and its state machine

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::types::{Direction, Status};

/// A validator's signature over a transaction digest, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSignature {
    pub validator: String,
    pub signature: String,
}

/// One entry of the append-only recovery audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub timestamp: DateTime<Utc>,
    pub attempt_number: u32,
    pub success: bool,
    pub error: Option<String>,
}

/// One transfer attempt across the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub id: String,
    pub direction: Direction,
    /// Gross amount committed on the source chain
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    /// Amount delivered on the destination chain
    pub net_amount: BigDecimal,
    pub from_address: String,
    pub to_address: String,
    pub status: Status,
    pub source_tx_hash: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub refund_tx_hash: Option<String>,
    pub signatures: Vec<ValidatorSignature>,
    pub validators_used: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_minutes: i64,
    pub stuck_detection_time: Option<DateTime<Utc>>,
    pub alert_sent: bool,
    pub recovery_attempts: Vec<RecoveryAttempt>,
    pub admin_override: bool,
    pub admin_notes: Option<String>,
    pub error: Option<String>,
}

/// Fee split for a gross amount: `fee = amount × fee_percentage`
pub fn split_fee(amount: &BigDecimal, fee_percentage: &BigDecimal) -> (BigDecimal, BigDecimal) {
    let fee = amount * fee_percentage;
    let net = amount - &fee;
    (fee, net)
}

impl BridgeTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        direction: Direction,
        amount: BigDecimal,
        fee: BigDecimal,
        from_address: String,
        to_address: String,
        max_retries: u32,
        timeout_minutes: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let net_amount = &amount - &fee;
        Self {
            id,
            direction,
            amount,
            fee,
            net_amount,
            from_address,
            to_address,
            status: Status::Pending,
            source_tx_hash: None,
            dest_tx_hash: None,
            refund_tx_hash: None,
            signatures: Vec::new(),
            validators_used: Vec::new(),
            created_at,
            completed_at: None,
            last_retry_at: None,
            retry_count: 0,
            max_retries,
            timeout_minutes,
            stuck_detection_time: None,
            alert_sent: false,
            recovery_attempts: Vec::new(),
            admin_override: false,
            admin_notes: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Older than its timeout window and not yet finished
    pub fn is_stuck(&self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        now - self.created_at > Duration::minutes(self.timeout_minutes)
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 60.0
    }

    /// Whole minutes left before the detector considers this stuck
    pub fn time_remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        let remaining = Duration::minutes(self.timeout_minutes) - (now - self.created_at);
        remaining.num_minutes().max(0)
    }

    pub fn has_quorum(&self, min_validators: usize) -> bool {
        self.signatures.len() >= min_validators
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Apply an automatic transition, rejecting anything off the graph
    pub fn advance(&mut self, next: Status) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(self.invalid(next));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Apply an operator-forced transition
    pub fn force(&mut self, next: Status) -> Result<()> {
        if !self.status.can_override_to(next) {
            return Err(self.invalid(next));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    fn invalid(&self, to: Status) -> BridgeError {
        BridgeError::InvalidTransition {
            tx_id: self.id.clone(),
            from: self.status,
            to,
        }
    }
}
