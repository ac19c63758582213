//! Error kinds for bridge operations
//!
//! Callers branch on the kind: validation failures are never retried,
//! chain-call and quorum failures are picked up by the recovery engine, and
//! exhausted retries escalate to admin review.

use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::types::Status;

/// Precondition failures raised before any transaction is created
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("amount {amount} is below the minimum bridge amount {min}")]
    BelowMinimum { amount: BigDecimal, min: BigDecimal },

    #[error("amount {amount} exceeds the maximum bridge amount {max}")]
    AboveMaximum { amount: BigDecimal, max: BigDecimal },

    #[error("net amount {net_amount} after fees must be positive")]
    NonPositiveNetAmount { net_amount: BigDecimal },

    #[error("{0} address must not be empty")]
    EmptyAddress(&'static str),

    #[error("bridge is currently unhealthy")]
    Unhealthy,

    #[error("bridge is paused")]
    Paused,

    #[error("{pending} transactions pending, limit is {limit}")]
    Backpressure { pending: usize, limit: usize },

    #[error("admin notes are required for this override")]
    MissingAdminNotes,

    #[error("{field} is already recorded with a different value")]
    ConflictingArtifact { field: &'static str },

    #[error("{0} must be known before a later artifact can be recorded")]
    MissingArtifact(&'static str),
}

/// Which chain a call went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Ethereum,
    Solana,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Ethereum => "ethereum",
            ChainKind::Solana => "solana",
        }
    }
}

impl std::fmt::Display for ChainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A chain RPC / contract call failed
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{chain} {operation} failed: {message}")]
pub struct ChainCallError {
    pub chain: ChainKind,
    pub operation: &'static str,
    pub message: String,
    /// The chain rejected the call outright (revert, insufficient funds).
    /// Retrying the same call cannot succeed.
    pub permanent: bool,
}

impl ChainCallError {
    pub fn transient(chain: ChainKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            chain,
            operation,
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(chain: ChainKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            chain,
            operation,
            message: message.into(),
            permanent: true,
        }
    }
}

/// Not enough valid validator signatures inside the collection window
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validator quorum not reached: {collected} of {required} valid signatures")]
pub struct QuorumError {
    pub collected: usize,
    pub required: usize,
}

/// Journal write or read failure
#[derive(Debug, Error)]
#[error("journal error: {0}")]
pub struct JournalError(pub String);

impl From<sqlx::Error> for JournalError {
    fn from(e: sqlx::Error) -> Self {
        JournalError(e.to_string())
    }
}

/// Top-level error returned by the command surface
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    ChainCall(#[from] ChainCallError),

    #[error(transparent)]
    Quorum(#[from] QuorumError),

    /// A step of an accepted transfer failed; the transaction stays pending
    #[error("transfer {tx_id} failed: {source}")]
    TransferFailed {
        tx_id: String,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("transaction {tx_id} exhausted {attempts} recovery attempts")]
    ExhaustedRetries { tx_id: String, attempts: u32 },

    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("transaction {tx_id} cannot move from {from} to {to}")]
    InvalidTransition {
        tx_id: String,
        from: Status,
        to: Status,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("resume refused: ethereum_connected={ethereum_connected} solana_connected={solana_connected}")]
    ResumeBlocked {
        ethereum_connected: bool,
        solana_connected: bool,
    },

    #[error("{configured} validators configured, at least {required} required")]
    InsufficientValidators { configured: usize, required: usize },

    #[error(transparent)]
    Journal(#[from] JournalError),

    /// An on-chain artifact landed but could not be journaled; the
    /// transaction was parked in admin review
    #[error("transaction {tx_id}: {event} could not be journaled")]
    Unpersisted { tx_id: String, event: String },
}

impl BridgeError {
    /// Whether the recovery engine should try this transaction again
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::ChainCall(e) => !e.permanent,
            BridgeError::Quorum(_) | BridgeError::Journal(_) => true,
            BridgeError::TransferFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "validation",
            BridgeError::ChainCall(_) => "chain_call",
            BridgeError::Quorum(_) => "quorum",
            BridgeError::TransferFailed { source, .. } => source.kind(),
            BridgeError::ExhaustedRetries { .. } => "exhausted_retries",
            BridgeError::NotFound(_) => "not_found",
            BridgeError::InvalidTransition { .. } => "invalid_transition",
            BridgeError::Unauthorized(_) => "unauthorized",
            BridgeError::ResumeBlocked { .. } => "resume_blocked",
            BridgeError::InsufficientValidators { .. } => "insufficient_validators",
            BridgeError::Journal(_) => "journal",
            BridgeError::Unpersisted { .. } => "unpersisted",
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
