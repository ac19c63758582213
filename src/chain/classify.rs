//! Error classification for chain adapter responses
//!
//! Adapters report failures as free-form text. The recovery engine only needs
//! to know whether repeating the call can ever succeed.

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// Nonce/duplicate style error - the call already landed
    AlreadyProcessed,
    /// Permanent failure - do not retry (invalid params, contract error)
    Permanent,
    /// Unknown error - may retry
    Unknown,
}

impl ErrorClass {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ErrorClass::Permanent)
    }
}

/// Classify an error for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Transient errors
    if error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("blockhash not found")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("already been processed")
    {
        return ErrorClass::AlreadyProcessed;
    }

    // Permanent errors
    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("insufficient balance")
        || error_lower.contains("invalid parameters")
        || error_lower.contains("invalid address")
        || error_lower.contains("account not found")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
