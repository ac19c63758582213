//! Recovery engine
//!
//! Retries STUCK transactions through the orchestrator's idempotent steps.
//! Every attempt increments `retry_count` and appends to the audit trail; the
//! attempt that uses the last retry and still fails escalates to ADMIN_REVIEW
//! with a single alert. A STUCK transaction found with no retries left (an
//! operator forced it back, or a restart interrupted its last attempt) is
//! escalated the same way rather than left waiting.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alerts::{escalation_key, AlertDispatcher, Severity};
use crate::error::{BridgeError, Result};
use crate::metrics;
use crate::orchestrator::{is_source_rejection, TransferOrchestrator};
use crate::store::TransactionStore;
use crate::transaction::{BridgeTransaction, RecoveryAttempt};
use crate::types::Status;

/// Result of one recovery attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Steps completed; transaction archived with this status
    Recovered { status: Status, attempt: u32 },
    /// Attempt failed, back to STUCK for the next cycle
    Retrying { attempt: u32, error: String },
    /// Last retry used; transaction is waiting for an operator
    Escalated { attempt: u32, error: String },
    /// Source chain permanently rejected the commit; archived as FAILED
    Failed { attempt: u32, error: String },
}

/// Summary of one recovery cycle
#[derive(Debug, Default, Clone, Serialize)]
pub struct RecoveryReport {
    pub attempted: usize,
    pub recovered: Vec<String>,
    pub escalated: Vec<String>,
    pub failed: Vec<String>,
    pub skipped_busy: usize,
}

pub struct RecoveryEngine {
    store: Arc<TransactionStore>,
    orchestrator: Arc<TransferOrchestrator>,
    alerts: Arc<AlertDispatcher>,
}

impl RecoveryEngine {
    pub fn new(
        store: Arc<TransactionStore>,
        orchestrator: Arc<TransferOrchestrator>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            alerts,
        }
    }

    /// Try every STUCK transaction; escalate the ones with no retries left
    pub async fn run_cycle(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for tx_id in self.store.pending_ids_with(&[Status::Stuck]).await {
            let Some(flight) = self.store.pending_flight(&tx_id).await else {
                continue;
            };
            let Ok(_guard) = flight.try_lock() else {
                debug!(tx_id = %tx_id, "Transaction busy, skipping recovery this cycle");
                report.skipped_busy += 1;
                continue;
            };

            let Some(tx) = self.store.get(&tx_id).await else {
                continue;
            };
            if tx.status != Status::Stuck {
                continue;
            }
            if tx.retries_exhausted() {
                warn!(tx_id = %tx_id, retries = tx.retry_count, "Stuck transaction has no retries left");
                match self.escalate(&tx_id).await {
                    Ok(_) => report.escalated.push(tx_id),
                    Err(e) => error!(tx_id = %tx_id, error = %e, "Failed to escalate stuck transaction"),
                }
                continue;
            }

            report.attempted += 1;
            match self.attempt(&tx_id).await {
                Ok(RecoveryOutcome::Recovered { .. }) => report.recovered.push(tx_id),
                Ok(RecoveryOutcome::Escalated { .. }) => report.escalated.push(tx_id),
                Ok(RecoveryOutcome::Failed { .. }) => report.failed.push(tx_id),
                Ok(RecoveryOutcome::Retrying { .. }) => {}
                Err(e) => error!(tx_id = %tx_id, error = %e, "Recovery attempt could not run"),
            }
        }

        if !report.recovered.is_empty() {
            info!(
                count = report.recovered.len(),
                transactions = ?report.recovered,
                "Recovered stuck transactions"
            );
        }
        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                recovered = report.recovered.len(),
                escalated = report.escalated.len(),
                failed = report.failed.len(),
                "Recovery cycle complete"
            );
        }
        report
    }

    /// Run one attempt on a STUCK transaction. Caller holds the flight lock.
    pub async fn attempt(&self, tx_id: &str) -> Result<RecoveryOutcome> {
        let started = Utc::now();
        let attempt_number = self
            .store
            .update(tx_id, "recovering", |t| {
                if t.retries_exhausted() {
                    return Err(BridgeError::ExhaustedRetries {
                        tx_id: t.id.clone(),
                        attempts: t.retry_count,
                    });
                }
                t.advance(Status::Recovering)?;
                t.retry_count += 1;
                t.last_retry_at = Some(started);
                Ok(t.retry_count)
            })
            .await?;
        info!(tx_id, attempt = attempt_number, "Attempting recovery");

        let err = match self.orchestrator.run_steps(tx_id).await {
            Ok(()) => {
                let record = RecoveryAttempt {
                    timestamp: Utc::now(),
                    attempt_number,
                    success: true,
                    error: None,
                };
                let status = self.orchestrator.finalize(tx_id, Some(record)).await?;
                self.alerts.resolve_escalation(tx_id);
                metrics::record_recovery_attempt("recovered");
                return Ok(RecoveryOutcome::Recovered {
                    status,
                    attempt: attempt_number,
                });
            }
            Err(e) => e,
        };

        let message = err.to_string();
        metrics::record_recovery_attempt("failed");
        let record = RecoveryAttempt {
            timestamp: Utc::now(),
            attempt_number,
            success: false,
            error: Some(message.clone()),
        };
        let (tx, page) = self
            .store
            .update(tx_id, "recovery_failed", |t| {
                t.recovery_attempts.push(record);
                if t.status == Status::AdminReview {
                    // Parked by the store after an unjournaled chain step; it paged already
                    return Ok((t.clone(), false));
                }
                t.error = Some(message.clone());
                let next = if is_source_rejection(t, &err) {
                    Status::Failed
                } else if t.retries_exhausted() {
                    Status::AdminReview
                } else {
                    Status::Stuck
                };
                t.advance(next)?;
                Ok((t.clone(), true))
            })
            .await?;

        match tx.status {
            Status::AdminReview => {
                if page {
                    self.notify_escalation(&tx).await;
                }
                Ok(RecoveryOutcome::Escalated {
                    attempt: attempt_number,
                    error: message,
                })
            }
            Status::Failed => {
                warn!(tx_id, error = %message, "Source chain rejected transfer during recovery");
                metrics::record_finalized(tx.direction.as_str(), Status::Failed.as_str(), 0.0);
                Ok(RecoveryOutcome::Failed {
                    attempt: attempt_number,
                    error: message,
                })
            }
            _ => {
                warn!(
                    tx_id,
                    attempt = attempt_number,
                    max_retries = tx.max_retries,
                    error = %message,
                    "Recovery attempt failed"
                );
                Ok(RecoveryOutcome::Retrying {
                    attempt: attempt_number,
                    error: message,
                })
            }
        }
    }

    /// Move a STUCK transaction that has no retries left to ADMIN_REVIEW and
    /// page once. Caller holds the flight lock.
    pub async fn escalate(&self, tx_id: &str) -> Result<BridgeTransaction> {
        let tx = self
            .store
            .update(tx_id, "escalated", |t| {
                t.advance(Status::AdminReview)?;
                Ok(t.clone())
            })
            .await?;
        self.notify_escalation(&tx).await;
        Ok(tx)
    }

    /// Log and page for a transaction that just entered ADMIN_REVIEW
    pub async fn notify_escalation(&self, tx: &BridgeTransaction) {
        error!(
            tx_id = %tx.id,
            attempts = tx.retry_count,
            error = ?tx.error,
            "Recovery retries exhausted, escalating to admin review"
        );
        metrics::record_recovery_attempt("escalated");
        self.alerts
            .raise(
                &escalation_key(&tx.id),
                Severity::Critical,
                &format!(
                    "Bridge transaction {} needs admin review after {} recovery attempts",
                    tx.id, tx.retry_count
                ),
                json!({
                    "tx_id": tx.id,
                    "direction": tx.direction.as_str(),
                    "amount": tx.amount.to_string(),
                    "attempts": tx.retry_count,
                    "source_tx_hash": tx.source_tx_hash,
                    "last_error": tx.error,
                }),
            )
            .await;
    }

    /// Recover one transaction now, waiting for its flight lock.
    ///
    /// PENDING and LOCKED transactions are marked STUCK first. ADMIN_REVIEW and
    /// terminal transactions are refused; those need an override. A STUCK
    /// transaction with no retries left is escalated instead of attempted.
    pub async fn force_recovery(&self, tx_id: &str) -> Result<RecoveryOutcome> {
        let Some(flight) = self.store.pending_flight(tx_id).await else {
            return Err(match self.store.get(tx_id).await {
                Some(tx) => BridgeError::InvalidTransition {
                    tx_id: tx_id.to_string(),
                    from: tx.status,
                    to: Status::Recovering,
                },
                None => BridgeError::NotFound(tx_id.to_string()),
            });
        };
        let _guard = flight.lock().await;

        let tx = self
            .store
            .get(tx_id)
            .await
            .ok_or_else(|| BridgeError::NotFound(tx_id.to_string()))?;

        match tx.status {
            Status::Pending | Status::Locked | Status::Stuck => {}
            other => {
                return Err(BridgeError::InvalidTransition {
                    tx_id: tx_id.to_string(),
                    from: other,
                    to: Status::Recovering,
                })
            }
        }

        if tx.retries_exhausted() {
            if tx.status != Status::Stuck {
                self.mark_forced_stuck(tx_id).await?;
            }
            let escalated = self.escalate(tx_id).await?;
            return Ok(RecoveryOutcome::Escalated {
                attempt: escalated.retry_count,
                error: escalated.error.unwrap_or_default(),
            });
        }

        if tx.status != Status::Stuck {
            self.mark_forced_stuck(tx_id).await?;
        }

        info!(tx_id, "Forced recovery requested");
        self.attempt(tx_id).await
    }

    async fn mark_forced_stuck(&self, tx_id: &str) -> Result<()> {
        let now = Utc::now();
        self.store
            .update(tx_id, "forced_stuck", |t| {
                t.advance(Status::Stuck)?;
                t.stuck_detection_time.get_or_insert(now);
                Ok(())
            })
            .await
    }
}
