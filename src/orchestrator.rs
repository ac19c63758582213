//! Transfer orchestrator
//!
//! Drives a transfer through its three on-chain steps:
//!
//! 1. commit the source (lock on Ethereum, burn on Solana) → `source_tx_hash`
//! 2. collect a validator quorum over the transfer digest → `signatures`
//! 3. release on the destination (mint on Solana, release on Ethereum) → `dest_tx_hash`
//!
//! [`TransferOrchestrator::run_steps`] skips any step whose artifact is already
//! recorded, which is what makes recovery safe to repeat: a lock or burn is
//! never sent twice for the same transaction.

use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::ChainPair;
use crate::config::BridgeParams;
use crate::error::{BridgeError, Result, ValidationError};
use crate::hash::{digest_to_hex, transfer_digest};
use crate::health::HealthMonitor;
use crate::liquidity::LiquidityManager;
use crate::metrics;
use crate::store::TransactionStore;
use crate::transaction::{split_fee, BridgeTransaction, RecoveryAttempt};
use crate::types::{Direction, Status};
use crate::validators::SignatureCollector;

pub struct TransferOrchestrator {
    store: Arc<TransactionStore>,
    chains: ChainPair,
    collector: Arc<SignatureCollector>,
    liquidity: Arc<LiquidityManager>,
    health: Arc<HealthMonitor>,
    params: BridgeParams,
    sequence: AtomicU64,
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<TransactionStore>,
        chains: ChainPair,
        collector: Arc<SignatureCollector>,
        liquidity: Arc<LiquidityManager>,
        health: Arc<HealthMonitor>,
        params: BridgeParams,
    ) -> Self {
        Self {
            store,
            chains,
            collector,
            liquidity,
            health,
            params,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> &BridgeParams {
        &self.params
    }

    /// Reject a request before any transaction exists
    pub async fn validate(
        &self,
        amount: &BigDecimal,
        from_address: &str,
        to_address: &str,
    ) -> Result<(), ValidationError> {
        if *amount < self.params.min_amount {
            return Err(ValidationError::BelowMinimum {
                amount: amount.clone(),
                min: self.params.min_amount.clone(),
            });
        }
        if *amount > self.params.max_amount {
            return Err(ValidationError::AboveMaximum {
                amount: amount.clone(),
                max: self.params.max_amount.clone(),
            });
        }
        if from_address.trim().is_empty() {
            return Err(ValidationError::EmptyAddress("from"));
        }
        if to_address.trim().is_empty() {
            return Err(ValidationError::EmptyAddress("to"));
        }
        let (_, net_amount) = split_fee(amount, &self.params.fee_percentage);
        if net_amount <= BigDecimal::from(0) {
            return Err(ValidationError::NonPositiveNetAmount { net_amount });
        }
        if self.health.is_paused() {
            return Err(ValidationError::Paused);
        }
        if !self.health.is_healthy() {
            return Err(ValidationError::Unhealthy);
        }
        let (pending, _) = self.store.counts().await;
        if pending >= self.params.max_pending_transactions {
            return Err(ValidationError::Backpressure {
                pending,
                limit: self.params.max_pending_transactions,
            });
        }
        Ok(())
    }

    fn next_id(&self, direction: Direction) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}_{}_{}",
            direction.id_prefix(),
            Utc::now().timestamp_micros(),
            seq
        )
    }

    /// Validate, create and run a transfer. Returns the transaction id once
    /// the destination step has landed.
    ///
    /// A step failure after the transaction exists is recorded on it and
    /// returned as [`BridgeError::TransferFailed`]; the transaction stays in
    /// the pending set for the detector and recovery engine.
    pub async fn initiate(
        &self,
        direction: Direction,
        amount: BigDecimal,
        from_address: &str,
        to_address: &str,
    ) -> Result<String> {
        self.validate(&amount, from_address, to_address).await?;

        let (fee, _) = split_fee(&amount, &self.params.fee_percentage);
        let tx = BridgeTransaction::new(
            self.next_id(direction),
            direction,
            amount,
            fee,
            from_address.trim().to_string(),
            to_address.trim().to_string(),
            self.params.max_retries,
            self.params.timeout_minutes,
            Utc::now(),
        );
        let tx_id = tx.id.clone();
        info!(
            tx_id = %tx_id,
            direction = %direction,
            amount = %tx.amount,
            fee = %tx.fee,
            net_amount = %tx.net_amount,
            "Bridge transfer initiated"
        );

        // Hold the flight lock before the transaction becomes visible to the loops.
        // The backlog limit is checked again under the store lock.
        let flight = self.store.flight(&tx_id);
        let _guard = flight.lock().await;
        self.store
            .insert_within(tx, self.params.max_pending_transactions)
            .await?;
        metrics::record_initiated(direction.as_str());

        match self.run_steps(&tx_id).await {
            Ok(()) => {
                self.finalize(&tx_id, None).await?;
                Ok(tx_id)
            }
            Err(e) => {
                self.record_step_failure(&tx_id, &e).await;
                Err(BridgeError::TransferFailed {
                    tx_id,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Run whichever steps have not completed yet. Caller holds the flight lock.
    pub async fn run_steps(&self, tx_id: &str) -> Result<()> {
        let tx = self.load(tx_id).await?;
        let route = self.chains.route(tx.direction);

        if tx.source_tx_hash.is_none() {
            let hash = route
                .commit_source(&tx.from_address, &tx.amount)
                .await?;
            info!(tx_id, chain = %route.source.kind(), source_tx_hash = %hash, "Source committed");
            self.store
                .update(tx_id, "source_committed", |t| {
                    t.source_tx_hash = Some(hash);
                    if t.status == Status::Pending {
                        t.advance(Status::Locked)?;
                    }
                    Ok(())
                })
                .await?;
        } else {
            debug!(tx_id, "Source already committed, skipping");
        }

        let tx = self.load(tx_id).await?;
        if !tx.has_quorum(self.collector.min_validators()) {
            let digest = transfer_digest(&tx);
            debug!(tx_id, digest = %digest_to_hex(&digest), "Collecting validator signatures");
            let signatures = self.collector.collect(&digest).await?;
            self.store
                .update(tx_id, "signatures_collected", |t| {
                    t.validators_used = signatures.iter().map(|s| s.validator.clone()).collect();
                    t.signatures = signatures;
                    Ok(())
                })
                .await?;
        } else {
            debug!(tx_id, "Quorum already collected, reusing signatures");
        }

        let tx = self.load(tx_id).await?;
        if tx.dest_tx_hash.is_none() {
            let mut reserves = self.liquidity.lock().await;
            let hash = route
                .release_destination(&tx.to_address, &tx.net_amount, &tx.signatures)
                .await?;
            info!(tx_id, chain = %route.destination.kind(), dest_tx_hash = %hash, "Destination released");
            self.store
                .update(tx_id, "destination_released", |t| {
                    t.dest_tx_hash = Some(hash);
                    Ok(())
                })
                .await?;
            if let Err(e) = self.liquidity.refresh(&mut reserves).await {
                warn!(tx_id, error = %e, "Failed to refresh liquidity after transfer");
            }
        } else {
            debug!(tx_id, "Destination already released, skipping");
        }

        Ok(())
    }

    /// Move a transaction whose steps all landed to its success status and
    /// archive it. `attempt` is appended first when finishing a recovery.
    pub async fn finalize(&self, tx_id: &str, attempt: Option<RecoveryAttempt>) -> Result<Status> {
        let tx = self
            .store
            .update(tx_id, "completed", |t| {
                if let Some(attempt) = attempt {
                    t.recovery_attempts.push(attempt);
                }
                t.error = None;
                t.advance(t.direction.success_status())?;
                Ok(t.clone())
            })
            .await?;

        let latency = (Utc::now() - tx.created_at).num_milliseconds() as f64 / 1000.0;
        metrics::record_finalized(tx.direction.as_str(), tx.status.as_str(), latency);
        info!(
            tx_id,
            status = %tx.status,
            dest_tx_hash = ?tx.dest_tx_hash,
            retries = tx.retry_count,
            "Bridge transfer completed"
        );
        Ok(tx.status)
    }

    /// Stamp a step error on the transaction. A permanent rejection of the
    /// source step, with nothing escrowed, finalizes it as FAILED.
    async fn record_step_failure(&self, tx_id: &str, err: &BridgeError) {
        metrics::record_step_failure(step_label(err), err.kind());
        let message = err.to_string();
        let result = self
            .store
            .update(tx_id, "step_failed", |t| {
                t.error = Some(message.clone());
                if is_source_rejection(t, err) {
                    t.advance(Status::Failed)?;
                }
                Ok(t.status)
            })
            .await;
        match result {
            Ok(Status::Failed) => {
                warn!(tx_id, error = %message, "Source chain rejected transfer, marked failed");
                metrics::record_finalized(
                    match self.store.get(tx_id).await {
                        Some(tx) => tx.direction.as_str(),
                        None => "unknown",
                    },
                    Status::Failed.as_str(),
                    0.0,
                );
            }
            Ok(status) => {
                warn!(tx_id, %status, error = %message, "Transfer step failed, left for recovery")
            }
            Err(e) => warn!(tx_id, error = %e, "Failed to record step failure"),
        }
    }

    async fn load(&self, tx_id: &str) -> Result<BridgeTransaction> {
        self.store
            .get(tx_id)
            .await
            .ok_or_else(|| BridgeError::NotFound(tx_id.to_string()))
    }
}

/// Nothing was escrowed and the chain said the commit can never succeed
pub fn is_source_rejection(tx: &BridgeTransaction, err: &BridgeError) -> bool {
    tx.source_tx_hash.is_none() && !err.is_retryable()
}

fn step_label(err: &BridgeError) -> &'static str {
    match err {
        BridgeError::ChainCall(e) => e.operation,
        BridgeError::Quorum(_) => "signatures",
        BridgeError::Journal(_) => "journal",
        _ => "other",
    }
}
