//! Supervisory overrides
//!
//! Operator actions on a single transaction. Every override waits for the
//! transaction's flight lock, marks the record `admin_override` and keeps the
//! reason in `admin_notes`.
//!
//! `force_complete` declares success without on-chain confirmation and
//! `reconcile` writes operator-supplied chain artifacts onto the record, so
//! both need an [`ElevatedGrant`] from [`OverrideGate::elevate`] in addition
//! to written notes. Reconcile then runs only the steps still missing.
//!
//! Retry, cancel, force_complete and a successful reconcile clear the
//! transaction's escalation and review alerts so a later escalation pages.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::{review_key, AlertDispatcher, Severity};
use crate::chain::ChainPair;
use crate::error::{BridgeError, Result, ValidationError};
use crate::hash::{keccak256, refund_digest, transfer_digest};
use crate::liquidity::LiquidityManager;
use crate::metrics;
use crate::orchestrator::TransferOrchestrator;
use crate::store::TransactionStore;
use crate::transaction::{BridgeTransaction, ValidatorSignature};
use crate::types::{Direction, Status};
use crate::validators::SignatureCollector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OverrideAction {
    /// Reset the retry budget and hand the transaction back to recovery
    Retry,
    /// Abandon the transfer, refunding anything escrowed on the source chain
    Cancel,
    /// Mark delivered without on-chain confirmation
    ForceComplete { notes: String },
    /// Park for a human
    ManualReview,
    /// Record artifacts found on-chain, then run whatever is still missing
    Reconcile {
        #[serde(default)]
        source_tx_hash: Option<String>,
        #[serde(default)]
        dest_tx_hash: Option<String>,
        #[serde(default)]
        signatures: Vec<ValidatorSignature>,
        notes: String,
    },
}

impl OverrideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::Retry => "retry",
            OverrideAction::Cancel => "cancel",
            OverrideAction::ForceComplete { .. } => "force_complete",
            OverrideAction::ManualReview => "manual_review",
            OverrideAction::Reconcile { .. } => "reconcile",
        }
    }

    /// Admin notes of an action that needs an [`ElevatedGrant`]
    fn elevated_notes(&self) -> Option<&str> {
        match self {
            OverrideAction::ForceComplete { notes } | OverrideAction::Reconcile { notes, .. } => {
                Some(notes)
            }
            _ => None,
        }
    }

    /// Status the action moves a transaction of `direction` to
    fn target(&self, direction: Direction) -> Status {
        match self {
            OverrideAction::Retry => Status::Stuck,
            OverrideAction::Cancel => Status::Cancelled,
            OverrideAction::ManualReview => Status::AdminReview,
            OverrideAction::ForceComplete { .. } | OverrideAction::Reconcile { .. } => {
                direction.success_status()
            }
        }
    }
}

impl fmt::Display for OverrideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proof that the caller presented the admin override token.
/// Only [`OverrideGate::elevate`] can construct one.
#[derive(Debug)]
pub struct ElevatedGrant {
    _private: (),
}

/// Issues [`ElevatedGrant`]s against the configured admin token
pub struct OverrideGate {
    token_hash: Option<[u8; 32]>,
}

impl OverrideGate {
    pub fn new(admin_token: Option<&str>) -> Self {
        Self {
            token_hash: admin_token
                .filter(|t| !t.is_empty())
                .map(|t| keccak256(t.as_bytes())),
        }
    }

    pub fn enabled(&self) -> bool {
        self.token_hash.is_some()
    }

    pub fn elevate(&self, token: &str) -> Result<ElevatedGrant> {
        let Some(expected) = self.token_hash else {
            return Err(BridgeError::Unauthorized(
                "elevated overrides are disabled".to_string(),
            ));
        };
        if keccak256(token.as_bytes()) != expected {
            warn!("Rejected elevated override token");
            return Err(BridgeError::Unauthorized("invalid override token".to_string()));
        }
        Ok(ElevatedGrant { _private: () })
    }
}

pub struct OverrideController {
    store: Arc<TransactionStore>,
    orchestrator: Arc<TransferOrchestrator>,
    chains: ChainPair,
    collector: Arc<SignatureCollector>,
    liquidity: Arc<LiquidityManager>,
    alerts: Arc<AlertDispatcher>,
    gate: OverrideGate,
}

impl OverrideController {
    pub fn new(
        store: Arc<TransactionStore>,
        orchestrator: Arc<TransferOrchestrator>,
        chains: ChainPair,
        collector: Arc<SignatureCollector>,
        liquidity: Arc<LiquidityManager>,
        alerts: Arc<AlertDispatcher>,
        gate: OverrideGate,
    ) -> Self {
        Self {
            store,
            orchestrator,
            chains,
            collector,
            liquidity,
            alerts,
            gate,
        }
    }

    pub fn gate(&self) -> &OverrideGate {
        &self.gate
    }

    /// Apply `action` to a transaction and return the updated record
    pub async fn override_transaction(
        &self,
        tx_id: &str,
        action: OverrideAction,
        reason: &str,
        grant: Option<&ElevatedGrant>,
    ) -> Result<BridgeTransaction> {
        if let Some(notes) = action.elevated_notes() {
            if grant.is_none() {
                return Err(BridgeError::Unauthorized(format!(
                    "{} requires an elevated grant",
                    action
                )));
            }
            if notes.trim().is_empty() {
                return Err(ValidationError::MissingAdminNotes.into());
            }
        }

        let Some(flight) = self.store.pending_flight(tx_id).await else {
            return Err(match self.store.get(tx_id).await {
                Some(tx) => BridgeError::InvalidTransition {
                    tx_id: tx_id.to_string(),
                    from: tx.status,
                    to: action.target(tx.direction),
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

        info!(
            tx_id,
            action = %action,
            reason,
            status = %tx.status,
            "Applying admin override"
        );

        let notes = format!("{}: {}", action, reason);
        let updated = match &action {
            OverrideAction::Retry => {
                let updated = self
                    .force(tx_id, "override_retry", Status::Stuck, notes, |t| {
                        t.retry_count = 0;
                    })
                    .await?;
                self.alerts.resolve_escalation(tx_id);
                updated
            }
            OverrideAction::Cancel => {
                let updated = self.cancel(&tx, notes).await?;
                self.alerts.resolve_escalation(tx_id);
                updated
            }
            OverrideAction::ForceComplete { notes: admin_notes } => {
                let status = tx.direction.success_status();
                let notes = format!("{} ({})", notes, admin_notes.trim());
                let updated = self
                    .force(tx_id, "override_force_complete", status, notes, |_| {})
                    .await?;
                metrics::record_finalized(updated.direction.as_str(), "force_completed", 0.0);
                warn!(tx_id, %status, "Transaction force-completed without on-chain confirmation");
                self.alerts.resolve_escalation(tx_id);
                updated
            }
            OverrideAction::ManualReview => {
                let updated = self
                    .force(tx_id, "override_manual_review", Status::AdminReview, notes, |_| {})
                    .await?;
                self.alerts
                    .raise(
                        &review_key(tx_id),
                        Severity::Warning,
                        &format!("Bridge transaction {} sent to manual review", tx_id),
                        json!({
                            "tx_id": tx_id,
                            "reason": reason,
                            "previous_status": tx.status.as_str(),
                        }),
                    )
                    .await;
                updated
            }
            OverrideAction::Reconcile {
                source_tx_hash,
                dest_tx_hash,
                signatures,
                notes: admin_notes,
            } => {
                let artifacts = Artifacts {
                    source_tx_hash: source_tx_hash.as_deref(),
                    dest_tx_hash: dest_tx_hash.as_deref(),
                    signatures,
                };
                let notes = format!("{} ({})", notes, admin_notes.trim());
                let updated = self.reconcile(&tx, artifacts, notes).await?;
                self.alerts.resolve_escalation(tx_id);
                updated
            }
        };

        info!(tx_id, action = %action, status = %updated.status, "Admin override applied");
        Ok(updated)
    }

    async fn force<F>(
        &self,
        tx_id: &str,
        event: &str,
        status: Status,
        notes: String,
        extra: F,
    ) -> Result<BridgeTransaction>
    where
        F: FnOnce(&mut BridgeTransaction),
    {
        self.store
            .update(tx_id, event, |t| {
                t.force(status)?;
                t.admin_override = true;
                t.admin_notes = Some(notes);
                extra(t);
                Ok(t.clone())
            })
            .await
    }

    /// Refund what the source chain escrowed (if anything), then cancel
    async fn cancel(&self, tx: &BridgeTransaction, notes: String) -> Result<BridgeTransaction> {
        if !tx.status.can_override_to(Status::Cancelled) {
            return Err(BridgeError::InvalidTransition {
                tx_id: tx.id.clone(),
                from: tx.status,
                to: Status::Cancelled,
            });
        }
        // Destination already paid out: refunding would deliver twice
        if tx.dest_tx_hash.is_some() {
            return Err(BridgeError::InvalidTransition {
                tx_id: tx.id.clone(),
                from: tx.status,
                to: Status::Cancelled,
            });
        }

        if tx.source_tx_hash.is_some() && tx.refund_tx_hash.is_none() {
            let signatures = self.collector.collect(&refund_digest(tx)).await?;
            let route = self.chains.route(tx.direction);
            let mut reserves = self.liquidity.lock().await;
            let refund_hash = route
                .refund_source(&tx.from_address, &tx.amount, &signatures)
                .await?;
            info!(
                tx_id = %tx.id,
                chain = %route.source.kind(),
                refund_tx_hash = %refund_hash,
                amount = %tx.amount,
                "Escrowed funds refunded"
            );
            self.store
                .update(&tx.id, "refunded", |t| {
                    t.refund_tx_hash = Some(refund_hash);
                    Ok(())
                })
                .await?;
            if let Err(e) = self.liquidity.refresh(&mut reserves).await {
                warn!(tx_id = %tx.id, error = %e, "Failed to refresh liquidity after refund");
            }
        }

        let updated = self
            .force(&tx.id, "override_cancel", Status::Cancelled, notes, |_| {})
            .await?;
        metrics::record_finalized(updated.direction.as_str(), Status::Cancelled.as_str(), 0.0);
        Ok(updated)
    }

    /// Write the supplied artifacts, then run the missing steps under recovery.
    /// A step that still fails leaves the transaction in ADMIN_REVIEW.
    async fn reconcile(
        &self,
        tx: &BridgeTransaction,
        artifacts: Artifacts<'_>,
        notes: String,
    ) -> Result<BridgeTransaction> {
        let success = tx.direction.success_status();
        if !tx.status.can_override_to(Status::Stuck) {
            return Err(BridgeError::InvalidTransition {
                tx_id: tx.id.clone(),
                from: tx.status,
                to: success,
            });
        }

        let source_tx_hash = merge_artifact(
            "source_tx_hash",
            tx.source_tx_hash.as_deref(),
            artifacts.source_tx_hash,
        )?;
        let dest_tx_hash = merge_artifact(
            "dest_tx_hash",
            tx.dest_tx_hash.as_deref(),
            artifacts.dest_tx_hash,
        )?;
        if source_tx_hash.is_none() && (dest_tx_hash.is_some() || !artifacts.signatures.is_empty()) {
            return Err(ValidationError::MissingArtifact("source_tx_hash").into());
        }

        // Signatures bind the source hash, so check them against the merged record
        let signatures = if artifacts.signatures.is_empty() {
            None
        } else {
            let mut candidate = tx.clone();
            candidate.source_tx_hash = source_tx_hash.clone();
            Some(
                self.collector
                    .verify_supplied(&transfer_digest(&candidate), artifacts.signatures)?,
            )
        };

        self.store
            .update(&tx.id, "override_reconcile", |t| {
                t.source_tx_hash = source_tx_hash;
                t.dest_tx_hash = dest_tx_hash;
                if let Some(signatures) = signatures {
                    t.validators_used = signatures.iter().map(|s| s.validator.clone()).collect();
                    t.signatures = signatures;
                }
                if t.status != Status::Stuck {
                    t.force(Status::Stuck)?;
                }
                t.advance(Status::Recovering)?;
                t.admin_override = true;
                t.admin_notes = Some(notes);
                t.error = None;
                Ok(())
            })
            .await?;

        if let Err(e) = self.orchestrator.run_steps(&tx.id).await {
            let message = e.to_string();
            warn!(tx_id = %tx.id, error = %message, "Reconciled transaction still has a failing step");
            self.store
                .update(&tx.id, "reconcile_failed", |t| {
                    if t.status == Status::Recovering {
                        t.error = Some(message);
                        t.advance(Status::AdminReview)?;
                    }
                    Ok(())
                })
                .await?;
            return Err(e);
        }

        self.orchestrator.finalize(&tx.id, None).await?;
        self.store
            .get(&tx.id)
            .await
            .ok_or_else(|| BridgeError::NotFound(tx.id.clone()))
    }
}

/// Chain artifacts an operator supplies to [`OverrideAction::Reconcile`]
struct Artifacts<'a> {
    source_tx_hash: Option<&'a str>,
    dest_tx_hash: Option<&'a str>,
    signatures: &'a [ValidatorSignature],
}

/// Keep what is recorded, fill what is missing, refuse a different value
fn merge_artifact(
    field: &'static str,
    recorded: Option<&str>,
    supplied: Option<&str>,
) -> Result<Option<String>, ValidationError> {
    let supplied = supplied.map(str::trim).filter(|s| !s.is_empty());
    match (recorded, supplied) {
        (Some(recorded), Some(supplied)) if recorded != supplied => {
            Err(ValidationError::ConflictingArtifact { field })
        }
        (Some(recorded), _) => Ok(Some(recorded.to_string())),
        (None, supplied) => Ok(supplied.map(str::to_string)),
    }
}
