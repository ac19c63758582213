//! Transaction store
//!
//! The one owner of every [`BridgeTransaction`]. Pending and completed sets
//! live behind a single mutex; callers mutate through [`TransactionStore::update`]
//! and never see the maps. Each committed change is written to the journal
//! while the lock is held, so journal order matches in-memory order.
//!
//! A transaction that reaches a terminal status is moved to the completed set
//! inside the same update that made it terminal.
//!
//! Events that record an on-chain artifact (a source commit, a destination
//! release, a refund) must reach the journal: losing one would let a restart
//! repeat the chain call. Those writes are retried with backoff, and a final
//! failure parks the transaction in ADMIN_REVIEW.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertDispatcher, Severity};
use crate::error::{BridgeError, JournalError, Result, ValidationError};
use crate::metrics;
use crate::transaction::BridgeTransaction;
use crate::types::Status;

const MUST_PERSIST: [&str; 3] = ["source_committed", "destination_released", "refunded"];
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

/// Durable record of transaction changes
#[async_trait]
pub trait TransactionJournal: Send + Sync {
    /// Persist the current state of `tx` and append `event` to its history
    async fn record(&self, tx: &BridgeTransaction, event: &str) -> Result<(), JournalError>;

    /// Every transaction that had not reached a terminal status
    async fn load_open(&self) -> Result<Vec<BridgeTransaction>, JournalError>;
}

#[derive(Default)]
struct Sets {
    pending: HashMap<String, BridgeTransaction>,
    completed: HashMap<String, BridgeTransaction>,
}

/// Guard for the per-transaction flight lock
pub type FlightLock = Arc<Mutex<()>>;

/// What [`TransactionStore::restore`] brought back
#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub restored: usize,
    /// Interrupted mid-recovery with no retries left; now in ADMIN_REVIEW
    pub escalated: Vec<BridgeTransaction>,
}

pub struct TransactionStore {
    sets: Mutex<Sets>,
    flights: std::sync::Mutex<HashMap<String, FlightLock>>,
    journal: Arc<dyn TransactionJournal>,
    alerts: Option<Arc<AlertDispatcher>>,
}

impl TransactionStore {
    pub fn new(journal: Arc<dyn TransactionJournal>) -> Self {
        Self {
            sets: Mutex::new(Sets::default()),
            flights: std::sync::Mutex::new(HashMap::new()),
            journal,
            alerts: None,
        }
    }

    /// Page through `alerts` when an on-chain artifact cannot be journaled
    pub fn with_alerts(mut self, alerts: Arc<AlertDispatcher>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Reload open transactions from the journal.
    ///
    /// A transaction left RECOVERING was interrupted mid-attempt. It resumes as
    /// STUCK so the recovery engine picks it up again, unless that attempt was
    /// its last one, in which case it goes to ADMIN_REVIEW.
    pub async fn restore(&self) -> Result<RestoreSummary, JournalError> {
        let open = self.journal.load_open().await?;
        let mut sets = self.sets.lock().await;
        let mut summary = RestoreSummary::default();
        for mut tx in open {
            if tx.is_terminal() {
                continue;
            }
            if tx.status == Status::Recovering {
                if tx.retries_exhausted() {
                    warn!(
                        tx_id = %tx.id,
                        attempts = tx.retry_count,
                        "Transaction interrupted on its last recovery attempt, escalating"
                    );
                    tx.status = Status::AdminReview;
                    tx.error = Some(format!(
                        "interrupted during recovery attempt {} of {}",
                        tx.retry_count, tx.max_retries
                    ));
                    self.journal.record(&tx, "restored_admin_review").await?;
                    summary.escalated.push(tx.clone());
                } else {
                    warn!(tx_id = %tx.id, "Transaction interrupted while recovering, marking stuck");
                    tx.status = Status::Stuck;
                    self.journal.record(&tx, "restored_stuck").await?;
                }
            }
            sets.pending.insert(tx.id.clone(), tx);
            summary.restored += 1;
        }
        info!(
            count = summary.restored,
            escalated = summary.escalated.len(),
            "Restored open transactions from journal"
        );
        Ok(summary)
    }

    /// Add a new transaction to the pending set. Fails if it cannot be journaled.
    pub async fn insert(&self, tx: BridgeTransaction) -> Result<()> {
        self.insert_within(tx, usize::MAX).await
    }

    /// Like [`TransactionStore::insert`], but refuses once `limit` transactions
    /// are pending. The count is taken under the store lock, so concurrent
    /// callers cannot overshoot it.
    pub async fn insert_within(&self, tx: BridgeTransaction, limit: usize) -> Result<()> {
        let mut sets = self.sets.lock().await;
        if sets.pending.len() >= limit {
            self.drop_flight(&tx.id);
            return Err(ValidationError::Backpressure {
                pending: sets.pending.len(),
                limit,
            }
            .into());
        }
        if let Err(e) = self.journal.record(&tx, "created").await {
            metrics::record_journal_error("created");
            self.drop_flight(&tx.id);
            return Err(e.into());
        }
        debug!(tx_id = %tx.id, "Transaction stored");
        sets.pending.insert(tx.id.clone(), tx);
        Ok(())
    }

    /// Apply `f` to a pending transaction.
    ///
    /// `f` runs on a copy; the copy replaces the stored record only when `f`
    /// returns Ok. A journal failure does not undo the change, since it usually
    /// follows an on-chain step that already happened. For ordinary events it
    /// is logged and counted. For artifact events it is retried, and if the
    /// write still fails the transaction is parked in ADMIN_REVIEW and
    /// [`BridgeError::Unpersisted`] is returned.
    pub async fn update<F, R>(&self, tx_id: &str, event: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut BridgeTransaction) -> Result<R>,
    {
        let mut sets = self.sets.lock().await;
        let current = match sets.pending.get(tx_id) {
            Some(tx) => tx,
            None if sets.completed.contains_key(tx_id) => {
                let tx = &sets.completed[tx_id];
                return Err(BridgeError::InvalidTransition {
                    tx_id: tx_id.to_string(),
                    from: tx.status,
                    to: tx.status,
                });
            }
            None => return Err(BridgeError::NotFound(tx_id.to_string())),
        };

        let mut next = current.clone();
        let out = f(&mut next)?;

        if let Err(e) = self.journal_change(&next, event).await {
            if !MUST_PERSIST.contains(&event) {
                error!(tx_id, event, error = %e, "Failed to journal transaction change");
            } else {
                error!(
                    tx_id,
                    event,
                    error = %e,
                    "On-chain artifact could not be journaled, parking for admin review"
                );
                next.status = Status::AdminReview;
                next.error = Some(format!("{} could not be journaled: {}", event, e));
                // Best effort: the journal may already be back
                if self.journal.record(&next, "unpersisted").await.is_err() {
                    metrics::record_journal_error("unpersisted");
                }
                sets.pending.insert(tx_id.to_string(), next.clone());
                drop(sets);
                self.page_unpersisted(&next, event, &e).await;
                return Err(BridgeError::Unpersisted {
                    tx_id: tx_id.to_string(),
                    event: event.to_string(),
                });
            }
        }

        if next.is_terminal() {
            sets.pending.remove(tx_id);
            info!(tx_id, status = %next.status, "Transaction archived");
            sets.completed.insert(tx_id.to_string(), next);
            self.drop_flight(tx_id);
        } else {
            sets.pending.insert(tx_id.to_string(), next);
        }
        Ok(out)
    }

    /// Write one change, retrying artifact events with doubling backoff.
    /// Called with the store lock held, so later changes queue behind it.
    async fn journal_change(&self, tx: &BridgeTransaction, event: &str) -> Result<(), JournalError> {
        let attempts = if MUST_PERSIST.contains(&event) {
            PERSIST_ATTEMPTS
        } else {
            1
        };
        let mut backoff = PERSIST_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.journal.record(tx, event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    metrics::record_journal_error(event);
                    if attempt >= attempts {
                        return Err(e);
                    }
                    warn!(
                        tx_id = %tx.id,
                        event,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Journal write failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }

    async fn page_unpersisted(&self, tx: &BridgeTransaction, event: &str, err: &JournalError) {
        let Some(alerts) = &self.alerts else {
            return;
        };
        alerts
            .raise(
                &format!("unpersisted:{}", tx.id),
                Severity::Critical,
                &format!(
                    "Bridge transaction {} has an on-chain {} that could not be journaled",
                    tx.id, event
                ),
                json!({
                    "tx_id": tx.id,
                    "event": event,
                    "source_tx_hash": tx.source_tx_hash,
                    "dest_tx_hash": tx.dest_tx_hash,
                    "refund_tx_hash": tx.refund_tx_hash,
                    "error": err.to_string(),
                }),
            )
            .await;
    }

    pub async fn get(&self, tx_id: &str) -> Option<BridgeTransaction> {
        let sets = self.sets.lock().await;
        sets.pending
            .get(tx_id)
            .or_else(|| sets.completed.get(tx_id))
            .cloned()
    }

    pub async fn is_pending(&self, tx_id: &str) -> bool {
        self.sets.lock().await.pending.contains_key(tx_id)
    }

    pub async fn pending(&self) -> Vec<BridgeTransaction> {
        self.sets.lock().await.pending.values().cloned().collect()
    }

    pub async fn completed(&self) -> Vec<BridgeTransaction> {
        self.sets.lock().await.completed.values().cloned().collect()
    }

    /// Ids of pending transactions currently in one of `statuses`
    pub async fn pending_ids_with(&self, statuses: &[Status]) -> Vec<String> {
        let sets = self.sets.lock().await;
        let mut ids: Vec<(chrono::DateTime<chrono::Utc>, String)> = sets
            .pending
            .values()
            .filter(|tx| statuses.contains(&tx.status))
            .map(|tx| (tx.created_at, tx.id.clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// (pending, completed) set sizes
    pub async fn counts(&self) -> (usize, usize) {
        let sets = self.sets.lock().await;
        (sets.pending.len(), sets.completed.len())
    }

    /// The flight lock for `tx_id`. Whoever holds it owns the transaction's
    /// on-chain steps. Creates the entry; use [`TransactionStore::pending_flight`]
    /// for ids that came from outside.
    pub fn flight(&self, tx_id: &str) -> FlightLock {
        let mut flights = match self.flights.lock() {
            Ok(flights) => flights,
            Err(poisoned) => poisoned.into_inner(),
        };
        flights
            .entry(tx_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The flight lock for a pending transaction; None for archived or
    /// unknown ids, which never get an entry.
    pub async fn pending_flight(&self, tx_id: &str) -> Option<FlightLock> {
        let sets = self.sets.lock().await;
        if !sets.pending.contains_key(tx_id) {
            return None;
        }
        Some(self.flight(tx_id))
    }

    fn drop_flight(&self, tx_id: &str) {
        let mut flights = match self.flights.lock() {
            Ok(flights) => flights,
            Err(poisoned) => poisoned.into_inner(),
        };
        flights.remove(tx_id);
    }

    #[cfg(test)]
    pub(crate) fn flight_count(&self) -> usize {
        match self.flights.lock() {
            Ok(flights) => flights.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
