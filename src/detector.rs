//! Stuck transaction detector
//!
//! Each scan looks at PENDING and LOCKED transactions and marks the ones past
//! their timeout as STUCK so the recovery engine can pick them up. A
//! transaction whose flight lock is held is still being driven by its initiate
//! call and is left alone until the next scan.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDispatcher, Severity};
use crate::metrics;
use crate::store::TransactionStore;
use crate::types::Status;

const BACKPRESSURE_KEY: &str = "backpressure";

/// What one scan did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DetectionReport {
    pub scanned: usize,
    pub newly_stuck: Vec<String>,
    /// Past timeout but busy, so not marked this round
    pub busy: Vec<String>,
}

pub struct StuckTransactionDetector {
    store: Arc<TransactionStore>,
    alerts: Arc<AlertDispatcher>,
    max_stuck_transactions: usize,
    max_pending_transactions: usize,
}

impl StuckTransactionDetector {
    pub fn new(
        store: Arc<TransactionStore>,
        alerts: Arc<AlertDispatcher>,
        max_stuck_transactions: usize,
        max_pending_transactions: usize,
    ) -> Self {
        Self {
            store,
            alerts,
            max_stuck_transactions,
            max_pending_transactions,
        }
    }

    pub async fn scan(&self, now: DateTime<Utc>) -> DetectionReport {
        let mut report = DetectionReport::default();
        let candidates = self
            .store
            .pending_ids_with(&[Status::Pending, Status::Locked])
            .await;
        report.scanned = candidates.len();

        for tx_id in candidates {
            let Some(tx) = self.store.get(&tx_id).await else {
                continue;
            };
            if !tx.is_stuck(now) {
                continue;
            }

            let Some(flight) = self.store.pending_flight(&tx_id).await else {
                continue;
            };
            let Ok(_guard) = flight.try_lock() else {
                warn!(
                    tx_id = %tx_id,
                    status = %tx.status,
                    age_minutes = tx.age_minutes(now),
                    "Transaction past timeout is still in flight"
                );
                report.busy.push(tx_id);
                continue;
            };

            let marked = self
                .store
                .update(&tx_id, "stuck_detected", |t| {
                    // Status may have moved between the listing and the lock
                    if !matches!(t.status, Status::Pending | Status::Locked) {
                        return Ok(None);
                    }
                    t.advance(Status::Stuck)?;
                    t.stuck_detection_time = Some(now);
                    let first_alert = !t.alert_sent;
                    t.alert_sent = true;
                    Ok(Some((t.clone(), first_alert)))
                })
                .await;

            let (tx, first_alert) = match marked {
                Ok(Some(marked)) => marked,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tx_id = %tx_id, error = %e, "Failed to mark transaction stuck");
                    continue;
                }
            };

            warn!(
                tx_id = %tx.id,
                direction = %tx.direction,
                age_minutes = tx.age_minutes(now),
                source_tx_hash = ?tx.source_tx_hash,
                "Stuck transaction detected"
            );
            if first_alert {
                self.alerts
                    .raise(
                        &format!("stuck:{}", tx.id),
                        Severity::Critical,
                        &format!("Bridge transaction {} is stuck", tx.id),
                        json!({
                            "tx_id": tx.id,
                            "direction": tx.direction.as_str(),
                            "amount": tx.amount.to_string(),
                            "age_minutes": tx.age_minutes(now),
                            "source_tx_hash": tx.source_tx_hash,
                            "error": tx.error,
                        }),
                    )
                    .await;
            }
            report.newly_stuck.push(tx.id);
        }

        if report.newly_stuck.len() > self.max_stuck_transactions {
            self.alerts
                .raise(
                    &format!("stuck:aggregate:{}", now.timestamp()),
                    Severity::Critical,
                    &format!(
                        "{} transactions became stuck in one scan",
                        report.newly_stuck.len()
                    ),
                    json!({
                        "count": report.newly_stuck.len(),
                        "threshold": self.max_stuck_transactions,
                        "transactions": &report.newly_stuck,
                    }),
                )
                .await;
        }

        self.check_backlog().await;

        if report.newly_stuck.is_empty() {
            debug!(scanned = report.scanned, "Stuck scan complete");
        } else {
            info!(
                scanned = report.scanned,
                newly_stuck = report.newly_stuck.len(),
                "Stuck scan complete"
            );
        }
        report
    }

    async fn check_backlog(&self) {
        let pending = self.store.pending().await;
        let stuck = pending
            .iter()
            .filter(|tx| matches!(tx.status, Status::Stuck | Status::AdminReview))
            .count();
        metrics::set_queue_sizes(pending.len(), stuck);

        if pending.len() >= self.max_pending_transactions {
            self.alerts
                .raise(
                    BACKPRESSURE_KEY,
                    Severity::Warning,
                    "Pending transaction backlog at capacity, new transfers are rejected",
                    json!({
                        "pending": pending.len(),
                        "limit": self.max_pending_transactions,
                    }),
                )
                .await;
        } else {
            self.alerts.resolve(BACKPRESSURE_KEY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_transaction, MemoryJournal, RecordingAlertSink};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    struct Fixture {
        store: Arc<TransactionStore>,
        sink: Arc<RecordingAlertSink>,
        detector: StuckTransactionDetector,
    }

    fn fixture(max_stuck: usize, max_pending: usize) -> Fixture {
        let store = Arc::new(TransactionStore::new(Arc::new(MemoryJournal::default())));
        let sink = Arc::new(RecordingAlertSink::default());
        let alerts = Arc::new(AlertDispatcher::new(sink.clone(), Duration::from_secs(3600)));
        let detector =
            StuckTransactionDetector::new(store.clone(), alerts, max_stuck, max_pending);
        Fixture {
            store,
            sink,
            detector,
        }
    }

    #[tokio::test]
    async fn test_marks_timed_out_transaction_once() {
        let f = fixture(5, 100);
        let created = Utc::now();
        f.store
            .insert(sample_transaction("eth_sol_1", created))
            .await
            .unwrap();

        let early = f.detector.scan(created + ChronoDuration::minutes(30)).await;
        assert!(early.newly_stuck.is_empty());

        let later = created + ChronoDuration::minutes(61);
        let report = f.detector.scan(later).await;
        assert_eq!(report.newly_stuck, vec!["eth_sol_1".to_string()]);
        let tx = f.store.get("eth_sol_1").await.unwrap();
        assert_eq!(tx.status, Status::Stuck);
        assert_eq!(tx.stuck_detection_time, Some(later));
        assert!(tx.alert_sent);

        // Already stuck: a second scan is a no-op
        let again = f.detector.scan(later + ChronoDuration::minutes(5)).await;
        assert!(again.newly_stuck.is_empty());
        assert_eq!(f.sink.count_containing("is stuck"), 1);
    }

    #[tokio::test]
    async fn test_skips_transaction_in_flight() {
        let f = fixture(5, 100);
        let created = Utc::now();
        f.store
            .insert(sample_transaction("eth_sol_1", created))
            .await
            .unwrap();
        let flight = f.store.flight("eth_sol_1");
        let _held = flight.lock().await;

        let report = f.detector.scan(created + ChronoDuration::minutes(61)).await;
        assert!(report.newly_stuck.is_empty());
        assert_eq!(report.busy, vec!["eth_sol_1".to_string()]);
        assert_eq!(
            f.store.get("eth_sol_1").await.unwrap().status,
            Status::Pending
        );
    }

    #[tokio::test]
    async fn test_aggregate_alert_above_threshold() {
        let f = fixture(1, 100);
        let created = Utc::now();
        for i in 0..3 {
            f.store
                .insert(sample_transaction(&format!("eth_sol_{}", i), created))
                .await
                .unwrap();
        }
        let report = f.detector.scan(created + ChronoDuration::minutes(61)).await;
        assert_eq!(report.newly_stuck.len(), 3);
        assert_eq!(f.sink.count_containing("is stuck"), 3);
        assert_eq!(f.sink.count_containing("became stuck in one scan"), 1);
    }

    #[tokio::test]
    async fn test_backpressure_alert_is_deduped() {
        let f = fixture(5, 1);
        let now = Utc::now();
        f.store
            .insert(sample_transaction("eth_sol_1", now))
            .await
            .unwrap();
        f.detector.scan(now).await;
        f.detector.scan(now).await;
        assert_eq!(f.sink.count_containing("backlog"), 1);
    }
}
