//! Bridge service: component wiring, the command surface and background loops
//!
//! Everything is constructed explicitly in [`BridgeService::new`]; there is no
//! global instance. [`BridgeService::run`] drives the stuck detector, the
//! recovery engine and the health monitor on their own intervals until the
//! shutdown channel fires. A cycle that has started always finishes.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::alerts::{AlertDispatcher, AlertSink};
use crate::chain::ChainPair;
use crate::config::{BridgeParams, MonitorConfig};
use crate::detector::StuckTransactionDetector;
use crate::error::{BridgeError, Result};
use crate::health::{HealthMonitor, HealthStatus};
use crate::liquidity::{LiquidityManager, LiquiditySnapshot};
use crate::metrics;
use crate::orchestrator::TransferOrchestrator;
use crate::overrides::{ElevatedGrant, OverrideAction, OverrideController, OverrideGate};
use crate::recovery::{RecoveryEngine, RecoveryOutcome};
use crate::store::{TransactionJournal, TransactionStore};
use crate::transaction::BridgeTransaction;
use crate::types::{Direction, Status};
use crate::validators::{SignatureCollector, ValidatorEntry};

/// Everything the service needs besides its collaborators
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub bridge: BridgeParams,
    pub monitor: MonitorConfig,
    pub admin_override_token: Option<String>,
    pub alert_dedupe_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bridge: BridgeParams::default(),
            monitor: MonitorConfig::default(),
            admin_override_token: None,
            alert_dedupe_ttl: Duration::from_secs(3600),
        }
    }
}

/// A transaction plus derived timing fields
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    #[serde(flatten)]
    pub transaction: BridgeTransaction,
    pub age_minutes: f64,
    pub time_remaining_minutes: i64,
    pub is_stuck: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub total_pending: usize,
    pub total_completed: usize,
    pub stuck_transactions: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Gross amount of transfers that reached MINTED or RELEASED
    pub total_volume: BigDecimal,
    pub total_fees: BigDecimal,
    pub validators: usize,
    pub min_validators: usize,
    pub is_healthy: bool,
    pub paused: bool,
    pub fee_percentage: BigDecimal,
    pub liquidity: LiquiditySnapshot,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StuckTransactionView {
    pub id: String,
    pub direction: Direction,
    pub amount: BigDecimal,
    pub status: Status,
    pub age_minutes: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub stuck_detection_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub admin_override: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryDashboard {
    pub total_stuck: usize,
    pub stuck_by_direction: BTreeMap<String, usize>,
    pub requiring_admin_review: usize,
    pub total_stuck_value: BigDecimal,
    pub stuck_transactions: Vec<StuckTransactionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub health: HealthStatus,
    pub stats: BridgeStats,
    pub recovery: RecoveryDashboard,
    pub recommendations: Vec<String>,
}

pub struct BridgeService {
    settings: ServiceSettings,
    store: Arc<TransactionStore>,
    collector: Arc<SignatureCollector>,
    liquidity: Arc<LiquidityManager>,
    alerts: Arc<AlertDispatcher>,
    health: Arc<HealthMonitor>,
    orchestrator: Arc<TransferOrchestrator>,
    detector: Arc<StuckTransactionDetector>,
    recovery: Arc<RecoveryEngine>,
    overrides: Arc<OverrideController>,
    started_at: DateTime<Utc>,
}

impl BridgeService {
    pub fn new(
        settings: ServiceSettings,
        chains: ChainPair,
        validators: Vec<ValidatorEntry>,
        journal: Arc<dyn TransactionJournal>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let params = settings.bridge.clone();
        let alerts = Arc::new(AlertDispatcher::new(sink, settings.alert_dedupe_ttl));
        let store = Arc::new(TransactionStore::new(journal).with_alerts(alerts.clone()));
        let collector = Arc::new(SignatureCollector::new(
            validators,
            params.min_validators,
            params.signature_window,
        ));
        let liquidity = Arc::new(LiquidityManager::new(
            chains.clone(),
            params.rebalance_threshold.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(
            chains.clone(),
            collector.clone(),
            liquidity.clone(),
            alerts.clone(),
            params.critical_liquidity_ratio.clone(),
        ));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            store.clone(),
            chains.clone(),
            collector.clone(),
            liquidity.clone(),
            health.clone(),
            params.clone(),
        ));
        let detector = Arc::new(StuckTransactionDetector::new(
            store.clone(),
            alerts.clone(),
            params.max_stuck_transactions,
            params.max_pending_transactions,
        ));
        let recovery = Arc::new(RecoveryEngine::new(
            store.clone(),
            orchestrator.clone(),
            alerts.clone(),
        ));
        let overrides = Arc::new(OverrideController::new(
            store.clone(),
            orchestrator.clone(),
            chains,
            collector.clone(),
            liquidity.clone(),
            alerts.clone(),
            OverrideGate::new(settings.admin_override_token.as_deref()),
        ));

        Self {
            settings,
            store,
            collector,
            liquidity,
            alerts,
            health,
            orchestrator,
            detector,
            recovery,
            overrides,
            started_at: Utc::now(),
        }
    }

    pub fn store(&self) -> &Arc<TransactionStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    pub fn detector(&self) -> &Arc<StuckTransactionDetector> {
        &self.detector
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn liquidity(&self) -> &Arc<LiquidityManager> {
        &self.liquidity
    }

    pub fn overrides(&self) -> &Arc<OverrideController> {
        &self.overrides
    }

    pub fn alerts(&self) -> &Arc<AlertDispatcher> {
        &self.alerts
    }

    /// Restore journaled transactions, load reserves and run the first health
    /// check. Refuses to start without enough validators for a quorum.
    pub async fn initialize(&self) -> Result<HealthStatus> {
        if !self.collector.validators_sufficient() {
            error!(
                configured = self.collector.validator_count(),
                required = self.collector.min_validators(),
                "Not enough validators for a quorum"
            );
            return Err(BridgeError::InsufficientValidators {
                configured: self.collector.validator_count(),
                required: self.collector.min_validators(),
            });
        }

        let restored = self.store.restore().await?;
        for tx in &restored.escalated {
            self.recovery.notify_escalation(tx).await;
        }
        if let Err(e) = self.liquidity.update_liquidity().await {
            warn!(error = %e, "Initial liquidity load failed");
        }
        let status = self.health.check().await;
        metrics::UP.set(1.0);
        info!(
            validators = self.collector.validator_count(),
            min_validators = self.collector.min_validators(),
            restored = restored.restored,
            escalated = restored.escalated.len(),
            healthy = status.is_healthy,
            "Bridge initialized"
        );
        Ok(status)
    }

    pub async fn initiate_bridge(
        &self,
        direction: Direction,
        amount: BigDecimal,
        from_address: &str,
        to_address: &str,
    ) -> Result<String> {
        self.orchestrator
            .initiate(direction, amount, from_address, to_address)
            .await
    }

    pub async fn check_transaction(&self, tx_id: &str) -> Result<TransactionSnapshot> {
        let tx = self
            .store
            .get(tx_id)
            .await
            .ok_or_else(|| BridgeError::NotFound(tx_id.to_string()))?;
        let now = Utc::now();
        Ok(TransactionSnapshot {
            age_minutes: tx.age_minutes(now),
            time_remaining_minutes: tx.time_remaining_minutes(now),
            is_stuck: tx.is_stuck(now),
            transaction: tx,
        })
    }

    pub async fn force_recovery(&self, tx_id: &str) -> Result<RecoveryOutcome> {
        self.recovery.force_recovery(tx_id).await
    }

    pub async fn get_stats(&self) -> BridgeStats {
        let now = Utc::now();
        let pending = self.store.pending().await;
        let completed = self.store.completed().await;

        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for tx in pending.iter().chain(completed.iter()) {
            *by_status.entry(tx.status.as_str().to_string()).or_default() += 1;
        }

        let delivered = completed
            .iter()
            .filter(|tx| matches!(tx.status, Status::Minted | Status::Released));
        let mut total_volume = BigDecimal::from(0);
        let mut total_fees = BigDecimal::from(0);
        for tx in delivered {
            total_volume += &tx.amount;
            total_fees += &tx.fee;
        }

        let stuck_transactions = pending
            .iter()
            .filter(|tx| {
                tx.is_stuck(now) || matches!(tx.status, Status::Stuck | Status::AdminReview)
            })
            .count();

        BridgeStats {
            total_pending: pending.len(),
            total_completed: completed.len(),
            stuck_transactions,
            by_status,
            total_volume,
            total_fees,
            validators: self.collector.validator_count(),
            min_validators: self.collector.min_validators(),
            is_healthy: self.health.is_healthy(),
            paused: self.health.is_paused(),
            fee_percentage: self.settings.bridge.fee_percentage.clone(),
            liquidity: self.liquidity.snapshot().await,
            uptime_seconds: (now - self.started_at).num_seconds(),
        }
    }

    pub async fn get_recovery_dashboard(&self) -> RecoveryDashboard {
        let now = Utc::now();
        let mut stuck: Vec<BridgeTransaction> = self
            .store
            .pending()
            .await
            .into_iter()
            .filter(|tx| matches!(tx.status, Status::Stuck | Status::AdminReview))
            .collect();
        stuck.sort_by_key(|tx| tx.created_at);

        let mut stuck_by_direction = BTreeMap::new();
        for direction in [Direction::EthToSol, Direction::SolToEth] {
            stuck_by_direction.insert(
                direction.as_str().to_string(),
                stuck.iter().filter(|tx| tx.direction == direction).count(),
            );
        }
        let mut total_stuck_value = BigDecimal::from(0);
        for tx in &stuck {
            total_stuck_value += &tx.amount;
        }

        RecoveryDashboard {
            total_stuck: stuck.len(),
            stuck_by_direction,
            requiring_admin_review: stuck
                .iter()
                .filter(|tx| tx.status == Status::AdminReview)
                .count(),
            total_stuck_value,
            stuck_transactions: stuck
                .into_iter()
                .map(|tx| StuckTransactionView {
                    age_minutes: tx.age_minutes(now),
                    id: tx.id,
                    direction: tx.direction,
                    amount: tx.amount,
                    status: tx.status,
                    retry_count: tx.retry_count,
                    max_retries: tx.max_retries,
                    stuck_detection_time: tx.stuck_detection_time,
                    error: tx.error,
                    admin_override: tx.admin_override,
                })
                .collect(),
        }
    }

    pub fn pause(&self) {
        self.health.pause();
    }

    pub async fn resume(&self) -> Result<HealthStatus> {
        self.health.resume().await
    }

    /// Exchange the admin override token for a grant
    pub fn elevate(&self, token: &str) -> Result<ElevatedGrant> {
        self.overrides.gate().elevate(token)
    }

    pub async fn override_transaction(
        &self,
        tx_id: &str,
        action: OverrideAction,
        reason: &str,
        grant: Option<&ElevatedGrant>,
    ) -> Result<BridgeTransaction> {
        self.overrides
            .override_transaction(tx_id, action, reason, grant)
            .await
    }

    /// Health, stats and recovery state plus operator recommendations
    pub async fn health_report(&self) -> HealthReport {
        let health = self.health.status();
        let stats = self.get_stats().await;
        let recovery = self.get_recovery_dashboard().await;
        let recommendations = recommendations(&health, &recovery);
        HealthReport {
            health,
            stats,
            recovery,
            recommendations,
        }
    }

    /// Run the background loops until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            monitor_secs = self.settings.monitor.monitor_interval.as_secs(),
            recovery_secs = self.settings.monitor.recovery_interval.as_secs(),
            health_secs = self.settings.monitor.health_check_interval.as_secs(),
            "Starting bridge loops"
        );

        let detector = {
            let service = self.clone();
            let mut shutdown = shutdown.clone();
            async move {
                let interval = service.settings.monitor.monitor_interval;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Stuck detector stopping");
                            break;
                        }
                        _ = tokio::time::sleep(interval) => {
                            service.detector.scan(Utc::now()).await;
                        }
                    }
                }
            }
        };

        let recovery = {
            let service = self.clone();
            let mut shutdown = shutdown.clone();
            async move {
                let interval = service.settings.monitor.recovery_interval;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Recovery engine stopping");
                            break;
                        }
                        _ = tokio::time::sleep(interval) => {
                            service.recovery.run_cycle().await;
                        }
                    }
                }
            }
        };

        let health = {
            let service = self.clone();
            let mut shutdown = shutdown;
            async move {
                let interval = service.settings.monitor.health_check_interval;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Health monitor stopping");
                            break;
                        }
                        _ = tokio::time::sleep(interval) => {
                            service.health.check().await;
                        }
                    }
                }
            }
        };

        tokio::join!(detector, recovery, health);
        metrics::UP.set(0.0);
        info!("Bridge loops stopped");
    }
}

fn recommendations(health: &HealthStatus, recovery: &RecoveryDashboard) -> Vec<String> {
    let mut out = Vec::new();
    if !health.is_healthy {
        out.push("CRITICAL: Bridge is unhealthy - investigate immediately".to_string());
    }
    if recovery.total_stuck > 0 {
        out.push(format!(
            "ACTION: {} stuck transactions need attention",
            recovery.total_stuck
        ));
    }
    if recovery.requiring_admin_review > 0 {
        out.push(format!(
            "ADMIN: {} transactions require manual review",
            recovery.requiring_admin_review
        ));
    }
    if let Some(ratio) = &health.liquidity_ratio {
        if !health.liquidity_balanced {
            let percent = (ratio * BigDecimal::from(100)).with_scale(1);
            out.push(format!(
                "WARNING: Low liquidity ratio ({}%) - rebalance recommended",
                percent
            ));
        }
    }
    if health.rebalance_unconfirmed {
        out.push(
            "NOTE: Reserves were rebalanced in bookkeeping only - move funds on-chain and wait for a reserve refresh"
                .to_string(),
        );
    }
    if !health.ethereum_connected {
        out.push("ERROR: Ethereum client disconnected".to_string());
    }
    if !health.solana_connected {
        out.push("ERROR: Solana client disconnected".to_string());
    }
    if out.is_empty() {
        out.push("OK: Bridge operating normally".to_string());
    }
    out
}
