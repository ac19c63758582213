//! Bridge health monitor
//!
//! Probes both chains, checks the validator set and the liquidity ratio, and
//! owns the pause switch. `is_healthy` gates new transfers; a paused bridge is
//! never healthy.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::alerts::{AlertDispatcher, Severity};
use crate::chain::ChainPair;
use crate::error::{BridgeError, Result};
use crate::liquidity::{LiquidityManager, RebalanceOutcome};
use crate::metrics;
use crate::validators::SignatureCollector;

const CRITICAL_LIQUIDITY_KEY: &str = "liquidity:critical";
const UNHEALTHY_KEY: &str = "health:unhealthy";

/// Result of the most recent health check
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStatus {
    pub ethereum_connected: bool,
    pub solana_connected: bool,
    pub validators_sufficient: bool,
    pub liquidity_balanced: bool,
    pub liquidity_ratio: Option<BigDecimal>,
    /// Last rebalance exists only in bookkeeping so far
    pub rebalance_unconfirmed: bool,
    pub paused: bool,
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
}

pub struct HealthMonitor {
    chains: ChainPair,
    collector: Arc<SignatureCollector>,
    liquidity: Arc<LiquidityManager>,
    alerts: Arc<AlertDispatcher>,
    critical_liquidity_ratio: BigDecimal,
    status: RwLock<HealthStatus>,
    paused: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        chains: ChainPair,
        collector: Arc<SignatureCollector>,
        liquidity: Arc<LiquidityManager>,
        alerts: Arc<AlertDispatcher>,
        critical_liquidity_ratio: BigDecimal,
    ) -> Self {
        Self {
            chains,
            collector,
            liquidity,
            alerts,
            critical_liquidity_ratio,
            status: RwLock::new(HealthStatus::default()),
            paused: AtomicBool::new(false),
        }
    }

    /// Run one full health check and publish the result
    pub async fn check(&self) -> HealthStatus {
        let (ethereum_connected, solana_connected) = tokio::join!(
            self.chains.ethereum().is_connected(),
            self.chains.solana().is_connected()
        );
        let validators_sufficient = self.collector.validators_sufficient();

        self.check_liquidity().await;
        let liquidity_ratio = self.liquidity.check_ratio().await;
        let liquidity_balanced = self.liquidity.is_balanced(liquidity_ratio.as_ref());
        let rebalance_unconfirmed = self.liquidity.awaiting_confirmation().await;

        let paused = self.is_paused();
        let is_healthy = ethereum_connected && solana_connected && validators_sufficient && !paused;

        let status = HealthStatus {
            ethereum_connected,
            solana_connected,
            validators_sufficient,
            liquidity_balanced,
            liquidity_ratio,
            rebalance_unconfirmed,
            paused,
            is_healthy,
            last_check: Some(Utc::now()),
        };
        metrics::set_health(ethereum_connected, solana_connected, is_healthy);

        if is_healthy {
            self.alerts.resolve(UNHEALTHY_KEY);
        } else {
            warn!(
                ethereum_connected,
                solana_connected, validators_sufficient, paused, "Bridge unhealthy"
            );
            // A deliberate pause is not worth paging for
            if !paused {
                self.alerts
                    .raise(
                        UNHEALTHY_KEY,
                        Severity::Critical,
                        "Bridge is unhealthy",
                        json!({
                            "ethereum_connected": ethereum_connected,
                            "solana_connected": solana_connected,
                            "validators_sufficient": validators_sufficient,
                            "validators": self.collector.validator_count(),
                            "min_validators": self.collector.min_validators(),
                        }),
                    )
                    .await;
            }
        }

        self.store(status.clone());
        status
    }

    /// Rebalance and page when the ratio falls under the critical level.
    /// The page stays live until a refresh confirms a healthy ratio.
    async fn check_liquidity(&self) {
        let Some(ratio) = self.liquidity.check_ratio().await else {
            return;
        };
        if ratio >= self.critical_liquidity_ratio {
            if self.liquidity.awaiting_confirmation().await {
                debug!(%ratio, "Liquidity ratio restored in bookkeeping only, awaiting refresh");
            } else {
                self.alerts.resolve(CRITICAL_LIQUIDITY_KEY);
            }
            return;
        }

        warn!(%ratio, critical = %self.critical_liquidity_ratio, "Liquidity ratio critical");
        let outcome = self.liquidity.rebalance().await;
        let rebalanced = matches!(outcome, RebalanceOutcome::Rebalanced { .. });
        self.alerts
            .raise(
                CRITICAL_LIQUIDITY_KEY,
                Severity::Critical,
                "Liquidity ratio below critical level",
                json!({
                    "ratio": ratio.to_string(),
                    "critical_ratio": self.critical_liquidity_ratio.to_string(),
                    "rebalanced": rebalanced,
                }),
            )
            .await;
    }

    fn store(&self, status: HealthStatus) {
        match self.status.write() {
            Ok(mut current) => *current = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }

    /// Last published health status
    pub fn status(&self) -> HealthStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.is_paused() && self.status().is_healthy
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stop accepting new transfers until [`HealthMonitor::resume`]
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let mut status = self.status();
        status.paused = true;
        status.is_healthy = false;
        self.store(status);
        metrics::HEALTHY.set(0.0);
        warn!("Bridge paused");
    }

    /// Clear the pause, but only if both chains answer right now
    pub async fn resume(&self) -> Result<HealthStatus> {
        let (ethereum_connected, solana_connected) = tokio::join!(
            self.chains.ethereum().is_connected(),
            self.chains.solana().is_connected()
        );
        if !(ethereum_connected && solana_connected) {
            warn!(ethereum_connected, solana_connected, "Resume refused");
            return Err(BridgeError::ResumeBlocked {
                ethereum_connected,
                solana_connected,
            });
        }
        self.paused.store(false, Ordering::SeqCst);
        info!("Bridge resumed");
        Ok(self.check().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainKind;
    use crate::testing::{local_validator_set, MockChainClient, RecordingAlertSink};
    use std::str::FromStr;
    use std::time::Duration;

    struct Fixture {
        eth: Arc<MockChainClient>,
        sink: Arc<RecordingAlertSink>,
        liquidity: Arc<LiquidityManager>,
        monitor: HealthMonitor,
    }

    fn fixture(validators: usize) -> Fixture {
        let eth = Arc::new(MockChainClient::new(ChainKind::Ethereum));
        let sol = Arc::new(MockChainClient::new(ChainKind::Solana));
        eth.set_balance(BigDecimal::from(100));
        sol.set_balance(BigDecimal::from(100));
        let chains = ChainPair::new(eth.clone(), sol, "eth-reserve", "sol-reserve");
        let collector = Arc::new(SignatureCollector::new(
            local_validator_set(validators),
            3,
            Duration::from_secs(1),
        ));
        let liquidity = Arc::new(LiquidityManager::new(
            chains.clone(),
            BigDecimal::from_str("0.3").unwrap(),
        ));
        let sink = Arc::new(RecordingAlertSink::default());
        let alerts = Arc::new(AlertDispatcher::new(sink.clone(), Duration::from_secs(3600)));
        let monitor = HealthMonitor::new(
            chains,
            collector,
            liquidity.clone(),
            alerts,
            BigDecimal::from_str("0.2").unwrap(),
        );
        Fixture {
            eth,
            sink,
            liquidity,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_healthy_when_everything_up() {
        let f = fixture(3);
        f.liquidity.update_liquidity().await.unwrap();
        let status = f.monitor.check().await;
        assert!(status.is_healthy);
        assert!(status.liquidity_balanced);
        assert!(f.monitor.is_healthy());
        assert!(f.sink.is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_without_validator_quorum() {
        let f = fixture(2);
        let status = f.monitor.check().await;
        assert!(!status.validators_sufficient);
        assert!(!status.is_healthy);
        // repeated checks page once
        f.monitor.check().await;
        assert_eq!(f.sink.count_containing("unhealthy"), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let f = fixture(3);
        f.monitor.check().await;
        f.monitor.pause();
        assert!(!f.monitor.is_healthy());

        f.eth.set_connected(false);
        let err = f.monitor.resume().await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ResumeBlocked {
                ethereum_connected: false,
                solana_connected: true
            }
        ));
        assert!(f.monitor.is_paused());

        f.eth.set_connected(true);
        let status = f.monitor.resume().await.unwrap();
        assert!(status.is_healthy);
        assert!(!f.monitor.is_paused());
    }

    #[tokio::test]
    async fn test_critical_ratio_rebalances_and_alerts_once() {
        let f = fixture(3);
        f.eth.set_balance(BigDecimal::from(10));
        f.liquidity.update_liquidity().await.unwrap();

        let status = f.monitor.check().await;
        assert_eq!(status.liquidity_ratio, Some(BigDecimal::from(1)));
        assert_eq!(f.sink.count_containing("critical level"), 1);

        f.monitor.check().await;
        assert_eq!(f.sink.count_containing("critical level"), 1);
    }

    #[tokio::test]
    async fn test_critical_alert_stays_until_refresh_confirms() {
        let f = fixture(3);
        f.eth.set_balance(BigDecimal::from(10));
        f.liquidity.update_liquidity().await.unwrap();

        let status = f.monitor.check().await;
        assert!(status.rebalance_unconfirmed);
        assert_eq!(f.sink.count_containing("critical level"), 1);

        // Chains never moved: the refresh brings the low ratio back, still one page
        f.liquidity.update_liquidity().await.unwrap();
        let status = f.monitor.check().await;
        assert!(status.rebalance_unconfirmed);
        assert_eq!(f.sink.count_containing("critical level"), 1);

        // Funds actually moved: refresh confirms and the condition clears
        f.eth.set_balance(BigDecimal::from(100));
        f.liquidity.update_liquidity().await.unwrap();
        let status = f.monitor.check().await;
        assert!(!status.rebalance_unconfirmed);

        // A later drop pages again
        f.eth.set_balance(BigDecimal::from(10));
        f.liquidity.update_liquidity().await.unwrap();
        f.monitor.check().await;
        assert_eq!(f.sink.count_containing("critical level"), 2);
    }
}
