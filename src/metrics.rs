//! Prometheus metrics for the bridge operator
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use bigdecimal::{BigDecimal, ToPrimitive};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Transfer lifecycle
    pub static ref TRANSFERS_INITIATED: CounterVec = register_counter_vec!(
        "bridge_transfers_initiated_total",
        "Total number of transfers accepted for processing",
        &["direction"]
    ).unwrap();

    pub static ref TRANSFERS_FINALIZED: CounterVec = register_counter_vec!(
        "bridge_transfers_finalized_total",
        "Total number of transfers archived, by terminal outcome",
        &["direction", "outcome"]
    ).unwrap();

    pub static ref STEP_FAILURES: CounterVec = register_counter_vec!(
        "bridge_step_failures_total",
        "Total number of failed transfer steps",
        &["step", "kind"]
    ).unwrap();

    pub static ref TRANSFER_LATENCY: HistogramVec = register_histogram_vec!(
        "bridge_transfer_latency_seconds",
        "Time from transaction creation to terminal status",
        &["direction"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 3600.0, 7200.0]
    ).unwrap();

    // Recovery
    pub static ref RECOVERY_ATTEMPTS: CounterVec = register_counter_vec!(
        "bridge_recovery_attempts_total",
        "Total number of recovery attempts",
        &["outcome"]
    ).unwrap();

    pub static ref SIGNATURES: CounterVec = register_counter_vec!(
        "bridge_validator_signatures_total",
        "Validator signature responses by result",
        &["validator", "result"]
    ).unwrap();

    pub static ref ALERTS: CounterVec = register_counter_vec!(
        "bridge_alerts_total",
        "Alerts dispatched to the alert sink",
        &["severity", "kind"]
    ).unwrap();

    // Queue sizes
    pub static ref PENDING_TRANSACTIONS: Gauge = register_gauge!(
        "bridge_pending_transactions",
        "Transactions in the pending store"
    ).unwrap();

    pub static ref STUCK_TRANSACTIONS: Gauge = register_gauge!(
        "bridge_stuck_transactions",
        "Pending transactions in STUCK or ADMIN_REVIEW"
    ).unwrap();

    // Liquidity
    pub static ref LIQUIDITY: GaugeVec = register_gauge_vec!(
        "bridge_liquidity",
        "Tracked reserve balance per chain",
        &["chain"]
    ).unwrap();

    pub static ref LIQUIDITY_RATIO: Gauge = register_gauge!(
        "bridge_liquidity_ratio",
        "min(reserve)/max(reserve), 0 when either reserve is empty"
    ).unwrap();

    pub static ref REBALANCES: CounterVec = register_counter_vec!(
        "bridge_rebalances_total",
        "Rebalance runs by result",
        &["result"]
    ).unwrap();

    // Health
    pub static ref UP: Gauge = register_gauge!(
        "bridge_up",
        "Whether the bridge operator is up and running"
    ).unwrap();

    pub static ref HEALTHY: Gauge = register_gauge!(
        "bridge_healthy",
        "Whether the bridge currently accepts new transfers"
    ).unwrap();

    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "bridge_chain_connected",
        "Result of the last liveness probe per chain",
        &["chain"]
    ).unwrap();

    pub static ref JOURNAL_ERRORS: CounterVec = register_counter_vec!(
        "bridge_journal_errors_total",
        "Failed journal writes",
        &["operation"]
    ).unwrap();
}

fn as_f64(value: &BigDecimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn record_initiated(direction: &str) {
    TRANSFERS_INITIATED.with_label_values(&[direction]).inc();
}

/// Record a transaction reaching a terminal status
pub fn record_finalized(direction: &str, outcome: &str, latency_seconds: f64) {
    TRANSFERS_FINALIZED
        .with_label_values(&[direction, outcome])
        .inc();
    TRANSFER_LATENCY
        .with_label_values(&[direction])
        .observe(latency_seconds);
}

pub fn record_step_failure(step: &str, kind: &str) {
    STEP_FAILURES.with_label_values(&[step, kind]).inc();
}

pub fn record_recovery_attempt(outcome: &str) {
    RECOVERY_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_signature(validator: &str, result: &str) {
    SIGNATURES.with_label_values(&[validator, result]).inc();
}

pub fn record_alert(severity: &str, kind: &str) {
    ALERTS.with_label_values(&[severity, kind]).inc();
}

pub fn set_queue_sizes(pending: usize, stuck: usize) {
    PENDING_TRANSACTIONS.set(pending as f64);
    STUCK_TRANSACTIONS.set(stuck as f64);
}

pub fn set_liquidity(ethereum: &BigDecimal, solana: &BigDecimal, ratio: Option<&BigDecimal>) {
    LIQUIDITY.with_label_values(&["ethereum"]).set(as_f64(ethereum));
    LIQUIDITY.with_label_values(&["solana"]).set(as_f64(solana));
    LIQUIDITY_RATIO.set(ratio.map(as_f64).unwrap_or(0.0));
}

pub fn record_rebalance(result: &str) {
    REBALANCES.with_label_values(&[result]).inc();
}

pub fn set_health(ethereum_connected: bool, solana_connected: bool, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&["ethereum"])
        .set(if ethereum_connected { 1.0 } else { 0.0 });
    CHAIN_CONNECTED
        .with_label_values(&["solana"])
        .set(if solana_connected { 1.0 } else { 0.0 });
    HEALTHY.set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_journal_error(operation: &str) {
    JOURNAL_ERRORS.with_label_values(&[operation]).inc();
}
