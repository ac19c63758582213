//! In-memory collaborators for tests and local runs
//!
//! Scriptable chain client, a deterministic validator set, an alert sink that
//! records what it was told and a journal that keeps everything in memory.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::alerts::{AlertSink, Severity};
use crate::chain::{ChainClient, ChainPair};
use crate::detector::StuckTransactionDetector;
use crate::error::{ChainCallError, ChainKind, JournalError};
use crate::health::HealthMonitor;
use crate::liquidity::LiquidityManager;
use crate::orchestrator::TransferOrchestrator;
use crate::overrides::OverrideController;
use crate::recovery::RecoveryEngine;
use crate::service::{BridgeService, ServiceSettings};
use crate::store::{TransactionJournal, TransactionStore};
use crate::transaction::{split_fee, BridgeTransaction, ValidatorSignature};
use crate::types::Direction;
use crate::validators::{LocalValidator, Validator, ValidatorEntry};

/// Lock a std mutex, carrying on past a panicked holder
fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// How a scripted chain call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Transient,
    Permanent,
}

#[derive(Default)]
struct MockState {
    calls: HashMap<&'static str, usize>,
    /// op -> (mode, remaining failures; None = until cleared)
    failures: HashMap<&'static str, (FailMode, Option<usize>)>,
    balance: BigDecimal,
}

/// Chain client whose calls succeed unless told otherwise
pub struct MockChainClient {
    kind: ChainKind,
    connected: AtomicBool,
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new(kind: ChainKind) -> Self {
        Self {
            kind,
            connected: AtomicBool::new(true),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        guard(&self.state)
    }

    /// Number of times `op` was attempted, failed attempts included
    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    pub fn set_balance(&self, balance: BigDecimal) {
        self.state().balance = balance;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail every `op` call until [`MockChainClient::clear_failures`]
    pub fn fail_always(&self, op: &'static str, mode: FailMode) {
        self.state().failures.insert(op, (mode, None));
    }

    /// Fail the next `times` calls to `op`
    pub fn fail_times(&self, op: &'static str, mode: FailMode, times: usize) {
        self.state().failures.insert(op, (mode, Some(times)));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    fn call(&self, op: &'static str) -> Result<String, ChainCallError> {
        let mut state = self.state();
        let count = {
            let c = state.calls.entry(op).or_insert(0);
            *c += 1;
            *c
        };
        if let Some((mode, remaining)) = state.failures.get(op).copied() {
            match remaining {
                Some(0) => {
                    state.failures.remove(op);
                }
                Some(n) => {
                    state.failures.insert(op, (mode, Some(n - 1)));
                    return Err(self.failure(op, mode));
                }
                None => return Err(self.failure(op, mode)),
            }
        }
        Ok(format!("0x{}_{}_{}", self.kind, op, count))
    }

    fn failure(&self, op: &'static str, mode: FailMode) -> ChainCallError {
        match mode {
            FailMode::Transient => ChainCallError::transient(self.kind, op, "connection timeout"),
            FailMode::Permanent => ChainCallError::permanent(self.kind, op, "execution reverted"),
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn kind(&self) -> ChainKind {
        self.kind
    }

    async fn lock(&self, _from: &str, _amount: &BigDecimal) -> Result<String, ChainCallError> {
        self.call("lock")
    }

    async fn mint(
        &self,
        _to: &str,
        _amount: &BigDecimal,
        _signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError> {
        self.call("mint")
    }

    async fn burn(&self, _from: &str, _amount: &BigDecimal) -> Result<String, ChainCallError> {
        self.call("burn")
    }

    async fn release(
        &self,
        _to: &str,
        _amount: &BigDecimal,
        _signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError> {
        self.call("release")
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_balance(&self, _account: &str) -> Result<BigDecimal, ChainCallError> {
        Ok(self.state().balance.clone())
    }
}

/// `n` in-process validators with ids `validator-0..n` and distinct keys
pub fn local_validator_set(n: usize) -> Vec<ValidatorEntry> {
    (0..n)
        .map(|i| {
            let signer = LocalValidator::from_seed([i as u8 + 1; 32]);
            let public_key = signer.verifying_key();
            ValidatorEntry::new(format!("validator-{}", i), public_key, Arc::new(signer))
        })
        .collect()
}

/// Validator that never answers with a signature
pub struct FaultyValidator;

#[async_trait]
impl Validator for FaultyValidator {
    async fn sign(&self, _digest: &[u8; 32]) -> eyre::Result<Signature> {
        Err(eyre::eyre!("validator offline"))
    }
}

/// Local validator that can be taken offline and brought back
pub struct SwitchableValidator {
    inner: LocalValidator,
    online: AtomicBool,
}

impl SwitchableValidator {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            inner: LocalValidator::from_seed(seed),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Validator for SwitchableValidator {
    async fn sign(&self, digest: &[u8; 32]) -> eyre::Result<Signature> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(eyre::eyre!("validator offline"));
        }
        self.inner.sign(digest).await
    }
}

/// Same keys and ids as [`local_validator_set`], with a switch on each signer
pub fn switchable_validator_set(n: usize) -> (Vec<ValidatorEntry>, Vec<Arc<SwitchableValidator>>) {
    let signers: Vec<Arc<SwitchableValidator>> = (0..n)
        .map(|i| Arc::new(SwitchableValidator::from_seed([i as u8 + 1; 32])))
        .collect();
    let entries = signers
        .iter()
        .enumerate()
        .map(|(i, signer)| {
            ValidatorEntry::new(
                format!("validator-{}", i),
                signer.inner.verifying_key(),
                signer.clone(),
            )
        })
        .collect();
    (entries, signers)
}

#[derive(Debug, Clone)]
pub struct RecordedAlert {
    pub severity: Severity,
    pub message: String,
    pub context: Value,
}

/// Alert sink that keeps every alert it receives
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<RecordedAlert>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<RecordedAlert> {
        guard(&self.alerts).clone()
    }

    pub fn len(&self) -> usize {
        guard(&self.alerts).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        guard(&self.alerts)
            .iter()
            .filter(|a| a.message.contains(needle))
            .count()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, severity: Severity, message: &str, context: &Value) -> eyre::Result<()> {
        guard(&self.alerts).push(RecordedAlert {
            severity,
            message: message.to_string(),
            context: context.clone(),
        });
        Ok(())
    }
}

/// Journal that keeps the latest record and event log in memory
#[derive(Default)]
pub struct MemoryJournal {
    rows: Mutex<HashMap<String, BridgeTransaction>>,
    events: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
    failed: AtomicUsize,
}

impl MemoryJournal {
    pub fn events(&self, tx_id: &str) -> Vec<String> {
        guard(&self.events)
            .iter()
            .filter(|(id, _)| id == tx_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn row(&self, tx_id: &str) -> Option<BridgeTransaction> {
        guard(&self.rows).get(tx_id).cloned()
    }

    /// Make every write fail until switched back
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes refused while failing
    pub fn failed_writes(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionJournal for MemoryJournal {
    async fn record(&self, tx: &BridgeTransaction, event: &str) -> Result<(), JournalError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(JournalError("database unavailable".to_string()));
        }
        guard(&self.rows).insert(tx.id.clone(), tx.clone());
        guard(&self.events).push((tx.id.clone(), event.to_string()));
        Ok(())
    }

    async fn load_open(&self) -> Result<Vec<BridgeTransaction>, JournalError> {
        Ok(guard(&self.rows)
            .values()
            .filter(|tx| !tx.is_terminal())
            .cloned()
            .collect())
    }
}

/// A 10-unit eth→sol transfer at the default 0.1% fee
pub fn sample_transaction(id: &str, created_at: DateTime<Utc>) -> BridgeTransaction {
    let amount = BigDecimal::from(10);
    let (fee, _) = split_fee(&amount, &default_fee());
    BridgeTransaction::new(
        id.to_string(),
        Direction::EthToSol,
        amount,
        fee,
        "0xsender".to_string(),
        "SolRecipient".to_string(),
        3,
        60,
        created_at,
    )
}

fn default_fee() -> BigDecimal {
    BigDecimal::from_str("0.001").unwrap_or_default()
}

/// A fully wired service over mocks: 100/100 reserves, three local validators
/// with a quorum of three, default bridge parameters.
pub struct Harness {
    pub service: Arc<BridgeService>,
    pub store: Arc<TransactionStore>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub detector: Arc<StuckTransactionDetector>,
    pub recovery: Arc<RecoveryEngine>,
    pub health: Arc<HealthMonitor>,
    pub liquidity: Arc<LiquidityManager>,
    pub overrides: Arc<OverrideController>,
    pub eth: Arc<MockChainClient>,
    pub sol: Arc<MockChainClient>,
    pub sink: Arc<RecordingAlertSink>,
    pub journal: Arc<MemoryJournal>,
    pub validators: Vec<Arc<SwitchableValidator>>,
}

impl Harness {
    pub fn settings() -> ServiceSettings {
        let mut settings = ServiceSettings::default();
        settings.bridge.signature_window = Duration::from_secs(5);
        settings.admin_override_token = Some("harness-admin-token".to_string());
        settings
    }

    pub async fn ready() -> Self {
        Self::with_settings(Self::settings()).await
    }

    /// Build and initialize; panics if initialization fails
    pub async fn with_settings(settings: ServiceSettings) -> Self {
        Self::with_journal(settings, Arc::new(MemoryJournal::default())).await
    }

    /// Start over an existing journal, as a restarted operator would
    pub async fn with_journal(settings: ServiceSettings, journal: Arc<MemoryJournal>) -> Self {
        let eth = Arc::new(MockChainClient::new(ChainKind::Ethereum));
        let sol = Arc::new(MockChainClient::new(ChainKind::Solana));
        eth.set_balance(BigDecimal::from(100));
        sol.set_balance(BigDecimal::from(100));
        let sink = Arc::new(RecordingAlertSink::default());
        let (entries, validators) = switchable_validator_set(3);

        let chains = ChainPair::new(eth.clone(), sol.clone(), "eth-reserve", "sol-reserve");
        let service = Arc::new(BridgeService::new(
            settings,
            chains,
            entries,
            journal.clone(),
            sink.clone(),
        ));
        service
            .initialize()
            .await
            .expect("harness service initializes");

        Self {
            store: service.store().clone(),
            orchestrator: service.orchestrator().clone(),
            detector: service.detector().clone(),
            recovery: service.recovery().clone(),
            health: service.health().clone(),
            liquidity: service.liquidity().clone(),
            overrides: service.overrides().clone(),
            service,
            eth,
            sol,
            sink,
            journal,
            validators,
        }
    }
}
