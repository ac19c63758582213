//! Reserve tracking and rebalancing
//!
//! Tracks one reserve balance per chain. All mutation goes through the
//! [`LiquidityState`] guard: the orchestrator holds it across the destination
//! mint/release and the refresh that follows, and [`LiquidityManager::rebalance`]
//! holds it for the whole rebalance.
//!
//! A rebalance only moves the tracked figures. Until the next refresh reads
//! the reserve accounts back, the state is flagged `awaiting_confirmation`.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::chain::ChainPair;
use crate::error::ChainCallError;
use crate::metrics;

/// Tracked reserves. Only reachable through [`LiquidityManager::lock`].
#[derive(Debug, Clone, Default)]
pub struct LiquidityState {
    pub ethereum_reserve: BigDecimal,
    pub solana_reserve: BigDecimal,
    pub last_update: Option<DateTime<Utc>>,
    pub last_rebalance: Option<DateTime<Utc>>,
    /// Rebalanced in bookkeeping, not yet read back from the chains
    pub awaiting_confirmation: bool,
}

impl LiquidityState {
    /// min(reserve) / max(reserve); None when either side is empty
    pub fn ratio(&self) -> Option<BigDecimal> {
        if self.ethereum_reserve.is_zero() || self.solana_reserve.is_zero() {
            return None;
        }
        let (min, max) = if self.ethereum_reserve <= self.solana_reserve {
            (&self.ethereum_reserve, &self.solana_reserve)
        } else {
            (&self.solana_reserve, &self.ethereum_reserve)
        };
        Some(min / max)
    }

    fn publish(&self) {
        metrics::set_liquidity(
            &self.ethereum_reserve,
            &self.solana_reserve,
            self.ratio().as_ref(),
        );
    }
}

/// Point-in-time view for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct LiquiditySnapshot {
    pub ethereum_reserve: BigDecimal,
    pub solana_reserve: BigDecimal,
    pub ratio: Option<BigDecimal>,
    pub balanced: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub awaiting_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceOutcome {
    /// Both reserves now hold `each`
    Rebalanced { each: BigDecimal },
    /// Ratio already within threshold
    NotNeeded,
    /// One side is empty; nothing to move
    SkippedEmpty,
}

pub struct LiquidityManager {
    chains: ChainPair,
    rebalance_threshold: BigDecimal,
    state: Mutex<LiquidityState>,
}

impl LiquidityManager {
    pub fn new(chains: ChainPair, rebalance_threshold: BigDecimal) -> Self {
        Self {
            chains,
            rebalance_threshold,
            state: Mutex::new(LiquidityState::default()),
        }
    }

    /// Take the liquidity critical section
    pub async fn lock(&self) -> MutexGuard<'_, LiquidityState> {
        self.state.lock().await
    }

    /// Smallest ratio still considered balanced: `1 - rebalance_threshold`
    pub fn balanced_floor(&self) -> BigDecimal {
        BigDecimal::from(1) - &self.rebalance_threshold
    }

    pub fn is_balanced(&self, ratio: Option<&BigDecimal>) -> bool {
        ratio.is_some_and(|r| *r >= self.balanced_floor())
    }

    /// Re-read both reserve accounts into `state`. Caller holds the lock.
    pub async fn refresh(&self, state: &mut LiquidityState) -> Result<(), ChainCallError> {
        let (ethereum, solana) = self.chains.reserve_balances().await?;
        debug!(%ethereum, %solana, "Reserve balances refreshed");
        state.ethereum_reserve = ethereum.clone();
        state.solana_reserve = solana.clone();
        state.last_update = Some(Utc::now());
        if state.awaiting_confirmation {
            info!(%ethereum, %solana, "Reserve refresh after rebalance");
            state.awaiting_confirmation = false;
        }
        state.publish();
        Ok(())
    }

    pub async fn update_liquidity(&self) -> Result<(), ChainCallError> {
        let mut state = self.lock().await;
        self.refresh(&mut state).await
    }

    pub async fn check_ratio(&self) -> Option<BigDecimal> {
        self.lock().await.ratio()
    }

    /// Whether the last rebalance has yet to be confirmed by a refresh
    pub async fn awaiting_confirmation(&self) -> bool {
        self.lock().await.awaiting_confirmation
    }

    /// Split the tracked total evenly when the ratio has drifted below the
    /// balanced floor.
    pub async fn rebalance(&self) -> RebalanceOutcome {
        let mut state = self.lock().await;
        let Some(ratio) = state.ratio() else {
            warn!(
                ethereum = %state.ethereum_reserve,
                solana = %state.solana_reserve,
                "Rebalance skipped: a reserve is empty"
            );
            metrics::record_rebalance("skipped_empty");
            return RebalanceOutcome::SkippedEmpty;
        };
        if ratio >= self.balanced_floor() {
            debug!(%ratio, "Rebalance not needed");
            return RebalanceOutcome::NotNeeded;
        }

        let total = &state.ethereum_reserve + &state.solana_reserve;
        let each = total / BigDecimal::from(2);
        info!(
            %ratio,
            from_ethereum = %state.ethereum_reserve,
            from_solana = %state.solana_reserve,
            each = %each,
            "Rebalancing reserves"
        );
        state.ethereum_reserve = each.clone();
        state.solana_reserve = each.clone();
        state.last_rebalance = Some(Utc::now());
        state.awaiting_confirmation = true;
        state.publish();
        metrics::record_rebalance("rebalanced");
        RebalanceOutcome::Rebalanced { each }
    }

    pub async fn snapshot(&self) -> LiquiditySnapshot {
        let state = self.lock().await;
        let ratio = state.ratio();
        LiquiditySnapshot {
            ethereum_reserve: state.ethereum_reserve.clone(),
            solana_reserve: state.solana_reserve.clone(),
            balanced: self.is_balanced(ratio.as_ref()),
            ratio,
            last_update: state.last_update,
            last_rebalance: state.last_rebalance,
            awaiting_confirmation: state.awaiting_confirmation,
        }
    }
}
