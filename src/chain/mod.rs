//! Chain client seam and the direction-agnostic chain pair
//!
//! The bridge talks to exactly two chains. Ethereum holds the native asset
//! (lock/release), Solana holds the wrapped representation (mint/burn).
//! [`ChainPair::route`] resolves a [`Direction`] into a [`Route`] whose
//! `commit_source` / `release_destination` / `refund_source` calls pick the
//! right primitive, so nothing above this module branches on direction.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::sync::Arc;

use crate::error::{ChainCallError, ChainKind};
use crate::transaction::ValidatorSignature;
use crate::types::Direction;

pub mod classify;
pub mod http;

pub use classify::{classify_error, ErrorClass};
pub use http::HttpChainClient;

/// Operations the bridge needs from one chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn kind(&self) -> ChainKind;

    /// Escrow `amount` from `from`; returns the source transaction hash
    async fn lock(&self, from: &str, amount: &BigDecimal) -> Result<String, ChainCallError>;

    /// Mint wrapped tokens to `to`, authorized by `signatures`
    async fn mint(
        &self,
        to: &str,
        amount: &BigDecimal,
        signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError>;

    /// Destroy wrapped tokens held by `from`
    async fn burn(&self, from: &str, amount: &BigDecimal) -> Result<String, ChainCallError>;

    /// Release escrowed tokens to `to`, authorized by `signatures`
    async fn release(
        &self,
        to: &str,
        amount: &BigDecimal,
        signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError>;

    async fn is_connected(&self) -> bool;

    async fn get_balance(&self, account: &str) -> Result<BigDecimal, ChainCallError>;
}

/// How a chain holds the bridged asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRole {
    /// Original asset, escrowed by lock and returned by release
    Native,
    /// Wrapped representation, created by mint and destroyed by burn
    Wrapped,
}

/// One side of a route: a client plus the role its asset plays
#[derive(Clone)]
pub struct Leg {
    pub client: Arc<dyn ChainClient>,
    pub role: AssetRole,
}

impl Leg {
    pub fn kind(&self) -> ChainKind {
        self.client.kind()
    }
}

/// Source and destination legs for one direction
#[derive(Clone)]
pub struct Route {
    pub source: Leg,
    pub destination: Leg,
}

impl Route {
    /// Lock (native source) or burn (wrapped source)
    pub async fn commit_source(
        &self,
        from: &str,
        amount: &BigDecimal,
    ) -> Result<String, ChainCallError> {
        match self.source.role {
            AssetRole::Native => self.source.client.lock(from, amount).await,
            AssetRole::Wrapped => self.source.client.burn(from, amount).await,
        }
    }

    /// Release (native destination) or mint (wrapped destination)
    pub async fn release_destination(
        &self,
        to: &str,
        amount: &BigDecimal,
        signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError> {
        match self.destination.role {
            AssetRole::Native => self.destination.client.release(to, amount, signatures).await,
            AssetRole::Wrapped => self.destination.client.mint(to, amount, signatures).await,
        }
    }

    /// Undo a committed source step: release escrow back, or re-mint burned tokens
    pub async fn refund_source(
        &self,
        to: &str,
        amount: &BigDecimal,
        signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError> {
        match self.source.role {
            AssetRole::Native => self.source.client.release(to, amount, signatures).await,
            AssetRole::Wrapped => self.source.client.mint(to, amount, signatures).await,
        }
    }
}

/// The two bridged chains and the reserve accounts tracked on each
#[derive(Clone)]
pub struct ChainPair {
    ethereum: Arc<dyn ChainClient>,
    solana: Arc<dyn ChainClient>,
    ethereum_reserve: String,
    solana_reserve: String,
}

impl ChainPair {
    pub fn new(
        ethereum: Arc<dyn ChainClient>,
        solana: Arc<dyn ChainClient>,
        ethereum_reserve: impl Into<String>,
        solana_reserve: impl Into<String>,
    ) -> Self {
        Self {
            ethereum,
            solana,
            ethereum_reserve: ethereum_reserve.into(),
            solana_reserve: solana_reserve.into(),
        }
    }

    pub fn ethereum(&self) -> &Arc<dyn ChainClient> {
        &self.ethereum
    }

    pub fn solana(&self) -> &Arc<dyn ChainClient> {
        &self.solana
    }

    pub fn route(&self, direction: Direction) -> Route {
        let eth = Leg {
            client: self.ethereum.clone(),
            role: AssetRole::Native,
        };
        let sol = Leg {
            client: self.solana.clone(),
            role: AssetRole::Wrapped,
        };
        match direction {
            Direction::EthToSol => Route {
                source: eth,
                destination: sol,
            },
            Direction::SolToEth => Route {
                source: sol,
                destination: eth,
            },
        }
    }

    /// Reserve balances as (ethereum, solana)
    pub async fn reserve_balances(&self) -> Result<(BigDecimal, BigDecimal), ChainCallError> {
        let (eth, sol) = tokio::join!(
            self.ethereum.get_balance(&self.ethereum_reserve),
            self.solana.get_balance(&self.solana_reserve)
        );
        Ok((eth?, sol?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChainClient;
    use std::str::FromStr;

    fn pair() -> (Arc<MockChainClient>, Arc<MockChainClient>, ChainPair) {
        let eth = Arc::new(MockChainClient::new(ChainKind::Ethereum));
        let sol = Arc::new(MockChainClient::new(ChainKind::Solana));
        let pair = ChainPair::new(eth.clone(), sol.clone(), "eth-reserve", "sol-reserve");
        (eth, sol, pair)
    }

    #[tokio::test]
    async fn test_eth_to_sol_route_locks_then_mints() {
        let (eth, sol, pair) = pair();
        let route = pair.route(Direction::EthToSol);
        let amount = BigDecimal::from_str("1.5").unwrap();

        route.commit_source("0xfrom", &amount).await.unwrap();
        route.release_destination("SolTo", &amount, &[]).await.unwrap();

        assert_eq!(eth.calls("lock"), 1);
        assert_eq!(sol.calls("mint"), 1);
        assert_eq!(eth.calls("burn") + sol.calls("burn"), 0);
    }

    #[tokio::test]
    async fn test_sol_to_eth_route_burns_then_releases() {
        let (eth, sol, pair) = pair();
        let route = pair.route(Direction::SolToEth);
        let amount = BigDecimal::from(2);

        route.commit_source("SolFrom", &amount).await.unwrap();
        route.release_destination("0xto", &amount, &[]).await.unwrap();
        route.refund_source("SolFrom", &amount, &[]).await.unwrap();

        assert_eq!(sol.calls("burn"), 1);
        assert_eq!(eth.calls("release"), 1);
        // refunding a burn re-mints on the wrapped chain
        assert_eq!(sol.calls("mint"), 1);
    }

    #[tokio::test]
    async fn test_reserve_balances_reads_both_reserves() {
        let (eth, sol, pair) = pair();
        eth.set_balance(BigDecimal::from(10));
        sol.set_balance(BigDecimal::from(100));
        let (a, b) = pair.reserve_balances().await.unwrap();
        assert_eq!(a, BigDecimal::from(10));
        assert_eq!(b, BigDecimal::from(100));
    }
}
