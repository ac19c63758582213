//! HTTP client for a per-chain bridge adapter
//!
//! Wallet, gas and nonce handling live in the adapter process that fronts
//! each chain. This client only speaks its small JSON API:
//!
//! - `POST /lock`    `{from, amount}`              -> `{tx_hash}`
//! - `POST /burn`    `{from, amount}`              -> `{tx_hash}`
//! - `POST /mint`    `{to, amount, signatures}`    -> `{tx_hash}`
//! - `POST /release` `{to, amount, signatures}`    -> `{tx_hash}`
//! - `GET  /health`                                -> 200
//! - `GET  /balance/{account}`                     -> `{balance}`
//!
//! Non-2xx responses carry `{error}`; the text is run through
//! [`classify_error`] to decide whether the failure is permanent.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{classify_error, ChainClient};
use crate::error::{ChainCallError, ChainKind};
use crate::transaction::ValidatorSignature;

#[derive(Serialize)]
struct CommitRequest<'a> {
    from: &'a str,
    amount: String,
}

#[derive(Serialize)]
struct PayoutRequest<'a> {
    to: &'a str,
    amount: String,
    signatures: &'a [ValidatorSignature],
}

#[derive(Deserialize)]
struct TxResponse {
    tx_hash: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Bridge adapter client for one chain
pub struct HttpChainClient {
    kind: ChainKind,
    base_url: String,
    client: Client,
}

impl HttpChainClient {
    pub fn new(kind: ChainKind, base_url: &str, timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn transient(&self, operation: &'static str, e: impl std::fmt::Display) -> ChainCallError {
        ChainCallError::transient(self.kind, operation, e.to_string())
    }

    async fn post_tx<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        body: &B,
    ) -> Result<String, ChainCallError> {
        let url = format!("{}/{}", self.base_url, operation);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transient(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            let class = classify_error(&message);
            debug!(chain = %self.kind, operation, ?class, %message, "Adapter call rejected");
            return Err(ChainCallError {
                chain: self.kind,
                operation,
                message,
                permanent: class.is_permanent(),
            });
        }

        let body = response
            .json::<TxResponse>()
            .await
            .map_err(|e| self.transient(operation, e))?;
        Ok(body.tx_hash)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn kind(&self) -> ChainKind {
        self.kind
    }

    async fn lock(&self, from: &str, amount: &BigDecimal) -> Result<String, ChainCallError> {
        self.post_tx(
            "lock",
            &CommitRequest {
                from,
                amount: amount.to_string(),
            },
        )
        .await
    }

    async fn mint(
        &self,
        to: &str,
        amount: &BigDecimal,
        signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError> {
        self.post_tx(
            "mint",
            &PayoutRequest {
                to,
                amount: amount.to_string(),
                signatures,
            },
        )
        .await
    }

    async fn burn(&self, from: &str, amount: &BigDecimal) -> Result<String, ChainCallError> {
        self.post_tx(
            "burn",
            &CommitRequest {
                from,
                amount: amount.to_string(),
            },
        )
        .await
    }

    async fn release(
        &self,
        to: &str,
        amount: &BigDecimal,
        signatures: &[ValidatorSignature],
    ) -> Result<String, ChainCallError> {
        self.post_tx(
            "release",
            &PayoutRequest {
                to,
                amount: amount.to_string(),
                signatures,
            },
        )
        .await
    }

    async fn is_connected(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(chain = %self.kind, error = %e, "Adapter health probe failed");
                false
            }
        }
    }

    async fn get_balance(&self, account: &str) -> Result<BigDecimal, ChainCallError> {
        let url = format!("{}/balance/{}", self.base_url, account);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transient("get_balance", e))?;
        if !response.status().is_success() {
            return Err(self.transient(
                "get_balance",
                format!("HTTP {}", response.status().as_u16()),
            ));
        }
        let body = response
            .json::<BalanceResponse>()
            .await
            .map_err(|e| self.transient("get_balance", e))?;
        BigDecimal::from_str(&body.balance).map_err(|e| {
            ChainCallError::permanent(
                self.kind,
                "get_balance",
                format!("invalid balance {:?}: {}", body.balance, e),
            )
        })
    }
}
