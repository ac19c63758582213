//! Validator set and quorum signature collection
//!
//! Each validator signs the 32-byte transaction digest with ed25519. The
//! public key a signature is checked against always comes from local
//! configuration, never from the validator's response.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::QuorumError;
use crate::hash::digest_to_hex;
use crate::metrics;
use crate::transaction::ValidatorSignature;

/// Something that can sign a digest on behalf of one validator
#[async_trait]
pub trait Validator: Send + Sync {
    async fn sign(&self, digest: &[u8; 32]) -> eyre::Result<Signature>;
}

/// Validator whose key lives in this process
pub struct LocalValidator {
    key: SigningKey,
}

impl LocalValidator {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

#[async_trait]
impl Validator for LocalValidator {
    async fn sign(&self, digest: &[u8; 32]) -> eyre::Result<Signature> {
        Ok(self.key.sign(digest))
    }
}

#[derive(Serialize)]
struct SignRequest {
    digest: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

/// Remote validator reached over HTTP (`POST /sign {digest}` -> `{signature}`)
pub struct HttpValidator {
    url: String,
    client: Client,
}

impl HttpValidator {
    pub fn new(url: &str, timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: format!("{}/sign", url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn sign(&self, digest: &[u8; 32]) -> eyre::Result<Signature> {
        let response = self
            .client
            .post(&self.url)
            .json(&SignRequest {
                digest: digest_to_hex(digest),
            })
            .send()
            .await?
            .error_for_status()?
            .json::<SignResponse>()
            .await?;
        parse_signature(&response.signature)
    }
}

/// Parse a 0x-prefixed or bare hex ed25519 signature
pub fn parse_signature(raw: &str) -> eyre::Result<Signature> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| eyre::eyre!("signature must be 64 bytes"))?;
    Ok(Signature::from_bytes(&bytes))
}

/// Parse a 0x-prefixed or bare hex ed25519 public key
pub fn parse_public_key(raw: &str) -> eyre::Result<VerifyingKey> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| eyre::eyre!("public key must be 32 bytes"))?;
    Ok(VerifyingKey::from_bytes(&bytes)?)
}

/// A configured validator: identity, known public key and signer
#[derive(Clone)]
pub struct ValidatorEntry {
    pub id: String,
    pub public_key: VerifyingKey,
    pub signer: Arc<dyn Validator>,
}

impl ValidatorEntry {
    pub fn new(id: impl Into<String>, public_key: VerifyingKey, signer: Arc<dyn Validator>) -> Self {
        Self {
            id: id.into(),
            public_key,
            signer,
        }
    }

    /// Check a signature over `digest` against this validator's key
    pub fn verify(&self, digest: &[u8; 32], signature: &Signature) -> bool {
        self.public_key.verify_strict(digest, signature).is_ok()
    }
}

/// Gathers a quorum of validator signatures over a digest
pub struct SignatureCollector {
    validators: Vec<ValidatorEntry>,
    min_validators: usize,
    window: Duration,
}

impl SignatureCollector {
    pub fn new(validators: Vec<ValidatorEntry>, min_validators: usize, window: Duration) -> Self {
        Self {
            validators,
            min_validators,
            window,
        }
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    pub fn min_validators(&self) -> usize {
        self.min_validators
    }

    pub fn validators_sufficient(&self) -> bool {
        self.validators.len() >= self.min_validators
    }

    /// Fan the digest out to every validator and keep the first
    /// `min_validators` signatures that verify.
    pub async fn collect(&self, digest: &[u8; 32]) -> Result<Vec<ValidatorSignature>, QuorumError> {
        let required = self.min_validators;
        let mut pending: FuturesUnordered<_> = self
            .validators
            .iter()
            .map(|entry| async move { (entry, entry.signer.sign(digest).await) })
            .collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut accepted: Vec<ValidatorSignature> = Vec::with_capacity(required);

        let fan_in = async {
            while let Some((entry, result)) = pending.next().await {
                let signature = match result {
                    Ok(signature) => signature,
                    Err(e) => {
                        warn!(validator = %entry.id, error = %e, "Validator failed to sign");
                        metrics::record_signature(&entry.id, "error");
                        continue;
                    }
                };
                if seen.contains(entry.id.as_str()) {
                    warn!(validator = %entry.id, "Duplicate signature from validator rejected");
                    metrics::record_signature(&entry.id, "duplicate");
                    continue;
                }
                if !entry.verify(digest, &signature) {
                    warn!(validator = %entry.id, "Signature failed verification, rejected");
                    metrics::record_signature(&entry.id, "invalid");
                    continue;
                }
                seen.insert(entry.id.as_str());
                debug!(validator = %entry.id, "Signature accepted");
                metrics::record_signature(&entry.id, "valid");
                accepted.push(ValidatorSignature {
                    validator: entry.id.clone(),
                    signature: hex::encode(signature.to_bytes()),
                });
                if accepted.len() >= required {
                    break;
                }
            }
        };

        if tokio::time::timeout(self.window, fan_in).await.is_err() {
            warn!(
                collected = accepted.len(),
                required,
                window_ms = self.window.as_millis() as u64,
                "Signature collection window elapsed"
            );
        }

        if accepted.len() < required {
            return Err(QuorumError {
                collected: accepted.len(),
                required,
            });
        }

        info!(
            count = accepted.len(),
            required,
            digest = %digest_to_hex(digest),
            "Collected validator signatures"
        );
        Ok(accepted)
    }

    /// Check signatures an operator recovered off-chain. Only configured
    /// validators count, each at most once, and each must verify over `digest`.
    pub fn verify_supplied(
        &self,
        digest: &[u8; 32],
        supplied: &[ValidatorSignature],
    ) -> Result<Vec<ValidatorSignature>, QuorumError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut accepted = Vec::with_capacity(supplied.len());

        for candidate in supplied {
            let Some(entry) = self.validators.iter().find(|e| e.id == candidate.validator) else {
                warn!(validator = %candidate.validator, "Supplied signature from unknown validator");
                continue;
            };
            if seen.contains(entry.id.as_str()) {
                continue;
            }
            let valid = parse_signature(&candidate.signature)
                .map(|signature| entry.verify(digest, &signature))
                .unwrap_or(false);
            if !valid {
                warn!(validator = %entry.id, "Supplied signature failed verification");
                continue;
            }
            seen.insert(entry.id.as_str());
            accepted.push(ValidatorSignature {
                validator: entry.id.clone(),
                signature: candidate.signature.trim_start_matches("0x").to_lowercase(),
            });
        }

        if accepted.len() < self.min_validators {
            return Err(QuorumError {
                collected: accepted.len(),
                required: self.min_validators,
            });
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_validator_set, FaultyValidator};

    #[tokio::test]
    async fn test_collects_quorum_from_honest_set() {
        let collector = SignatureCollector::new(local_validator_set(5), 3, Duration::from_secs(5));
        let digest = [7u8; 32];
        let sigs = collector.collect(&digest).await.unwrap();
        assert_eq!(sigs.len(), 3);
        let ids: HashSet<_> = sigs.iter().map(|s| s.validator.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_rejects_signature_from_wrong_key() {
        let mut set = local_validator_set(3);
        // validator-2 signs with a key that does not match its configured public key
        set[2].signer = Arc::new(LocalValidator::from_seed([99u8; 32]));
        let collector = SignatureCollector::new(set, 3, Duration::from_secs(5));
        let err = collector.collect(&[1u8; 32]).await.unwrap_err();
        assert_eq!(err, QuorumError { collected: 2, required: 3 });
    }

    #[tokio::test]
    async fn test_rejects_duplicate_validator_ids() {
        let mut set = local_validator_set(3);
        set[1] = set[0].clone();
        let collector = SignatureCollector::new(set, 3, Duration::from_secs(5));
        let err = collector.collect(&[1u8; 32]).await.unwrap_err();
        assert_eq!(err.collected, 2);
    }

    #[tokio::test]
    async fn test_tolerates_failing_validator_when_quorum_remains() {
        let mut set = local_validator_set(4);
        set[0].signer = Arc::new(FaultyValidator);
        let collector = SignatureCollector::new(set, 3, Duration::from_secs(5));
        let sigs = collector.collect(&[3u8; 32]).await.unwrap();
        assert!(sigs.iter().all(|s| s.validator != "validator-0"));
    }

    #[tokio::test]
    async fn test_signatures_verify_against_configured_keys() {
        let set = local_validator_set(3);
        let collector = SignatureCollector::new(set.clone(), 3, Duration::from_secs(5));
        let digest = [5u8; 32];
        for sig in collector.collect(&digest).await.unwrap() {
            let entry = set.iter().find(|e| e.id == sig.validator).unwrap();
            let parsed = parse_signature(&sig.signature).unwrap();
            assert!(entry.verify(&digest, &parsed));
        }
    }

    #[tokio::test]
    async fn test_supplied_signatures_need_a_verified_quorum() {
        let set = local_validator_set(3);
        let collector = SignatureCollector::new(set, 3, Duration::from_secs(5));
        let digest = [9u8; 32];
        let mut sigs = collector.collect(&digest).await.unwrap();

        assert_eq!(collector.verify_supplied(&digest, &sigs).unwrap().len(), 3);
        assert!(collector.verify_supplied(&[8u8; 32], &sigs).is_err());

        // a repeated validator counts once
        sigs[2] = sigs[0].clone();
        let err = collector.verify_supplied(&digest, &sigs).unwrap_err();
        assert_eq!(err, QuorumError { collected: 2, required: 3 });
    }

    #[test]
    fn test_parse_public_key_rejects_wrong_length() {
        assert!(parse_public_key("0x1234").is_err());
    }
}
