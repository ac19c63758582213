//! Canonical digests signed by the validator set
//!
//! Every field is written as a 4-byte big-endian length followed by its UTF-8
//! bytes, behind a domain tag, and the whole buffer is hashed with keccak256.
//! Amounts are normalized before encoding so `10` and `10.000` produce the
//! same digest.

use tiny_keccak::{Hasher, Keccak};

use crate::transaction::BridgeTransaction;

const TRANSFER_DOMAIN: &[u8] = b"BRIDGE_TX_V1";
const REFUND_DOMAIN: &[u8] = b"BRIDGE_REFUND_V1";

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

fn encode_common(domain: &[u8], tx: &BridgeTransaction) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    push_field(&mut buf, domain);
    push_field(&mut buf, tx.id.as_bytes());
    push_field(&mut buf, tx.direction.as_str().as_bytes());
    push_field(&mut buf, tx.amount.normalized().to_string().as_bytes());
    push_field(&mut buf, tx.fee.normalized().to_string().as_bytes());
    push_field(&mut buf, tx.net_amount.normalized().to_string().as_bytes());
    push_field(&mut buf, tx.from_address.as_bytes());
    push_field(&mut buf, tx.to_address.as_bytes());
    push_field(
        &mut buf,
        tx.source_tx_hash.as_deref().unwrap_or_default().as_bytes(),
    );
    buf
}

/// Digest authorizing the destination mint/release of a transfer.
///
/// Binds the source transaction hash so a quorum only ever authorizes the
/// escrow it was collected for.
pub fn transfer_digest(tx: &BridgeTransaction) -> [u8; 32] {
    keccak256(&encode_common(TRANSFER_DOMAIN, tx))
}

/// Digest authorizing the refund of an escrowed amount to the sender
pub fn refund_digest(tx: &BridgeTransaction) -> [u8; 32] {
    keccak256(&encode_common(REFUND_DOMAIN, tx))
}

/// Format a 32-byte digest as 0x-prefixed hex
pub fn digest_to_hex(digest: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(digest))
}
