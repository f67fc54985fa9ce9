//! Deterministic identifier derivation.
//!
//! A record id is derived from the source event coordinates, so the same
//! on-chain event can never produce two records, and the submission
//! reference is derived from the record id, so a retried submission can
//! never produce two distinct on-chain effects.

use tiny_keccak::{Hasher, Keccak};

use crate::types::ChainId;

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Derive the globally unique record id for a source event.
///
/// Layout hashed: `chain_name || 0x00 || tx_hash || 0x00 || log_index_be`.
/// The separators keep `("ab", "c")` and `("a", "bc")` from colliding.
pub fn record_id(source_chain: ChainId, source_tx_hash: &str, log_index: u32) -> String {
    let mut data = Vec::with_capacity(source_tx_hash.len() + 16);
    data.extend_from_slice(source_chain.as_str().as_bytes());
    data.push(0);
    data.extend_from_slice(source_tx_hash.as_bytes());
    data.push(0);
    data.extend_from_slice(&log_index.to_be_bytes());
    hex::encode(keccak256(&data))
}

/// Derive the submission reference carried in the destination transaction
/// memo. Every retry of a submission for the same record reuses this value,
/// and recovery after a crash looks the destination chain up by it.
pub fn submission_reference(id: &str) -> String {
    format!("lusdt:{}", &id[..16.min(id.len())])
}
