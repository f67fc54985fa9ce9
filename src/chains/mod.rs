//! Chain clients.
//!
//! The relayer talks to each chain over JSON-RPC through two narrow traits:
//! [`EventSource`] feeds the watchers and [`ChainClient`] carries the
//! executor's submissions and status probes. Transaction signing lives in a
//! node-side signer the RPC endpoint fronts; the relayer never holds keys.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::{BridgeEvent, ChainId};

pub mod lunes;
pub mod solana;

pub use lunes::LunesClient;
pub use solana::SolanaClient;

/// Inclusion status of a previously submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Not known to the chain (dropped, or never landed).
    NotFound,
    /// Included in a block at the given height/slot.
    Included { height: u64 },
    /// Included but reverted on-chain.
    Failed { reason: Option<String> },
}

/// A mint or payout the executor asks the destination chain to perform.
///
/// `reference` is the deterministic submission reference derived from the
/// record id; the signer deduplicates on it, so resubmitting the same
/// request is safe.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub recipient: String,
    /// Smallest units of the destination asset.
    pub amount: u128,
    pub reference: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected rpc response: {0}")]
    InvalidResponse(String),
    /// The signer already executed a transfer with this reference.
    #[error("transfer already processed: {0}")]
    AlreadyProcessed(String),
}

impl ChainError {
    /// Transient errors are retried with backoff; the rest are surfaced.
    pub fn is_transient(&self) -> bool {
        use crate::retry::{classify_error, ErrorClass};
        match self {
            ChainError::Transport(_) => true,
            // Server-side error codes, or a message the shared classifier
            // recognizes as transient.
            ChainError::Rpc { code, message } => {
                *code == -32000
                    || (-32099..=-32005).contains(code)
                    || classify_error(message) == ErrorClass::Transient
            }
            ChainError::InvalidResponse(_) => false,
            ChainError::AlreadyProcessed(_) => false,
        }
    }
}

/// Destination-side operations the executor needs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> ChainId;

    async fn latest_height(&self) -> Result<u64, ChainError>;

    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus, ChainError>;

    /// Submit a mint or payout. Returns the transaction hash. The signer
    /// keys on `request.reference`, so a retry of an already-executed
    /// request yields [`ChainError::AlreadyProcessed`].
    async fn submit_transfer(&self, request: &TransferRequest) -> Result<String, ChainError>;

    /// Look up a transaction previously submitted under `reference`.
    /// Recovery path for records interrupted mid-submission.
    async fn find_by_reference(&self, reference: &str) -> Result<Option<String>, ChainError>;
}

/// Source-side event feed the watchers poll.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn chain(&self) -> ChainId;

    async fn latest_height(&self) -> Result<u64, ChainError>;

    /// Normalized qualifying events in the inclusive height range.
    async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<BridgeEvent>, ChainError>;
}

/// Shared JSON-RPC 2.0 call helper.
pub(crate) async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
) -> Result<Value, ChainError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response: Value = client
        .post(url)
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown rpc error")
            .to_string();
        return Err(ChainError::Rpc { code, message });
    }

    response
        .get("result")
        .cloned()
        .ok_or_else(|| ChainError::InvalidResponse("missing result field".to_string()))
}

/// Extract a string field from a JSON value.
pub(crate) fn extract_string(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(String::from)
}

/// Extract a u64 from a JSON value, accepting both numbers and strings.
pub(crate) fn extract_u64(value: &Value, field: &str) -> Option<u64> {
    match value.get(field)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract a u128 amount, accepting both numbers and decimal strings.
pub(crate) fn extract_u128(value: &Value, field: &str) -> Option<u128> {
    match value.get(field)? {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
