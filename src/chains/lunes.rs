//! Lunes client.
//!
//! Watches LUSDT burn events and submits mints through the signer fronted
//! by the node's RPC endpoint. The burn payload carries the Solana
//! recipient the user supplied to the token contract's burn call.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::address;
use crate::types::{BridgeEvent, ChainId, Direction, FeeAsset};

use super::{
    extract_string, extract_u128, extract_u64, rpc_call, ChainClient, ChainError, EventSource,
    TransferRequest, TxStatus,
};

pub struct LunesClient {
    client: reqwest::Client,
    rpc_url: String,
}

impl LunesClient {
    pub fn new(rpc_url: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, rpc_url }
    }
}

/// Normalize one raw burn entry from the signer's burn listing. `None` when
/// the entry is missing its coordinates; recoverable problems (bad
/// recipient, zero amount) come back with `invalid_reason` set.
pub(crate) fn normalize_burn(raw: &Value) -> Option<BridgeEvent> {
    let extrinsic_hash = extract_string(raw, "extrinsic_hash")?;
    let event_index = extract_u64(raw, "event_index")? as u32;
    let block = extract_u64(raw, "block")?;
    let burner = extract_string(raw, "burner")?;

    let amount = extract_u128(raw, "amount").unwrap_or(0);
    let fee_asset = raw
        .get("fee_asset")
        .and_then(Value::as_str)
        .and_then(FeeAsset::parse)
        .unwrap_or(FeeAsset::Usdt);

    let recipient = extract_string(raw, "solana_recipient");
    let mut invalid_reason = match &recipient {
        Some(addr) => address::validate_solana(addr)
            .err()
            .map(|e| format!("invalid solana recipient: {}", e)),
        None => Some("missing solana recipient".to_string()),
    };
    if amount == 0 && invalid_reason.is_none() {
        invalid_reason = Some("zero amount".to_string());
    }

    Some(BridgeEvent {
        direction: Direction::Redemption,
        source_tx_hash: extrinsic_hash,
        log_index: event_index,
        amount,
        source_address: burner,
        destination_address: recipient,
        fee_asset,
        source_block_height: block,
        invalid_reason,
    })
}

#[async_trait]
impl EventSource for LunesClient {
    fn chain(&self) -> ChainId {
        ChainId::Lunes
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        let result = rpc_call(&self.client, &self.rpc_url, "chain_getHeader", json!([])).await?;
        let number = extract_string(&result, "number").ok_or_else(|| {
            ChainError::InvalidResponse("chain_getHeader missing number".to_string())
        })?;
        u64::from_str_radix(number.trim_start_matches("0x"), 16).map_err(|_| {
            ChainError::InvalidResponse(format!("block number is not hex: {}", number))
        })
    }

    async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<BridgeEvent>, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "bridge_listBurns",
            json!({"from_block": from, "to_block": to}),
        )
        .await?;

        let entries = result.as_array().ok_or_else(|| {
            ChainError::InvalidResponse("bridge_listBurns returned non-array".to_string())
        })?;
        Ok(entries.iter().filter_map(normalize_burn).collect())
    }
}

#[async_trait]
impl ChainClient for LunesClient {
    fn chain(&self) -> ChainId {
        ChainId::Lunes
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        EventSource::latest_height(self).await
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "bridge_txStatus",
            json!({"hash": tx_hash}),
        )
        .await?;

        match result.get("status").and_then(Value::as_str) {
            Some("not_found") => Ok(TxStatus::NotFound),
            Some("failed") => Ok(TxStatus::Failed {
                reason: extract_string(&result, "reason"),
            }),
            Some("included") => {
                let height = extract_u64(&result, "block").ok_or_else(|| {
                    ChainError::InvalidResponse("included status missing block".to_string())
                })?;
                Ok(TxStatus::Included { height })
            }
            other => Err(ChainError::InvalidResponse(format!(
                "unknown tx status: {:?}",
                other
            ))),
        }
    }

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<String, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "bridge_submitMint",
            json!({
                "recipient": request.recipient,
                "amount": request.amount.to_string(),
                "reference": request.reference,
            }),
        )
        .await
        .map_err(|e| match e {
            ChainError::Rpc { ref message, .. } if message.contains("already processed") => {
                ChainError::AlreadyProcessed(request.reference.clone())
            }
            other => other,
        })?;

        extract_string(&result, "extrinsic_hash").ok_or_else(|| {
            ChainError::InvalidResponse("bridge_submitMint missing extrinsic hash".to_string())
        })
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<String>, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "bridge_findByReference",
            json!({"reference": reference}),
        )
        .await?;
        Ok(result.as_str().map(String::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOLANA_OK: &str = "7EcDhSYGxXyscszYEp35KHN8vvw3svAuLKTzXwCFLtV";

    fn burn_entry() -> Value {
        json!({
            "extrinsic_hash": "0xabc123",
            "event_index": 3,
            "block": 1_000_000u64,
            "burner": "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty",
            "amount": "50000000",
            "solana_recipient": SOLANA_OK,
            "fee_asset": "usdt",
        })
    }

    #[test]
    fn normalize_burn_happy_path() {
        let event = normalize_burn(&burn_entry()).unwrap();
        assert_eq!(event.direction, Direction::Redemption);
        assert_eq!(event.amount, 50_000_000);
        assert_eq!(event.log_index, 3);
        assert_eq!(event.destination_address.as_deref(), Some(SOLANA_OK));
        assert_eq!(event.fee_asset, FeeAsset::Usdt);
        assert!(event.invalid_reason.is_none());
    }

    #[test]
    fn normalize_burn_bad_recipient_is_flagged_not_dropped() {
        let mut raw = burn_entry();
        raw["solana_recipient"] = json!("tooshort");
        let event = normalize_burn(&raw).unwrap();
        assert!(event
            .invalid_reason
            .as_deref()
            .unwrap()
            .contains("invalid solana recipient"));
    }

    #[test]
    fn normalize_burn_missing_recipient() {
        let mut raw = burn_entry();
        raw.as_object_mut().unwrap().remove("solana_recipient");
        let event = normalize_burn(&raw).unwrap();
        assert_eq!(
            event.invalid_reason.as_deref(),
            Some("missing solana recipient")
        );
    }

    #[test]
    fn normalize_burn_without_coordinates_is_dropped() {
        let mut raw = burn_entry();
        raw.as_object_mut().unwrap().remove("event_index");
        assert!(normalize_burn(&raw).is_none());
    }
}
