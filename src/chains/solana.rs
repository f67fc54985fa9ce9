//! Solana client.
//!
//! Watches USDT transfers into the bridge custody account and submits
//! payouts through the signer the RPC node fronts. Deposit listing and
//! payout submission use the signer's `bridge_*` methods; height and
//! status probes use the standard Solana RPC surface.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::address;
use crate::types::{BridgeEvent, ChainId, Direction, FeeAsset};

use super::{
    extract_string, extract_u128, extract_u64, rpc_call, ChainClient, ChainError, EventSource,
    TransferRequest, TxStatus,
};

pub struct SolanaClient {
    client: reqwest::Client,
    rpc_url: String,
    custody_address: String,
}

impl SolanaClient {
    pub fn new(rpc_url: String, custody_address: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            rpc_url,
            custody_address,
        }
    }
}

/// Destination details carried in a deposit memo. The memo is either a bare
/// Lunes address or a JSON object `{"address": "...", "fee_asset": "lusdt"}`.
pub(crate) fn parse_memo(memo: &str) -> (Option<String>, FeeAsset, Option<String>) {
    let trimmed = memo.trim();
    if trimmed.is_empty() {
        return (None, FeeAsset::Lusdt, Some("empty memo".to_string()));
    }

    let (address, fee_asset) = if trimmed.starts_with('{') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => {
                let Some(address) = extract_string(&value, "address") else {
                    return (
                        None,
                        FeeAsset::Lusdt,
                        Some("memo json missing address".to_string()),
                    );
                };
                let fee_asset = match value.get("fee_asset").and_then(Value::as_str) {
                    Some(raw) => match FeeAsset::parse(raw) {
                        Some(asset) => asset,
                        None => {
                            return (
                                Some(address),
                                FeeAsset::Lusdt,
                                Some(format!("unknown fee asset: {}", raw)),
                            )
                        }
                    },
                    None => FeeAsset::Lusdt,
                };
                (address, fee_asset)
            }
            Err(_) => {
                return (
                    None,
                    FeeAsset::Lusdt,
                    Some("memo is not valid json".to_string()),
                )
            }
        }
    } else {
        (trimmed.to_string(), FeeAsset::Lusdt)
    };

    match address::validate_lunes(&address) {
        Ok(()) => (Some(address), fee_asset, None),
        Err(e) => (
            Some(address),
            fee_asset,
            Some(format!("invalid lunes address: {}", e)),
        ),
    }
}

/// Normalize one raw deposit entry from the signer's deposit listing.
/// Returns `None` when the entry lacks the coordinates needed to key a
/// record; structurally-present but unusable entries come back with
/// `invalid_reason` set so they surface as failed records.
pub(crate) fn normalize_deposit(raw: &Value) -> Option<BridgeEvent> {
    let signature = extract_string(raw, "signature")?;
    let log_index = extract_u64(raw, "instruction_index")? as u32;
    let slot = extract_u64(raw, "slot")?;
    let sender = extract_string(raw, "sender")?;

    let amount = extract_u128(raw, "amount").unwrap_or(0);
    let (destination_address, fee_asset, mut invalid_reason) = match raw
        .get("memo")
        .and_then(Value::as_str)
    {
        Some(memo) => parse_memo(memo),
        None => (None, FeeAsset::Lusdt, Some("missing memo".to_string())),
    };
    if amount == 0 && invalid_reason.is_none() {
        invalid_reason = Some("zero amount".to_string());
    }

    Some(BridgeEvent {
        direction: Direction::Deposit,
        source_tx_hash: signature,
        log_index,
        amount,
        source_address: sender,
        destination_address,
        fee_asset,
        source_block_height: slot,
        invalid_reason,
    })
}

/// Map one entry of a `getSignatureStatuses` response. A transaction only
/// counts as included once its commitment is `finalized`; anything weaker
/// (`processed`, `confirmed`) can still be rolled back by a fork and is
/// reported as not-yet-found.
pub(crate) fn parse_signature_status(status: &Value) -> Result<TxStatus, ChainError> {
    if status.is_null() {
        return Ok(TxStatus::NotFound);
    }
    if let Some(err) = status.get("err") {
        if !err.is_null() {
            return Ok(TxStatus::Failed {
                reason: Some(err.to_string()),
            });
        }
    }
    match status.get("confirmationStatus").and_then(Value::as_str) {
        Some("finalized") => {
            let height = extract_u64(status, "slot").ok_or_else(|| {
                ChainError::InvalidResponse("signature status missing slot".to_string())
            })?;
            Ok(TxStatus::Included { height })
        }
        _ => Ok(TxStatus::NotFound),
    }
}

#[async_trait]
impl EventSource for SolanaClient {
    fn chain(&self) -> ChainId {
        ChainId::Solana
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "getSlot",
            json!([{"commitment": "finalized"}]),
        )
        .await?;
        result
            .as_u64()
            .ok_or_else(|| ChainError::InvalidResponse("getSlot returned non-number".to_string()))
    }

    async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<BridgeEvent>, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "bridge_listDeposits",
            json!({
                "custody": self.custody_address,
                "from_slot": from,
                "to_slot": to,
            }),
        )
        .await?;

        let entries = result.as_array().ok_or_else(|| {
            ChainError::InvalidResponse("bridge_listDeposits returned non-array".to_string())
        })?;
        Ok(entries.iter().filter_map(normalize_deposit).collect())
    }
}

#[async_trait]
impl ChainClient for SolanaClient {
    fn chain(&self) -> ChainId {
        ChainId::Solana
    }

    async fn latest_height(&self) -> Result<u64, ChainError> {
        EventSource::latest_height(self).await
    }

    async fn tx_status(&self, tx_hash: &str) -> Result<TxStatus, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "getSignatureStatuses",
            json!([[tx_hash], {"searchTransactionHistory": true}]),
        )
        .await?;

        let status = result
            .get("value")
            .and_then(Value::as_array)
            .and_then(|v| v.first())
            .ok_or_else(|| {
                ChainError::InvalidResponse("getSignatureStatuses missing value".to_string())
            })?;

        parse_signature_status(status)
    }

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<String, ChainError> {
        let result = rpc_call(
            &self.client,
            &self.rpc_url,
            "bridge_submitPayout",
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

        extract_string(&result, "signature").ok_or_else(|| {
            ChainError::InvalidResponse("bridge_submitPayout missing signature".to_string())
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

    const LUNES_ADDR: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";

    #[test]
    fn memo_bare_address() {
        let (address, fee_asset, invalid) = parse_memo(LUNES_ADDR);
        assert_eq!(address.as_deref(), Some(LUNES_ADDR));
        assert_eq!(fee_asset, FeeAsset::Lusdt);
        assert!(invalid.is_none());
    }

    #[test]
    fn memo_json_with_fee_asset() {
        let memo = format!(r#"{{"address": "{}", "fee_asset": "lunes"}}"#, LUNES_ADDR);
        let (address, fee_asset, invalid) = parse_memo(&memo);
        assert_eq!(address.as_deref(), Some(LUNES_ADDR));
        assert_eq!(fee_asset, FeeAsset::Lunes);
        assert!(invalid.is_none());
    }

    #[test]
    fn memo_invalid_address_keeps_reason() {
        let (address, _, invalid) = parse_memo("not-a-real-address");
        assert_eq!(address.as_deref(), Some("not-a-real-address"));
        assert!(invalid.is_some());
    }

    #[test]
    fn memo_empty_is_invalid() {
        let (address, _, invalid) = parse_memo("   ");
        assert!(address.is_none());
        assert_eq!(invalid.as_deref(), Some("empty memo"));
    }

    #[test]
    fn normalize_deposit_happy_path() {
        let raw = json!({
            "signature": "5Sig",
            "instruction_index": 1,
            "slot": 250_000_000u64,
            "sender": "7EcDhSYGxXyscszYEp35KHN8vvw3svAuLKTzXwCFLtV",
            "amount": "100000000",
            "memo": LUNES_ADDR,
        });
        let event = normalize_deposit(&raw).unwrap();
        assert_eq!(event.direction, Direction::Deposit);
        assert_eq!(event.amount, 100_000_000);
        assert_eq!(event.log_index, 1);
        assert_eq!(event.destination_address.as_deref(), Some(LUNES_ADDR));
        assert!(event.invalid_reason.is_none());
    }

    #[test]
    fn normalize_deposit_zero_amount_is_flagged() {
        let raw = json!({
            "signature": "5Sig",
            "instruction_index": 0,
            "slot": 1u64,
            "sender": "sender",
            "amount": "0",
            "memo": LUNES_ADDR,
        });
        let event = normalize_deposit(&raw).unwrap();
        assert_eq!(event.invalid_reason.as_deref(), Some("zero amount"));
    }

    #[test]
    fn signature_status_finalized_is_included() {
        let status = json!({"slot": 1000u64, "err": null, "confirmationStatus": "finalized"});
        let parsed = parse_signature_status(&status).unwrap();
        assert_eq!(parsed, TxStatus::Included { height: 1000 });
    }

    #[test]
    fn signature_status_below_finalized_is_not_included() {
        // A processed or confirmed commitment can still be dropped by a
        // fork, so it must not complete a payout.
        for commitment in ["processed", "confirmed"] {
            let status =
                json!({"slot": 1000u64, "err": null, "confirmationStatus": commitment});
            let parsed = parse_signature_status(&status).unwrap();
            assert_eq!(parsed, TxStatus::NotFound, "commitment {}", commitment);
        }

        // Missing commitment field is treated the same way.
        let status = json!({"slot": 1000u64, "err": null});
        assert_eq!(parse_signature_status(&status).unwrap(), TxStatus::NotFound);
    }

    #[test]
    fn signature_status_error_is_failed() {
        let status = json!({
            "slot": 1000u64,
            "err": {"InstructionError": [0, "Custom"]},
            "confirmationStatus": "finalized",
        });
        let parsed = parse_signature_status(&status).unwrap();
        assert!(matches!(parsed, TxStatus::Failed { .. }));
    }

    #[test]
    fn signature_status_null_is_not_found() {
        assert_eq!(
            parse_signature_status(&Value::Null).unwrap(),
            TxStatus::NotFound
        );
    }

    #[test]
    fn normalize_deposit_without_signature_is_dropped() {
        let raw = json!({"instruction_index": 0, "slot": 1u64, "sender": "s", "amount": "1"});
        assert!(normalize_deposit(&raw).is_none());
    }
}
