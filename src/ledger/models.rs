//! Ledger row types.
//!
//! Amounts are u128 in memory and NUMERIC(78,0) in the database; the
//! Postgres implementation moves them as text to avoid BigDecimal
//! conversions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::record_id;
use crate::types::{BridgeEvent, BridgeState, ChainId, Direction, FeeAsset};

/// One cross-chain operation, from detection to completion or failure.
/// Never deleted; terminal records are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRecord {
    /// keccak256(source_chain, source_tx_hash, log_index), hex.
    pub id: String,
    pub direction: Direction,
    pub source_chain: ChainId,
    /// Immutable once set; the natural external key.
    pub source_tx_hash: String,
    pub log_index: u32,
    /// Smallest-unit amount of the source asset. Immutable after detection.
    pub amount: u128,
    pub source_address: String,
    pub destination_address: Option<String>,
    /// Set exactly once, when the completing transaction is submitted.
    pub destination_tx_hash: Option<String>,
    pub state: BridgeState,
    /// Frozen at detection time so later config changes never apply
    /// retroactively to in-flight records.
    pub required_confirmations: u32,
    /// Monotonically non-decreasing; reorg regressions are anomalies, not
    /// decreases.
    pub observed_confirmations: u32,
    pub source_block_height: u64,
    pub fee_amount: Option<u128>,
    pub fee_asset: FeeAsset,
    pub fee_bps: Option<u16>,
    /// Rolling-volume read frozen at fee computation time.
    pub volume_at_fee_usd: Option<u128>,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// Changes only on state transition.
    pub updated_at: DateTime<Utc>,
}

impl BridgeRecord {
    /// Net amount the destination transaction carries: amount minus fee
    /// when the fee is deducted from the bridged asset, full amount when
    /// the fee is paid in the settlement asset.
    pub fn destination_amount(&self) -> u128 {
        match self.fee_asset {
            FeeAsset::Lunes => self.amount,
            FeeAsset::Usdt | FeeAsset::Lusdt => {
                self.amount.saturating_sub(self.fee_amount.unwrap_or(0))
            }
        }
    }
}

/// Insert payload for a newly ingested event.
#[derive(Debug, Clone)]
pub struct NewBridgeRecord {
    pub id: String,
    pub direction: Direction,
    pub source_chain: ChainId,
    pub source_tx_hash: String,
    pub log_index: u32,
    pub amount: u128,
    pub source_address: String,
    pub destination_address: Option<String>,
    pub fee_asset: FeeAsset,
    pub required_confirmations: u32,
    pub source_block_height: u64,
    pub failure_reason: Option<String>,
}

impl NewBridgeRecord {
    /// Build an insert payload from a normalized event, freezing the
    /// currently-configured confirmation threshold onto the record.
    pub fn from_event(event: &BridgeEvent, required_confirmations: u32) -> Self {
        let source_chain = event.direction.source_chain();
        Self {
            id: record_id(source_chain, &event.source_tx_hash, event.log_index),
            direction: event.direction,
            source_chain,
            source_tx_hash: event.source_tx_hash.clone(),
            log_index: event.log_index,
            amount: event.amount,
            source_address: event.source_address.clone(),
            destination_address: event.destination_address.clone(),
            fee_asset: event.fee_asset,
            required_confirmations,
            source_block_height: event.source_block_height,
            failure_reason: event.invalid_reason.clone(),
        }
    }
}

/// Fields a CAS transition may set along with the new state.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    /// Written with COALESCE semantics: never overwrites an existing hash.
    pub destination_tx_hash: Option<String>,
    pub fee_amount: Option<u128>,
    pub fee_bps: Option<u16>,
    pub volume_at_fee_usd: Option<u128>,
    pub failure_reason: Option<String>,
    pub retry_count: Option<u32>,
}

impl TransitionPatch {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> BridgeEvent {
        BridgeEvent {
            direction: Direction::Deposit,
            source_tx_hash: "sigA".into(),
            log_index: 2,
            amount: 1_000_000,
            source_address: "src".into(),
            destination_address: Some("dest".into()),
            fee_asset: FeeAsset::Usdt,
            source_block_height: 100,
            invalid_reason: None,
        }
    }

    #[test]
    fn from_event_derives_stable_id() {
        let a = NewBridgeRecord::from_event(&event(), 32);
        let b = NewBridgeRecord::from_event(&event(), 32);
        assert_eq!(a.id, b.id);
        assert_eq!(a.source_chain, ChainId::Solana);
        assert_eq!(a.required_confirmations, 32);
    }

    #[test]
    fn destination_amount_deducts_bridged_asset_fee() {
        let new = NewBridgeRecord::from_event(&event(), 1);
        let now = Utc::now();
        let mut record = BridgeRecord {
            id: new.id,
            direction: new.direction,
            source_chain: new.source_chain,
            source_tx_hash: new.source_tx_hash,
            log_index: new.log_index,
            amount: 100_000_000,
            source_address: new.source_address,
            destination_address: new.destination_address,
            destination_tx_hash: None,
            state: BridgeState::FeeComputed,
            required_confirmations: 1,
            observed_confirmations: 1,
            source_block_height: 100,
            fee_amount: Some(600_000),
            fee_asset: FeeAsset::Usdt,
            fee_bps: Some(60),
            volume_at_fee_usd: Some(0),
            failure_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(record.destination_amount(), 99_400_000);

        // Settlement-asset fees leave the bridged amount whole.
        record.fee_asset = FeeAsset::Lunes;
        assert_eq!(record.destination_amount(), 100_000_000);
    }
}
