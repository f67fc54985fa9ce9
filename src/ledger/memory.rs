//! In-memory ledger.
//!
//! Backs the test suite and local dry runs. Semantics are identical to the
//! Postgres implementation: idempotent insert, CAS transitions, monotonic
//! confirmations, set-once destination hash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::fees::VolumeWindow;
use crate::types::{BridgeState, ChainId};

use super::models::{BridgeRecord, NewBridgeRecord, TransitionPatch};
use super::{InsertOutcome, Ledger, LedgerError};

#[derive(Default)]
struct Inner {
    records: HashMap<String, BridgeRecord>,
    cursors: HashMap<ChainId, u64>,
    volume: Option<VolumeWindow>,
}

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(record: &mut BridgeRecord, patch: TransitionPatch) {
    if let Some(hash) = patch.destination_tx_hash {
        // Set-once: never overwrite a hash that is already recorded.
        if record.destination_tx_hash.is_none() {
            record.destination_tx_hash = Some(hash);
        }
    }
    if patch.fee_amount.is_some() {
        record.fee_amount = patch.fee_amount;
    }
    if patch.fee_bps.is_some() {
        record.fee_bps = patch.fee_bps;
    }
    if patch.volume_at_fee_usd.is_some() {
        record.volume_at_fee_usd = patch.volume_at_fee_usd;
    }
    if patch.failure_reason.is_some() {
        record.failure_reason = patch.failure_reason;
    }
    if let Some(retries) = patch.retry_count {
        record.retry_count = retries;
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert(&self, new: &NewBridgeRecord) -> Result<InsertOutcome, LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        if inner.records.contains_key(&new.id) {
            return Ok(InsertOutcome::Duplicate);
        }
        let now = Utc::now();
        let record = BridgeRecord {
            id: new.id.clone(),
            direction: new.direction,
            source_chain: new.source_chain,
            source_tx_hash: new.source_tx_hash.clone(),
            log_index: new.log_index,
            amount: new.amount,
            source_address: new.source_address.clone(),
            destination_address: new.destination_address.clone(),
            destination_tx_hash: None,
            state: BridgeState::Detected,
            required_confirmations: new.required_confirmations,
            observed_confirmations: 0,
            source_block_height: new.source_block_height,
            fee_amount: None,
            fee_asset: new.fee_asset,
            fee_bps: None,
            volume_at_fee_usd: None,
            failure_reason: new.failure_reason.clone(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        inner.records.insert(new.id.clone(), record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn get(&self, id: &str) -> Result<Option<BridgeRecord>, LedgerError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        Ok(inner.records.get(id).cloned())
    }

    async fn by_source_address(&self, address: &str) -> Result<Vec<BridgeRecord>, LedgerError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        Ok(inner
            .records
            .values()
            .filter(|r| r.source_address == address)
            .cloned()
            .collect())
    }

    async fn non_terminal(&self) -> Result<Vec<BridgeRecord>, LedgerError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn transition(
        &self,
        id: &str,
        from: &[BridgeState],
        to: BridgeState,
        patch: TransitionPatch,
    ) -> Result<bool, LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let Some(record) = inner.records.get_mut(id) else {
            return Ok(false);
        };
        if record.state.is_terminal() || !from.contains(&record.state) {
            return Ok(false);
        }
        record.state = to;
        record.updated_at = Utc::now();
        apply_patch(record, patch);
        Ok(true)
    }

    async fn record_confirmations(&self, id: &str, observed: u32) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        if let Some(record) = inner.records.get_mut(id) {
            if observed > record.observed_confirmations {
                record.observed_confirmations = observed;
            }
        }
        Ok(())
    }

    async fn cursor(&self, chain: ChainId) -> Result<Option<u64>, LedgerError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        Ok(inner.cursors.get(&chain).copied())
    }

    async fn set_cursor(&self, chain: ChainId, height: u64) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        inner.cursors.insert(chain, height);
        Ok(())
    }

    async fn fee_volume(&self, now: DateTime<Utc>) -> Result<VolumeWindow, LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let window = inner
            .volume
            .get_or_insert_with(|| VolumeWindow::new(now))
            .clone();
        Ok(window)
    }

    async fn store_fee_volume(&self, window: &VolumeWindow) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        inner.volume = Some(window.clone());
        Ok(())
    }

    async fn count_by_state(&self, state: BridgeState) -> Result<i64, LedgerError> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        Ok(inner.records.values().filter(|r| r.state == state).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, FeeAsset};

    fn new_record(tx: &str) -> NewBridgeRecord {
        NewBridgeRecord {
            id: crate::ids::record_id(ChainId::Solana, tx, 0),
            direction: Direction::Deposit,
            source_chain: ChainId::Solana,
            source_tx_hash: tx.to_string(),
            log_index: 0,
            amount: 1_000_000,
            source_address: "sender".into(),
            destination_address: Some("recipient".into()),
            fee_asset: FeeAsset::Usdt,
            required_confirmations: 3,
            source_block_height: 10,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let ledger = MemoryLedger::new();
        let new = new_record("tx1");
        assert!(ledger.insert(&new).await.unwrap().is_inserted());
        assert!(!ledger.insert(&new).await.unwrap().is_inserted());
        assert_eq!(ledger.count_by_state(BridgeState::Detected).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transition_cas_enforces_from_states() {
        let ledger = MemoryLedger::new();
        let new = new_record("tx1");
        ledger.insert(&new).await.unwrap();

        // Wrong precondition: record is Detected, not Confirming.
        let moved = ledger
            .transition(
                &new.id,
                &[BridgeState::Confirming],
                BridgeState::FeeComputed,
                TransitionPatch::default(),
            )
            .await
            .unwrap();
        assert!(!moved);

        let moved = ledger
            .transition(
                &new.id,
                &[BridgeState::Detected],
                BridgeState::Confirming,
                TransitionPatch::default(),
            )
            .await
            .unwrap();
        assert!(moved);
    }

    #[tokio::test]
    async fn terminal_states_reject_transitions() {
        let ledger = MemoryLedger::new();
        let new = new_record("tx1");
        ledger.insert(&new).await.unwrap();
        ledger
            .transition(
                &new.id,
                &[BridgeState::Detected],
                BridgeState::Failed,
                TransitionPatch::failure("invalid destination"),
            )
            .await
            .unwrap();

        let moved = ledger
            .transition(
                &new.id,
                &[BridgeState::Failed],
                BridgeState::Confirming,
                TransitionPatch::default(),
            )
            .await
            .unwrap();
        assert!(!moved);
        let record = ledger.get(&new.id).await.unwrap().unwrap();
        assert_eq!(record.state, BridgeState::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("invalid destination"));
    }

    #[tokio::test]
    async fn confirmations_never_decrease() {
        let ledger = MemoryLedger::new();
        let new = new_record("tx1");
        ledger.insert(&new).await.unwrap();

        ledger.record_confirmations(&new.id, 5).await.unwrap();
        ledger.record_confirmations(&new.id, 3).await.unwrap();
        let record = ledger.get(&new.id).await.unwrap().unwrap();
        assert_eq!(record.observed_confirmations, 5);
    }

    #[tokio::test]
    async fn destination_hash_is_set_once() {
        let ledger = MemoryLedger::new();
        let new = new_record("tx1");
        ledger.insert(&new).await.unwrap();
        for state in [BridgeState::Confirming, BridgeState::FeeComputed, BridgeState::Executing] {
            let from = ledger.get(&new.id).await.unwrap().unwrap().state;
            ledger
                .transition(&new.id, &[from], state, TransitionPatch::default())
                .await
                .unwrap();
        }

        let patch = TransitionPatch {
            destination_tx_hash: Some("dest-1".into()),
            ..Default::default()
        };
        ledger
            .transition(&new.id, &[BridgeState::Executing], BridgeState::Executing, patch)
            .await
            .unwrap();

        let patch = TransitionPatch {
            destination_tx_hash: Some("dest-2".into()),
            ..Default::default()
        };
        ledger
            .transition(&new.id, &[BridgeState::Executing], BridgeState::Completed, patch)
            .await
            .unwrap();

        let record = ledger.get(&new.id).await.unwrap().unwrap();
        assert_eq!(record.destination_tx_hash.as_deref(), Some("dest-1"));
    }

    #[tokio::test]
    async fn cursors_round_trip() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.cursor(ChainId::Solana).await.unwrap(), None);
        ledger.set_cursor(ChainId::Solana, 42).await.unwrap();
        assert_eq!(ledger.cursor(ChainId::Solana).await.unwrap(), Some(42));
    }
}
