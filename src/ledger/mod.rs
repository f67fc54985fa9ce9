//! Transaction Ledger: the durable, keyed store of every bridge operation.
//!
//! The ledger is the single source of truth for idempotency and recovery.
//! All mutation goes through two primitives:
//!
//! - [`Ledger::insert`], idempotent on `(source_chain, source_tx_hash,
//!   log_index)`: a duplicate insert is a no-op, never an overwrite.
//! - [`Ledger::transition`], a compare-and-swap that moves a record to a
//!   new state only if its current state is in the expected set.
//!
//! No component read-modify-writes a record outside these, so duplicate
//! delivery from a re-subscribed stream cannot produce divergent state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::fees::VolumeWindow;
use crate::types::{BridgeState, ChainId};

pub mod memory;
pub mod models;
pub mod pg;

pub use memory::MemoryLedger;
pub use models::{BridgeRecord, NewBridgeRecord, TransitionPatch};
pub use pg::PgLedger;

/// Outcome of an idempotent insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// First time this source event was seen.
    Inserted(BridgeRecord),
    /// The source key already exists; the stored record is untouched.
    Duplicate,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt ledger row for {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Idempotent insert keyed on the source event coordinates.
    async fn insert(&self, new: &NewBridgeRecord) -> Result<InsertOutcome, LedgerError>;

    async fn get(&self, id: &str) -> Result<Option<BridgeRecord>, LedgerError>;

    async fn by_source_address(&self, address: &str) -> Result<Vec<BridgeRecord>, LedgerError>;

    /// Every record not in a terminal state, for recovery scans on startup
    /// and the orchestrator's periodic pass.
    async fn non_terminal(&self) -> Result<Vec<BridgeRecord>, LedgerError>;

    /// Atomic state transition. Returns `true` when the record was in one
    /// of the `from` states and has been moved to `to` with the patch
    /// applied; `false` when the precondition did not hold (including
    /// terminal states, which never appear in a valid `from` set).
    async fn transition(
        &self,
        id: &str,
        from: &[BridgeState],
        to: BridgeState,
        patch: TransitionPatch,
    ) -> Result<bool, LedgerError>;

    /// Record a new confirmation count. Monotonic: a value lower than the
    /// stored one is ignored (the caller reports the anomaly separately).
    async fn record_confirmations(&self, id: &str, observed: u32) -> Result<(), LedgerError>;

    /// Last block/slot the watcher for `chain` has fully processed.
    async fn cursor(&self, chain: ChainId) -> Result<Option<u64>, LedgerError>;

    async fn set_cursor(&self, chain: ChainId, height: u64) -> Result<(), LedgerError>;

    /// Current rolling fee-volume window (created on first read).
    async fn fee_volume(&self, now: DateTime<Utc>) -> Result<VolumeWindow, LedgerError>;

    async fn store_fee_volume(&self, window: &VolumeWindow) -> Result<(), LedgerError>;

    async fn count_by_state(&self, state: BridgeState) -> Result<i64, LedgerError>;
}
