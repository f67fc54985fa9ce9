//! Common types for the LUSDT cross-chain relayer.
//!
//! The central vocabulary here mirrors the bridge contracts: a deposit of
//! USDT on Solana mints LUSDT on Lunes, and a burn of LUSDT on Lunes pays
//! out USDT on Solana. Every observed on-chain event is normalized into a
//! [`BridgeEvent`] before it touches the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two chains the relayer bridges between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    /// Chain A: origin chain holding real USDT in the bridge custody account.
    Solana,
    /// Chain B: destination chain where wrapped LUSDT is minted and burned.
    Lunes,
}

impl ChainId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Solana => "solana",
            ChainId::Lunes => "lunes",
        }
    }

    pub fn parse(s: &str) -> Option<ChainId> {
        match s {
            "solana" => Some(ChainId::Solana),
            "lunes" => Some(ChainId::Lunes),
            _ => None,
        }
    }

    /// The chain on the other side of the bridge.
    pub fn counterpart(&self) -> ChainId {
        match self {
            ChainId::Solana => ChainId::Lunes,
            ChainId::Lunes => ChainId::Solana,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a bridge operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Solana → Lunes: USDT deposited to custody, LUSDT minted.
    Deposit,
    /// Lunes → Solana: LUSDT burned, USDT paid out from custody.
    Redemption,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "deposit",
            Direction::Redemption => "redemption",
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "deposit" => Some(Direction::Deposit),
            "redemption" => Some(Direction::Redemption),
            _ => None,
        }
    }

    /// The chain the triggering event was observed on.
    pub fn source_chain(&self) -> ChainId {
        match self {
            Direction::Deposit => ChainId::Solana,
            Direction::Redemption => ChainId::Lunes,
        }
    }

    /// The chain where the completing transaction is submitted.
    pub fn destination_chain(&self) -> ChainId {
        self.source_chain().counterpart()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a [`crate::ledger::BridgeRecord`].
///
/// Transitions are driven exclusively by the orchestrator through the
/// ledger's compare-and-swap primitive:
///
/// ```text
/// Detected -> Confirming -> FeeComputed -> Executing -> Completed
///     |            |             |             `-------> Failed
///     `------------+-------------+---------------------> Failed
/// ```
///
/// `Completed` and `Failed` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Detected,
    Confirming,
    FeeComputed,
    Executing,
    Completed,
    Failed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Detected => "detected",
            BridgeState::Confirming => "confirming",
            BridgeState::FeeComputed => "fee_computed",
            BridgeState::Executing => "executing",
            BridgeState::Completed => "completed",
            BridgeState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<BridgeState> {
        match s {
            "detected" => Some(BridgeState::Detected),
            "confirming" => Some(BridgeState::Confirming),
            "fee_computed" => Some(BridgeState::FeeComputed),
            "executing" => Some(BridgeState::Executing),
            "completed" => Some(BridgeState::Completed),
            "failed" => Some(BridgeState::Failed),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Completed | BridgeState::Failed)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Asset the user chose to pay the bridge fee in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FeeAsset {
    /// Origin asset (USDT on Solana).
    Usdt,
    /// Wrapped asset (LUSDT on Lunes).
    Lusdt,
    /// Settlement asset (native LUNES).
    Lunes,
}

impl FeeAsset {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeAsset::Usdt => "usdt",
            FeeAsset::Lusdt => "lusdt",
            FeeAsset::Lunes => "lunes",
        }
    }

    pub fn parse(s: &str) -> Option<FeeAsset> {
        match s.to_ascii_lowercase().as_str() {
            "usdt" => Some(FeeAsset::Usdt),
            "lusdt" => Some(FeeAsset::Lusdt),
            "lunes" => Some(FeeAsset::Lunes),
            _ => None,
        }
    }

    /// Smallest-unit decimals of the asset.
    pub fn decimals(&self) -> u32 {
        match self {
            FeeAsset::Usdt => 6,
            FeeAsset::Lusdt => 6,
            FeeAsset::Lunes => 8,
        }
    }
}

impl fmt::Display for FeeAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A chain event normalized by the ingestor, ready for the ledger.
///
/// One qualifying raw event produces exactly one `BridgeEvent`. Events with
/// a malformed or missing destination address are still emitted, with
/// `invalid_reason` set, so the user's funds stay traceable; the
/// orchestrator fails such records instead of silently dropping them.
#[derive(Debug, Clone)]
pub struct BridgeEvent {
    pub direction: Direction,
    pub source_tx_hash: String,
    /// Position of the qualifying event within the source transaction.
    pub log_index: u32,
    /// Amount in smallest units of the source asset. Zero is invalid.
    pub amount: u128,
    pub source_address: String,
    /// Destination address extracted from the memo (deposits) or the burn
    /// payload (redemptions). `None` when absent.
    pub destination_address: Option<String>,
    pub fee_asset: FeeAsset,
    /// Height/slot of the block the source transaction was included in.
    pub source_block_height: u64,
    /// Set when normalization found the event structurally unusable.
    pub invalid_reason: Option<String>,
}
