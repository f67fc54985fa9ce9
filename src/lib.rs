//! LUSDT bridge relayer core.
//!
//! Observes USDT deposits on Solana and LUSDT burns on Lunes, tracks
//! per-chain confirmation depth, computes volume-tiered fees, and drives
//! each operation through a durable state machine so every deposit mints
//! at most once and every burn pays out at most once, across restarts.

pub mod address;
pub mod api;
pub mod chains;
pub mod config;
pub mod confirmation;
pub mod executor;
pub mod fees;
pub mod ids;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod types;
pub mod watchers;
