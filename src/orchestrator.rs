//! The orchestrator: single consumer of the work queue, sole driver of
//! record state transitions.
//!
//! Every record id arrives here twice over: once from the watcher that
//! inserted it, and repeatedly from the periodic scan over non-terminal
//! records. Processing is idempotent per state, so the duplication is
//! harmless and makes the scan the recovery mechanism: after a restart the
//! first scan picks up exactly where the ledger says things stand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::address;
use crate::chains::{ChainClient, TxStatus};
use crate::confirmation::{self, Assessment};
use crate::executor::{ExecutionOutcome, Executor};
use crate::fees::{compute_fee, usd_value, FeeTierConfig, PriceOracle};
use crate::ledger::{BridgeRecord, Ledger, TransitionPatch};
use crate::metrics;
use crate::types::{BridgeState, ChainId, Direction, FeeAsset};

pub struct Orchestrator {
    ledger: Arc<dyn Ledger>,
    clients: HashMap<ChainId, Arc<dyn ChainClient>>,
    oracle: Arc<dyn PriceOracle>,
    executor: Arc<Executor>,
    fee_config: FeeTierConfig,
    scan_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        clients: HashMap<ChainId, Arc<dyn ChainClient>>,
        oracle: Arc<dyn PriceOracle>,
        executor: Arc<Executor>,
        fee_config: FeeTierConfig,
        scan_interval: Duration,
    ) -> Self {
        Self {
            ledger,
            clients,
            oracle,
            executor,
            fee_config,
            scan_interval,
        }
    }

    pub async fn run(
        self,
        mut work_rx: mpsc::Receiver<String>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("orchestrator started");

        // Startup recovery: walk everything the previous run left behind.
        if let Err(e) = self.scan().await {
            error!(error = %e, "startup recovery scan failed");
        }

        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Arm bodies run to completion before the next select, so a
            // shutdown is only ever observed between records.
            tokio::select! {
                Some(id) = work_rx.recv() => {
                    if let Err(e) = self.process(&id).await {
                        error!(%id, error = %e, "processing failed");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        error!(error = %e, "scan pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("orchestrator shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over every non-terminal record, oldest first.
    pub async fn scan(&self) -> eyre::Result<usize> {
        let records = self.ledger.non_terminal().await?;
        let count = records.len();
        for record in records {
            if let Err(e) = self.process(&record.id).await {
                error!(id = %record.id, error = %e, "processing failed during scan");
            }
        }
        Ok(count)
    }

    /// Advance one record by at most one lifecycle phase. Safe to call any
    /// number of times in any state.
    pub async fn process(&self, id: &str) -> eyre::Result<()> {
        let Some(record) = self.ledger.get(id).await? else {
            return Ok(());
        };

        match record.state {
            BridgeState::Detected => self.handle_detected(record).await,
            BridgeState::Confirming => self.handle_confirming(record).await,
            BridgeState::FeeComputed | BridgeState::Executing => {
                let outcome = self.executor.execute(id).await?;
                match outcome {
                    ExecutionOutcome::Completed => {
                        metrics::STATE_TRANSITIONS
                            .with_label_values(&["completed"])
                            .inc();
                    }
                    ExecutionOutcome::Failed => {
                        metrics::STATE_TRANSITIONS.with_label_values(&["failed"]).inc();
                    }
                    _ => {}
                }
                Ok(())
            }
            BridgeState::Completed | BridgeState::Failed => Ok(()),
        }
    }

    /// Input validation happens exactly once, on the way out of `Detected`.
    async fn handle_detected(&self, record: BridgeRecord) -> eyre::Result<()> {
        if let Some(reason) = detect_input_error(&record) {
            let moved = self
                .ledger
                .transition(
                    &record.id,
                    &[BridgeState::Detected],
                    BridgeState::Failed,
                    TransitionPatch::failure(reason.clone()),
                )
                .await?;
            if moved {
                warn!(id = %record.id, %reason, "record rejected at validation");
                metrics::STATE_TRANSITIONS.with_label_values(&["failed"]).inc();
            }
            return Ok(());
        }

        let moved = self
            .ledger
            .transition(
                &record.id,
                &[BridgeState::Detected],
                BridgeState::Confirming,
                TransitionPatch::default(),
            )
            .await?;
        if moved {
            debug!(id = %record.id, "record accepted, awaiting confirmations");
            metrics::STATE_TRANSITIONS
                .with_label_values(&["confirming"])
                .inc();
        }
        Ok(())
    }

    async fn handle_confirming(&self, record: BridgeRecord) -> eyre::Result<()> {
        let Some(client) = self.clients.get(&record.source_chain) else {
            return Ok(());
        };

        // The source transaction must still be on the canonical chain.
        match client.tx_status(&record.source_tx_hash).await {
            Ok(TxStatus::Included { .. }) => {}
            Ok(TxStatus::NotFound) => {
                warn!(
                    id = %record.id,
                    tx = %record.source_tx_hash,
                    "source transaction no longer visible, holding"
                );
                metrics::CONFIRMATION_REGRESSIONS.inc();
                return Ok(());
            }
            Ok(TxStatus::Failed { reason }) => {
                let reason = format!(
                    "source transaction reverted: {}",
                    reason.unwrap_or_default()
                );
                self.ledger
                    .transition(
                        &record.id,
                        &[BridgeState::Confirming],
                        BridgeState::Failed,
                        TransitionPatch::failure(reason),
                    )
                    .await?;
                metrics::STATE_TRANSITIONS.with_label_values(&["failed"]).inc();
                return Ok(());
            }
            Err(e) => {
                debug!(id = %record.id, error = %e, "status probe failed, will retry");
                return Ok(());
            }
        }

        let latest = match client.latest_height().await {
            Ok(h) => h,
            Err(e) => {
                debug!(id = %record.id, error = %e, "height probe failed, will retry");
                return Ok(());
            }
        };

        let observed = confirmation::depth(latest, record.source_block_height);
        match confirmation::assess(
            observed,
            record.observed_confirmations,
            record.required_confirmations,
        ) {
            Assessment::Regressed { observed, stored } => {
                warn!(
                    id = %record.id,
                    observed,
                    stored,
                    "confirmation depth regressed, holding"
                );
                metrics::CONFIRMATION_REGRESSIONS.inc();
                Ok(())
            }
            Assessment::Waiting { observed, required } => {
                self.ledger.record_confirmations(&record.id, observed).await?;
                debug!(id = %record.id, observed, required, "waiting for confirmations");
                Ok(())
            }
            Assessment::Satisfied { observed } => {
                self.ledger.record_confirmations(&record.id, observed).await?;
                self.compute_and_store_fee(record).await
            }
        }
    }

    /// Compute the fee, freeze it onto the record, and advance the rolling
    /// volume window. The window only moves when the CAS succeeds, so a
    /// replayed computation cannot double-count volume.
    async fn compute_and_store_fee(&self, record: BridgeRecord) -> eyre::Result<()> {
        let bridged = bridged_asset(record.direction);
        let (bridged_price, fee_price) = match (
            self.oracle.price_usd(bridged).await,
            self.oracle.price_usd(record.fee_asset).await,
        ) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                warn!(id = %record.id, error = %e, "price oracle unavailable, fee deferred");
                return Ok(());
            }
        };

        let now = Utc::now();
        let window = self.ledger.fee_volume(now).await?.rolled(now);

        let amount_usd = match usd_value(record.amount, bridged.decimals(), bridged_price) {
            Ok(v) => v,
            Err(e) => {
                return self.fail_input(&record, format!("fee computation: {}", e)).await;
            }
        };
        let quote = match compute_fee(
            &self.fee_config,
            amount_usd,
            window.volume_usd,
            record.fee_asset,
            fee_price,
        ) {
            Ok(q) => q,
            Err(e) => {
                return self.fail_input(&record, format!("fee computation: {}", e)).await;
            }
        };

        let moved = self
            .ledger
            .transition(
                &record.id,
                &[BridgeState::Confirming],
                BridgeState::FeeComputed,
                TransitionPatch {
                    fee_amount: Some(quote.fee_amount),
                    fee_bps: Some(quote.fee_bps),
                    volume_at_fee_usd: Some(quote.volume_before_usd),
                    ..Default::default()
                },
            )
            .await?;
        if moved {
            let mut advanced = window;
            advanced.volume_usd = quote.new_volume_usd;
            self.ledger.store_fee_volume(&advanced).await?;
            info!(
                id = %record.id,
                fee_bps = quote.fee_bps,
                fee_amount = quote.fee_amount,
                fee_asset = %quote.fee_asset,
                "fee computed"
            );
            metrics::STATE_TRANSITIONS
                .with_label_values(&["fee_computed"])
                .inc();
        }
        Ok(())
    }

    async fn fail_input(&self, record: &BridgeRecord, reason: String) -> eyre::Result<()> {
        warn!(id = %record.id, %reason, "record failed before execution");
        self.ledger
            .transition(
                &record.id,
                &[BridgeState::Detected, BridgeState::Confirming, BridgeState::FeeComputed],
                BridgeState::Failed,
                TransitionPatch::failure(reason),
            )
            .await?;
        metrics::STATE_TRANSITIONS.with_label_values(&["failed"]).inc();
        Ok(())
    }
}

/// Asset actually moving across the bridge for a given direction.
fn bridged_asset(direction: Direction) -> FeeAsset {
    match direction {
        Direction::Deposit => FeeAsset::Usdt,
        Direction::Redemption => FeeAsset::Lusdt,
    }
}

/// Structural problems that make a record unexecutable. Checked once, on
/// leaving `Detected`; these never retry.
fn detect_input_error(record: &BridgeRecord) -> Option<String> {
    if let Some(reason) = &record.failure_reason {
        return Some(reason.clone());
    }
    if record.amount == 0 {
        return Some("zero amount".to_string());
    }
    match &record.destination_address {
        None => Some("missing destination address".to_string()),
        Some(addr) => address::validate(record.direction.destination_chain(), addr)
            .err()
            .map(|e| e.to_string()),
    }
}
