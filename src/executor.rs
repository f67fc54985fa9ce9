//! Destination-chain executor.
//!
//! Drives a record from `FeeComputed` through `Executing` to a terminal
//! state. The at-most-once discipline: the record is moved to `Executing`
//! and persisted *before* the submit RPC leaves the process, every
//! submission carries the record's deterministic reference, and an
//! interrupted submission is recovered by asking the signer for that
//! reference instead of submitting again.
//!
//! Each call makes at most one submission attempt and one inclusion probe,
//! then returns; backoff between attempts is enforced against the record's
//! `updated_at` across scan passes. The executor never sleeps, so one
//! slow record cannot hold up the rest of the queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::chains::{ChainClient, ChainError, TransferRequest, TxStatus};
use crate::ids::submission_reference;
use crate::ledger::{BridgeRecord, Ledger, TransitionPatch};
use crate::retry::RetryConfig;
use crate::types::{BridgeState, ChainId, Direction};

/// What one execution pass did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    /// Submitted (or adopted) but not yet included, or waiting out a
    /// backoff; picked up again by the next orchestrator pass.
    Pending,
    /// Mint volume cap or circuit breaker; record left in `FeeComputed`.
    Deferred,
    /// Record was not in an executable state (lost CAS race or terminal).
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryConfig,
    /// Cumulative destination-amount cap per hour for mints. Zero disables.
    pub max_mint_volume_per_hour: u128,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_mint_volume_per_hour: 0,
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// Pauses submission after a run of consecutive failures. While open,
/// records stay where they are and the scan pass brings them back once the
/// cooldown elapses.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    pub fn is_open(&mut self, now: DateTime<Utc>) -> bool {
        match self.open_until {
            Some(until) if now < until => true,
            Some(_) => {
                // Cooldown over; half-open, allow traffic again.
                self.open_until = None;
                self.consecutive_failures = 0;
                false
            }
            None => false,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.open_until =
                Some(now + chrono::Duration::from_std(self.cooldown).unwrap_or_default());
        }
    }
}

/// One-hour cap on cumulative minted volume, matching the token contract's
/// mint rate guard: every reservation adds the mint amount to the window
/// total, and a mint that would push the total over the cap is deferred.
#[derive(Debug)]
pub struct MintRateWindow {
    max_volume_per_hour: u128,
    window_start: DateTime<Utc>,
    minted: u128,
}

impl MintRateWindow {
    pub fn new(max_volume_per_hour: u128) -> Self {
        Self {
            max_volume_per_hour,
            window_start: Utc::now(),
            minted: 0,
        }
    }

    /// Try to reserve `amount` of mint volume. Zero cap disables the guard.
    pub fn try_acquire(&mut self, amount: u128, now: DateTime<Utc>) -> bool {
        if self.max_volume_per_hour == 0 {
            return true;
        }
        if now - self.window_start >= chrono::Duration::hours(1) {
            self.window_start = now;
            self.minted = 0;
        }
        let proposed = self.minted.saturating_add(amount);
        if proposed > self.max_volume_per_hour {
            return false;
        }
        self.minted = proposed;
        true
    }
}

pub struct Executor {
    ledger: Arc<dyn Ledger>,
    clients: HashMap<ChainId, Arc<dyn ChainClient>>,
    config: ExecutorConfig,
    mint_window: Mutex<MintRateWindow>,
    breaker: Mutex<CircuitBreaker>,
}

impl Executor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        clients: HashMap<ChainId, Arc<dyn ChainClient>>,
        config: ExecutorConfig,
    ) -> Self {
        let mint_window = Mutex::new(MintRateWindow::new(config.max_mint_volume_per_hour));
        let breaker = Mutex::new(CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown,
        ));
        Self {
            ledger,
            clients,
            config,
            mint_window,
            breaker,
        }
    }

    fn client_for(&self, chain: ChainId) -> Option<&Arc<dyn ChainClient>> {
        self.clients.get(&chain)
    }

    /// Execute one record. The record is re-read from the ledger at each
    /// decision point; all state changes go through CAS transitions.
    pub async fn execute(&self, id: &str) -> eyre::Result<ExecutionOutcome> {
        let Some(record) = self.ledger.get(id).await? else {
            return Ok(ExecutionOutcome::Skipped);
        };

        match record.state {
            BridgeState::FeeComputed => self.execute_fresh(record).await,
            // Interrupted earlier run; resume from the persisted marker.
            BridgeState::Executing => self.resume(record).await,
            _ => Ok(ExecutionOutcome::Skipped),
        }
    }

    async fn execute_fresh(&self, record: BridgeRecord) -> eyre::Result<ExecutionOutcome> {
        let open = self
            .breaker
            .lock()
            .expect("breaker lock poisoned")
            .is_open(Utc::now());
        if open {
            info!(id = %record.id, "circuit breaker open, deferring");
            return Ok(ExecutionOutcome::Deferred);
        }

        if record.direction == Direction::Deposit {
            let acquired = self
                .mint_window
                .lock()
                .expect("mint window lock poisoned")
                .try_acquire(record.destination_amount(), Utc::now());
            if !acquired {
                info!(
                    id = %record.id,
                    amount = record.destination_amount(),
                    "mint volume cap reached, deferring"
                );
                return Ok(ExecutionOutcome::Deferred);
            }
        }

        // Persist the Executing marker before anything leaves the process.
        let moved = self
            .ledger
            .transition(
                &record.id,
                &[BridgeState::FeeComputed],
                BridgeState::Executing,
                TransitionPatch::default(),
            )
            .await?;
        if !moved {
            return Ok(ExecutionOutcome::Skipped);
        }

        self.submit_and_await(record).await
    }

    /// A record found in `Executing` at startup or on a scan pass. A
    /// submission may or may not have left the previous process; the signer
    /// is the authority, queried by reference.
    async fn resume(&self, record: BridgeRecord) -> eyre::Result<ExecutionOutcome> {
        if record.destination_tx_hash.is_some() {
            return self.await_inclusion(record).await;
        }

        let Some(client) = self.client_for(record.direction.destination_chain()) else {
            return Ok(ExecutionOutcome::Skipped);
        };
        let reference = submission_reference(&record.id);
        match client.find_by_reference(&reference).await {
            Ok(Some(tx_hash)) => {
                info!(id = %record.id, %tx_hash, "adopted in-flight submission");
                self.adopt_hash(&record.id, &tx_hash).await?;
                let Some(record) = self.ledger.get(&record.id).await? else {
                    return Ok(ExecutionOutcome::Skipped);
                };
                self.await_inclusion(record).await
            }
            // Nothing landed under this reference; safe to submit now.
            Ok(None) => self.submit_and_await(record).await,
            Err(e) => {
                warn!(id = %record.id, error = %e, "reference lookup failed, will retry");
                Ok(ExecutionOutcome::Pending)
            }
        }
    }

    /// One submission attempt. Transient failures persist the bumped retry
    /// count and hand the record back to the scan pass; the backoff window
    /// is measured from the record's last transition.
    async fn submit_and_await(&self, record: BridgeRecord) -> eyre::Result<ExecutionOutcome> {
        let destination = record.direction.destination_chain();
        let Some(client) = self.client_for(destination) else {
            return Ok(ExecutionOutcome::Skipped);
        };
        let Some(recipient) = record.destination_address.clone() else {
            return self
                .fail(&record.id, "no destination address at execution")
                .await;
        };

        if record.retry_count > 0 {
            let backoff = self.config.retry.backoff_for_attempt(record.retry_count - 1);
            let ready =
                record.updated_at + chrono::Duration::from_std(backoff).unwrap_or_default();
            if Utc::now() < ready {
                return Ok(ExecutionOutcome::Pending);
            }
        }

        let request = TransferRequest {
            recipient,
            amount: record.destination_amount(),
            reference: submission_reference(&record.id),
        };

        let tx_hash = match client.submit_transfer(&request).await {
            Ok(tx_hash) => tx_hash,
            Err(ChainError::AlreadyProcessed(_)) => {
                // The signer has it; adopt instead of resubmitting.
                match client.find_by_reference(&request.reference).await {
                    Ok(Some(tx_hash)) => tx_hash,
                    Ok(None) | Err(_) => return Ok(ExecutionOutcome::Pending),
                }
            }
            Err(e) if e.is_transient() => {
                if self.config.retry.should_retry(record.retry_count) {
                    let attempt = record.retry_count + 1;
                    warn!(
                        id = %record.id,
                        attempt,
                        error = %e,
                        "transient submission error, will retry after backoff"
                    );
                    self.ledger
                        .transition(
                            &record.id,
                            &[BridgeState::Executing],
                            BridgeState::Executing,
                            TransitionPatch {
                                retry_count: Some(attempt),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(ExecutionOutcome::Pending);
                }
                return self
                    .fail(&record.id, &format!("retries exhausted: {}", e))
                    .await;
            }
            Err(e) => {
                return self
                    .fail(&record.id, &format!("submission rejected: {}", e))
                    .await;
            }
        };

        info!(
            id = %record.id,
            direction = %record.direction,
            %tx_hash,
            amount = record.destination_amount(),
            "submitted destination transaction"
        );
        self.breaker
            .lock()
            .expect("breaker lock poisoned")
            .record_success();
        crate::metrics::SUBMISSIONS
            .with_label_values(&[record.direction.as_str()])
            .inc();
        self.adopt_hash(&record.id, &tx_hash).await?;
        let Some(record) = self.ledger.get(&record.id).await? else {
            return Ok(ExecutionOutcome::Skipped);
        };
        self.await_inclusion(record).await
    }

    /// Record the destination hash without leaving `Executing`. Set-once at
    /// the ledger level, so adopting an already-recorded hash is a no-op.
    async fn adopt_hash(&self, id: &str, tx_hash: &str) -> eyre::Result<()> {
        self.ledger
            .transition(
                id,
                &[BridgeState::Executing],
                BridgeState::Executing,
                TransitionPatch {
                    destination_tx_hash: Some(tx_hash.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// One inclusion probe. The destination client only reports `Included`
    /// once the transaction is chain-finalized, so a `Completed` write here
    /// can never be undone by a fork.
    async fn await_inclusion(&self, record: BridgeRecord) -> eyre::Result<ExecutionOutcome> {
        let Some(client) = self.client_for(record.direction.destination_chain()) else {
            return Ok(ExecutionOutcome::Skipped);
        };
        let Some(tx_hash) = record.destination_tx_hash.clone() else {
            return Ok(ExecutionOutcome::Pending);
        };

        match client.tx_status(&tx_hash).await {
            Ok(TxStatus::Included { height }) => {
                let moved = self
                    .ledger
                    .transition(
                        &record.id,
                        &[BridgeState::Executing],
                        BridgeState::Completed,
                        TransitionPatch::default(),
                    )
                    .await?;
                if moved {
                    info!(id = %record.id, %tx_hash, height, "bridge operation completed");
                }
                Ok(ExecutionOutcome::Completed)
            }
            Ok(TxStatus::Failed { reason }) => {
                let reason = reason.unwrap_or_else(|| "destination tx reverted".to_string());
                self.fail(&record.id, &format!("destination failure: {}", reason))
                    .await
            }
            // Not finalized yet; the scan pass will probe again.
            Ok(TxStatus::NotFound) => Ok(ExecutionOutcome::Pending),
            Err(e) => {
                debug!(id = %record.id, error = %e, "inclusion probe failed, will retry");
                Ok(ExecutionOutcome::Pending)
            }
        }
    }

    async fn fail(&self, id: &str, reason: &str) -> eyre::Result<ExecutionOutcome> {
        warn!(%id, %reason, "bridge operation failed");
        self.breaker
            .lock()
            .expect("breaker lock poisoned")
            .record_failure(Utc::now());
        self.ledger
            .transition(
                id,
                &[BridgeState::Executing],
                BridgeState::Failed,
                TransitionPatch::failure(reason),
            )
            .await?;
        Ok(ExecutionOutcome::Failed)
    }
}
