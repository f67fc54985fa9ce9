//! Chain watchers.
//!
//! One watcher per chain polls its event source from a persisted cursor,
//! normalizes qualifying events, and inserts them into the ledger. The
//! insert is idempotent, so overlap between polls (or a restart replaying
//! a range) never produces a second record. Newly inserted record ids are
//! handed to the orchestrator over an mpsc queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::chains::EventSource;
use crate::ledger::{Ledger, NewBridgeRecord};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Confirmation depth frozen onto each record this watcher creates.
    pub required_confirmations: u32,
    /// Height to begin from when no cursor is persisted yet.
    pub start_height: u64,
    /// Largest height range fetched in one poll.
    pub max_range: u64,
}

pub struct Watcher<S: EventSource> {
    source: Arc<S>,
    ledger: Arc<dyn Ledger>,
    config: WatcherConfig,
    work_tx: mpsc::Sender<String>,
}

impl<S: EventSource> Watcher<S> {
    pub fn new(
        source: Arc<S>,
        ledger: Arc<dyn Ledger>,
        config: WatcherConfig,
        work_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            source,
            ledger,
            config,
            work_tx,
        }
    }

    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let chain = self.source.chain();
        info!(%chain, "watcher started");
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(%chain, error = %e, "watcher poll failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(%chain, "watcher shutting down");
                    return;
                }
            }
        }
    }

    /// One poll: advance from the persisted cursor toward the chain tip,
    /// at most `max_range` heights. The cursor moves only after every event
    /// in the range has been inserted.
    pub async fn poll_once(&self) -> eyre::Result<usize> {
        let chain = self.source.chain();
        let latest = self.source.latest_height().await?;
        let from = match self.ledger.cursor(chain).await? {
            Some(cursor) => cursor + 1,
            None => self.config.start_height,
        };
        if from > latest {
            return Ok(0);
        }
        let to = latest.min(from + self.config.max_range - 1);

        let events = self.source.events_in_range(from, to).await?;
        let mut inserted = 0;
        for event in &events {
            let new = NewBridgeRecord::from_event(event, self.config.required_confirmations);
            if let Some(reason) = &event.invalid_reason {
                warn!(
                    %chain,
                    tx = %event.source_tx_hash,
                    %reason,
                    "ingesting structurally invalid event"
                );
            }
            let outcome = self.ledger.insert(&new).await?;
            if outcome.is_inserted() {
                inserted += 1;
                metrics::EVENTS_INGESTED
                    .with_label_values(&[chain.as_str()])
                    .inc();
                debug!(%chain, id = %new.id, tx = %new.source_tx_hash, "event ingested");
                // A full queue only delays pickup; the scan pass also
                // finds the record.
                let _ = self.work_tx.try_send(new.id.clone());
            }
        }

        self.ledger.set_cursor(chain, to).await?;
        Ok(inserted)
    }
}

/// Runs both chain watchers and tears them down together.
pub struct WatcherManager {
    tasks: JoinSet<()>,
    shutdown_txs: Vec<mpsc::Sender<()>>,
}

impl WatcherManager {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            shutdown_txs: Vec::new(),
        }
    }

    pub fn spawn<S: EventSource + 'static>(
        &mut self,
        source: Arc<S>,
        ledger: Arc<dyn Ledger>,
        config: WatcherConfig,
        work_tx: mpsc::Sender<String>,
    ) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_txs.push(shutdown_tx);
        let watcher = Watcher::new(source, ledger, config, work_tx);
        self.tasks.spawn(watcher.run(shutdown_rx));
    }

    /// Signal every watcher and wait for the tasks to drain.
    pub async fn shutdown(mut self) {
        for tx in &self.shutdown_txs {
            let _ = tx.send(()).await;
        }
        while self.tasks.join_next().await.is_some() {}
    }
}

impl Default for WatcherManager {
    fn default() -> Self {
        Self::new()
    }
}
