use std::collections::HashMap;
use std::sync::Arc;

use lusdt_relayer::api::{self, ApiState};
use lusdt_relayer::chains::{ChainClient, LunesClient, SolanaClient};
use lusdt_relayer::config::Config;
use lusdt_relayer::executor::{Executor, ExecutorConfig};
use lusdt_relayer::fees::HttpPriceOracle;
use lusdt_relayer::ledger::{pg, Ledger, PgLedger};
use lusdt_relayer::orchestrator::Orchestrator;
use lusdt_relayer::retry::RetryConfig;
use lusdt_relayer::types::ChainId;
use lusdt_relayer::watchers::{WatcherConfig, WatcherManager};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting LUSDT Bridge Relayer");

    let config = Config::from_env()?;
    tracing::info!(
        solana_confirmations = config.solana_required_confirmations,
        lunes_confirmations = config.lunes_required_confirmations,
        "Configuration loaded"
    );

    let pool = pg::create_pool(&config.database_url).await?;
    tracing::info!("Database connected");
    pg::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(pool));

    let solana = Arc::new(SolanaClient::new(
        config.solana_rpc_url.clone(),
        config.solana_custody_address.clone(),
        config.rpc_timeout,
    ));
    let lunes = Arc::new(LunesClient::new(
        config.lunes_rpc_url.clone(),
        config.rpc_timeout,
    ));
    let oracle = Arc::new(HttpPriceOracle::new(
        config.oracle_url.clone(),
        config.oracle_timeout,
    )?);

    let mut clients: HashMap<ChainId, Arc<dyn ChainClient>> = HashMap::new();
    clients.insert(ChainId::Solana, solana.clone());
    clients.insert(ChainId::Lunes, lunes.clone());

    let executor = Arc::new(Executor::new(
        ledger.clone(),
        clients.clone(),
        ExecutorConfig {
            retry: RetryConfig::default(),
            max_mint_volume_per_hour: config.max_mint_volume_per_hour,
            breaker_threshold: config.breaker_threshold,
            breaker_cooldown: config.breaker_cooldown,
        },
    ));
    let orchestrator = Orchestrator::new(
        ledger.clone(),
        clients,
        oracle,
        executor,
        config.fee_tiers.clone(),
        config.scan_interval,
    );

    // Work queue: watchers feed newly detected record ids, the orchestrator
    // is the single consumer.
    let (work_tx, work_rx) = tokio::sync::mpsc::channel::<String>(1024);

    let (shutdown_orch_tx, shutdown_orch_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (shutdown_api_tx, shutdown_api_rx) = tokio::sync::mpsc::channel::<()>(1);

    let mut watcher_manager = WatcherManager::new();
    watcher_manager.spawn(
        solana,
        ledger.clone(),
        WatcherConfig {
            poll_interval: config.solana_poll_interval,
            required_confirmations: config.solana_required_confirmations,
            start_height: config.solana_start_slot,
            max_range: config.watcher_max_range,
        },
        work_tx.clone(),
    );
    watcher_manager.spawn(
        lunes,
        ledger.clone(),
        WatcherConfig {
            poll_interval: config.lunes_poll_interval,
            required_confirmations: config.lunes_required_confirmations,
            start_height: config.lunes_start_block,
            max_range: config.watcher_max_range,
        },
        work_tx,
    );

    let api_state = ApiState::new(ledger.clone());
    let api_bind = config.api_bind.clone();
    tokio::spawn(async move {
        if let Err(e) = api::serve(&api_bind, api_state, shutdown_api_rx).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Managers initialized, starting processing");

    let orchestrator_handle = tokio::spawn(orchestrator.run(work_rx, shutdown_orch_rx));

    wait_for_shutdown_signal().await;

    // Watchers stop first so no new work arrives, then the orchestrator
    // finishes the record it is on and drains.
    watcher_manager.shutdown().await;
    let _ = shutdown_orch_tx.send(()).await;
    let _ = shutdown_api_tx.send(()).await;
    let _ = orchestrator_handle.await;

    tracing::info!("LUSDT Bridge Relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lusdt_relayer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
