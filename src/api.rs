//! Read-only HTTP API.
//!
//! Exposes ledger state for operators and support tooling. The API never
//! mutates records; every write path stays inside the orchestrator.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::ledger::{BridgeRecord, Ledger};
use crate::metrics;
use crate::types::{BridgeState, ChainId};

#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<dyn Ledger>,
    pub started_at: std::time::Instant,
}

impl ApiState {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            started_at: std::time::Instant::now(),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/transactions", get(list_transactions))
        .route("/transactions/{id}", get(get_transaction))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn serve(
    bind: &str,
    state: ApiState,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await;
        })
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_secs: u64,
    records: StateCounts,
    cursors: CursorView,
}

#[derive(Serialize)]
struct StateCounts {
    detected: i64,
    confirming: i64,
    fee_computed: i64,
    executing: i64,
    completed: i64,
    failed: i64,
}

#[derive(Serialize)]
struct CursorView {
    solana: Option<u64>,
    lunes: Option<u64>,
}

async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, StatusCode> {
    let mut counts = [0i64; 6];
    let states = [
        BridgeState::Detected,
        BridgeState::Confirming,
        BridgeState::FeeComputed,
        BridgeState::Executing,
        BridgeState::Completed,
        BridgeState::Failed,
    ];
    for (slot, bridge_state) in counts.iter_mut().zip(states) {
        *slot = state
            .ledger
            .count_by_state(bridge_state)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        metrics::RECORDS_BY_STATE
            .with_label_values(&[bridge_state.as_str()])
            .set(*slot);
    }

    let solana = state
        .ledger
        .cursor(ChainId::Solana)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let lunes = state
        .ledger
        .cursor(ChainId::Lunes)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        records: StateCounts {
            detected: counts[0],
            confirming: counts[1],
            fee_computed: counts[2],
            executing: counts[3],
            completed: counts[4],
            failed: counts[5],
        },
        cursors: CursorView { solana, lunes },
    }))
}

#[derive(Deserialize)]
struct ListQuery {
    address: String,
}

async fn list_transactions(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TransactionView>>, StatusCode> {
    let records = state
        .ledger
        .by_source_address(&query.address)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(records.into_iter().map(TransactionView::from).collect()))
}

async fn get_transaction(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionView>, StatusCode> {
    let record = state
        .ledger
        .get(&id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(TransactionView::from(record)))
}

async fn render_metrics() -> impl IntoResponse {
    metrics::render()
}

/// A record plus a derived step timeline for support tooling.
#[derive(Serialize)]
pub struct TransactionView {
    pub record: BridgeRecord,
    pub steps: Vec<StepView>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct StepView {
    pub name: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl From<BridgeRecord> for TransactionView {
    fn from(record: BridgeRecord) -> Self {
        let steps = step_timeline(&record);
        Self { record, steps }
    }
}

/// Derive the step timeline from the record. Failed collapses the remaining
/// steps; completed marks everything done. The record only keeps two
/// timestamps, so the detected step carries `created_at`, the step the
/// record last moved to carries `updated_at`, and intermediate done steps
/// have none. The executing and completed steps carry the destination hash
/// once one is recorded.
pub(crate) fn step_timeline(record: &BridgeRecord) -> Vec<StepView> {
    const PIPELINE: [(&str, BridgeState); 4] = [
        ("detected", BridgeState::Detected),
        ("confirming", BridgeState::Confirming),
        ("fee_computed", BridgeState::FeeComputed),
        ("executing", BridgeState::Executing),
    ];

    let state = record.state;
    if state == BridgeState::Failed {
        return vec![StepView {
            name: "failed",
            status: "failed",
            timestamp: Some(record.updated_at),
            tx_hash: record.destination_tx_hash.clone(),
        }];
    }

    let reached = |step: BridgeState| -> &'static str {
        let order = |s: BridgeState| PIPELINE.iter().position(|(_, p)| *p == s);
        match (order(step), order(state)) {
            // Completed: everything in the pipeline is behind us.
            (_, None) => "done",
            (Some(a), Some(b)) if a < b => "done",
            (Some(a), Some(b)) if a == b => "in_progress",
            _ => "pending",
        }
    };

    let mut steps: Vec<StepView> = PIPELINE
        .iter()
        .map(|(name, step)| {
            let status = reached(*step);
            let timestamp = if *step == BridgeState::Detected {
                Some(record.created_at)
            } else if *step == state {
                Some(record.updated_at)
            } else {
                None
            };
            let tx_hash = if *step == BridgeState::Executing && status != "pending" {
                record.destination_tx_hash.clone()
            } else {
                None
            };
            StepView {
                name,
                status,
                timestamp,
                tx_hash,
            }
        })
        .collect();
    if state == BridgeState::Completed {
        steps.push(StepView {
            name: "completed",
            status: "done",
            timestamp: Some(record.updated_at),
            tx_hash: record.destination_tx_hash.clone(),
        });
    } else {
        steps.push(StepView {
            name: "completed",
            status: "pending",
            timestamp: None,
            tx_hash: None,
        });
    }
    steps
}
