//! Prometheus metrics.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounter,
    IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref EVENTS_INGESTED: IntCounterVec = register_int_counter_vec!(
        "relayer_events_ingested_total",
        "Qualifying source-chain events inserted into the ledger",
        &["chain"]
    )
    .unwrap();
    pub static ref STATE_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "relayer_state_transitions_total",
        "Record state transitions, labeled by the state entered",
        &["to_state"]
    )
    .unwrap();
    pub static ref SUBMISSIONS: IntCounterVec = register_int_counter_vec!(
        "relayer_submissions_total",
        "Destination-chain submissions, labeled by direction",
        &["direction"]
    )
    .unwrap();
    pub static ref CONFIRMATION_REGRESSIONS: IntCounter = register_int_counter!(
        "relayer_confirmation_regressions_total",
        "Observed confirmation depth decreases (chain reorganizations)"
    )
    .unwrap();
    pub static ref RECORDS_BY_STATE: IntGaugeVec = register_int_gauge_vec!(
        "relayer_records_by_state",
        "Current ledger record count per state",
        &["state"]
    )
    .unwrap();
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_render() {
        EVENTS_INGESTED.with_label_values(&["solana"]).inc();
        STATE_TRANSITIONS.with_label_values(&["completed"]).inc();
        let rendered = render();
        assert!(rendered.contains("relayer_events_ingested_total"));
    }
}
