//! Prometheus metrics
//!
//! Exposes metrics for:
//! - RPC latency and failures
//! - Transaction submissions, replacements and outcomes
//! - Nonce bookkeeping
//! - Gate decisions and operation results

use crate::error::{OperatorError, OperatorResult};

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::Address;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec,
    register_int_gauge_vec, Counter, CounterVec, Encoder, Histogram, HistogramVec,
    IntGaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // RPC metrics
    pub static ref RPC_REQUESTS: CounterVec = register_counter_vec!(
        "evm_operator_rpc_requests_total",
        "RPC requests by method and outcome",
        &["method", "outcome"]
    ).unwrap();

    pub static ref RPC_LATENCY: HistogramVec = register_histogram_vec!(
        "evm_operator_rpc_latency_seconds",
        "RPC request latency including retries",
        &["method"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "evm_operator_transactions_submitted_total",
        "Transactions submitted by intent kind",
        &["kind"]
    ).unwrap();

    pub static ref TX_REPLACED: Counter = register_counter!(
        "evm_operator_transactions_replaced_total",
        "Fee-bumped replacement broadcasts"
    ).unwrap();

    pub static ref TX_OUTCOMES: CounterVec = register_counter_vec!(
        "evm_operator_transaction_outcomes_total",
        "Terminal transaction states",
        &["state"]
    ).unwrap();

    pub static ref TX_CONFIRMATION_TIME: Histogram = register_histogram!(
        "evm_operator_confirmation_seconds",
        "Time from first broadcast to confirmation",
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    // Nonce metrics
    pub static ref NONCE_DRIFT: Counter = register_counter!(
        "evm_operator_nonce_drift_total",
        "Times the chain count moved past the local sequence"
    ).unwrap();

    pub static ref INFLIGHT_NONCES: IntGaugeVec = register_int_gauge_vec!(
        "evm_operator_inflight_nonces",
        "Nonces allocated but not yet settled",
        &["account"]
    ).unwrap();

    // Gate and dispatch metrics
    pub static ref GATE_DENIALS: CounterVec = register_counter_vec!(
        "evm_operator_gate_denials_total",
        "Operations refused by the gate",
        &["operation", "reason"]
    ).unwrap();

    pub static ref OPERATIONS: CounterVec = register_counter_vec!(
        "evm_operator_operations_total",
        "Dispatched operations by result",
        &["operation", "result"]
    ).unwrap();

    pub static ref OPERATION_LATENCY: HistogramVec = register_histogram_vec!(
        "evm_operator_operation_latency_seconds",
        "Operation latency",
        &["operation"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OperatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OperatorError::Config(format!("Failed to bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OperatorError::Internal(format!("Metrics server failed: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        warn!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> OperatorResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| OperatorError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| OperatorError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_rpc_request(method: &str, ok: bool, latency_secs: f64) {
    RPC_REQUESTS
        .with_label_values(&[method, if ok { "ok" } else { "error" }])
        .inc();
    RPC_LATENCY.with_label_values(&[method]).observe(latency_secs);
}

pub fn record_submission(kind: &str) {
    TX_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_replacement() {
    TX_REPLACED.inc();
}

pub fn record_transaction_outcome(state: &str) {
    TX_OUTCOMES.with_label_values(&[state]).inc();
}

pub fn observe_confirmation_time(secs: f64) {
    TX_CONFIRMATION_TIME.observe(secs);
}

pub fn record_nonce_drift() {
    NONCE_DRIFT.inc();
}

pub fn set_inflight_nonces(account: &Address, count: usize) {
    INFLIGHT_NONCES
        .with_label_values(&[&format!("{:?}", account)])
        .set(count as i64);
}

pub fn record_gate_denial(operation: &str, reason: &str) {
    GATE_DENIALS.with_label_values(&[operation, reason]).inc();
}

pub fn record_operation(operation: &str, result: &str, latency_secs: f64) {
    OPERATIONS.with_label_values(&[operation, result]).inc();
    OPERATION_LATENCY
        .with_label_values(&[operation])
        .observe(latency_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_metrics_are_rendered() {
        record_gate_denial("swap", "policy");
        record_operation("balance", "ok", 0.01);
        let text = render().unwrap();
        assert!(text.contains("evm_operator_gate_denials_total"));
        assert!(text.contains("evm_operator_operations_total"));
    }

    #[test]
    fn inflight_nonces_are_tracked_per_account() {
        let first = Address::repeat_byte(0x01);
        let second = Address::repeat_byte(0x02);
        set_inflight_nonces(&first, 3);
        set_inflight_nonces(&second, 1);

        let label = |a: &Address| format!("{:?}", a);
        assert_eq!(INFLIGHT_NONCES.with_label_values(&[&label(&first)]).get(), 3);
        assert_eq!(INFLIGHT_NONCES.with_label_values(&[&label(&second)]).get(), 1);
    }
}
