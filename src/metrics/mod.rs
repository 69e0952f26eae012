//! Prometheus metrics for swap monitoring
//!
//! Counts orders through the lifecycle, labelled by swap direction:
//! - orders built
//! - swaps executed (both escrows live)
//! - swaps failed
//! - withdrawals (secret revealed, funds released)

use crate::error::{RelayerError, RelayerResult};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref ORDERS_BUILT: CounterVec = register_counter_vec!(
        "relayer_orders_built_total",
        "Total swap orders built",
        &["direction"]
    )
    .unwrap();

    pub static ref SWAPS_EXECUTED: CounterVec = register_counter_vec!(
        "relayer_swaps_executed_total",
        "Total swaps with both escrows deployed",
        &["direction"]
    )
    .unwrap();

    pub static ref SWAPS_FAILED: CounterVec = register_counter_vec!(
        "relayer_swaps_failed_total",
        "Total swaps marked failed",
        &["direction"]
    )
    .unwrap();

    pub static ref WITHDRAWALS: CounterVec = register_counter_vec!(
        "relayer_withdrawals_total",
        "Total escrow withdrawals after a secret reveal",
        &["direction"]
    )
    .unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics bind failed: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

pub fn record_order_built(direction: &str) {
    ORDERS_BUILT.with_label_values(&[direction]).inc();
}

pub fn record_swap_executed(direction: &str) {
    SWAPS_EXECUTED.with_label_values(&[direction]).inc();
}

pub fn record_swap_failed(direction: &str) {
    SWAPS_FAILED.with_label_values(&[direction]).inc();
}

pub fn record_withdrawal(direction: &str) {
    WITHDRAWALS.with_label_values(&[direction]).inc();
}
