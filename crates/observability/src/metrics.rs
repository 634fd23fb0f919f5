//! Prometheus metrics infrastructure
//!
//! This module provides utilities for initializing Prometheus metrics
//! and the metric set recorded by the market engine.

use metrics::{counter, gauge, Counter, Gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize the Prometheus metrics exporter
///
/// This starts an HTTP server on the specified port that exposes metrics
/// at the `/metrics` endpoint. Must be called from inside a tokio runtime.
///
/// # Example
///
/// ```ignore
/// observability::metrics::init_metrics(9100)?;
/// // Metrics available at http://localhost:9100/metrics
/// ```
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Metrics recorded by the market engine
///
/// Handles are cheap to clone. When no exporter is installed every call is a
/// no-op, so the engine records unconditionally.
///
/// # Metrics
///
/// * `market_transactions_total{type}` - Accepted transactions
/// * `market_rejections_total{type}` - Rejected transactions
/// * `market_transfers_fulfilled_total` - Energy transfers settled by metering
/// * `market_games_terminated_total{reason}` - Games whose bidding ended
/// * `market_pending_transfers` - Pending transfers of the last touched monitor
#[derive(Clone)]
pub struct MarketMetrics {
    accepted_by_type: fn(&'static str) -> Counter,
    rejected_by_type: fn(&'static str) -> Counter,
    terminated_by_reason: fn(&'static str) -> Counter,
    transfers_fulfilled: Counter,
    pending_transfers: Gauge,
}

impl MarketMetrics {
    /// Create the market metric set
    pub fn new() -> Self {
        Self {
            accepted_by_type: |tx_type| counter!("market_transactions_total", "type" => tx_type),
            rejected_by_type: |tx_type| counter!("market_rejections_total", "type" => tx_type),
            terminated_by_reason: |reason| {
                counter!("market_games_terminated_total", "reason" => reason)
            },
            transfers_fulfilled: counter!("market_transfers_fulfilled_total"),
            pending_transfers: gauge!("market_pending_transfers"),
        }
    }

    /// Record an accepted transaction
    pub fn record_accepted(&self, tx_type: &'static str) {
        (self.accepted_by_type)(tx_type).increment(1);
    }

    /// Record a rejected transaction
    pub fn record_rejected(&self, tx_type: &'static str) {
        (self.rejected_by_type)(tx_type).increment(1);
    }

    /// Record the end of a game's bidding phase
    pub fn record_game_terminated(&self, reason: &'static str) {
        (self.terminated_by_reason)(reason).increment(1);
    }

    /// Record settled transfers
    pub fn record_transfers_fulfilled(&self, count: u64) {
        self.transfers_fulfilled.increment(count);
    }

    /// Set the number of transfers still awaiting delivery
    pub fn set_pending_transfers(&self, count: usize) {
        self.pending_transfers.set(count as f64);
    }
}

impl Default for MarketMetrics {
    fn default() -> Self {
        Self::new()
    }
}
