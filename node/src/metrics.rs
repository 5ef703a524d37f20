//! # Prometheus Metrics
//!
//! Operational metrics for the vault node, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated [`prometheus::Registry`]
//! prefixed `tessera_`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

use tessera_protocol::config::SCALE;
use tessera_protocol::vault::{BatchReceipt, Host, Vault};

/// Metric handles for the node. Clones share the underlying series.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Relayed batches that committed.
    pub batches_executed_total: IntCounter,
    /// Relayed batches refused or reverted.
    pub batches_rejected_total: IntCounter,
    pub calls_succeeded_total: IntCounter,
    /// Optional calls that failed or were skipped inside committed batches.
    pub calls_failed_total: IntCounter,
    pub batch_gas_used_total: IntCounter,
    pub total_value: Gauge,
    pub total_supply: Gauge,
    /// NAV per share as a plain ratio (1.0 at par).
    pub nav_per_share: Gauge,
    pub active_assets: IntGauge,
    pub batch_latency_seconds: Histogram,
}

fn register<M: prometheus::core::Collector + Clone + 'static>(
    registry: &Registry,
    metric: M,
) -> Result<M, prometheus::Error> {
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Create and register every metric. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tessera".into()), None)?;

        Ok(Self {
            batches_executed_total: register(
                &registry,
                IntCounter::new("batches_executed_total", "Relayed batches committed")?,
            )?,
            batches_rejected_total: register(
                &registry,
                IntCounter::new("batches_rejected_total", "Relayed batches refused or reverted")?,
            )?,
            calls_succeeded_total: register(
                &registry,
                IntCounter::new("calls_succeeded_total", "Batch calls that succeeded")?,
            )?,
            calls_failed_total: register(
                &registry,
                IntCounter::new(
                    "calls_failed_total",
                    "Optional batch calls that failed or were skipped",
                )?,
            )?,
            batch_gas_used_total: register(
                &registry,
                IntCounter::new("batch_gas_used_total", "Gas charged across committed batches")?,
            )?,
            total_value: register(
                &registry,
                Gauge::new("total_value", "Sum of cached balances of active assets")?,
            )?,
            total_supply: register(
                &registry,
                Gauge::new("total_supply", "Outstanding vault shares")?,
            )?,
            nav_per_share: register(
                &registry,
                Gauge::new("nav_per_share", "Net asset value per share, 1.0 at par")?,
            )?,
            active_assets: register(
                &registry,
                IntGauge::new("active_assets", "Number of active assets")?,
            )?,
            batch_latency_seconds: register(
                &registry,
                Histogram::with_opts(
                    HistogramOpts::new(
                        "batch_latency_seconds",
                        "Time to verify, execute and persist a relayed batch",
                    )
                    .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]),
                )?,
            )?,
            registry,
        })
    }

    /// Account for a committed batch.
    pub fn record_receipt(&self, receipt: &BatchReceipt) {
        self.batches_executed_total.inc();
        self.calls_succeeded_total.inc_by(receipt.success_count as u64);
        self.calls_failed_total
            .inc_by((receipt.call_count - receipt.success_count) as u64);
        self.batch_gas_used_total.inc_by(receipt.gas_used);
    }

    /// Refresh the vault gauges from current state.
    pub fn observe_vault<H: Host>(&self, vault: &Vault<H>) {
        if let Ok(value) = vault.total_value() {
            self.total_value.set(value as f64);
        }
        self.total_supply.set(vault.total_supply() as f64);
        if let Ok(nav) = vault.nav_per_share() {
            self.nav_per_share.set(nav as f64 / SCALE as f64);
        }
        self.active_assets
            .set(vault.state().assets.active_count() as i64);
    }

    /// Render every registered metric in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_protocol::vault::CallOutcome;

    #[test]
    fn receipt_updates_counters() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.record_receipt(&BatchReceipt {
            nonce: 0,
            call_count: 3,
            success_count: 2,
            gas_used: 90_000,
            outcomes: vec![CallOutcome::Skipped {
                reason: "no gas".into(),
            }],
        });
        assert_eq!(metrics.batches_executed_total.get(), 1);
        assert_eq!(metrics.calls_succeeded_total.get(), 2);
        assert_eq!(metrics.calls_failed_total.get(), 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("tessera_batch_gas_used_total 90000"));
    }
}
