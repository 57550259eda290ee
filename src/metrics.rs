// src/metrics.rs
use anyhow::{Context, Result};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series carry help text once a recorder is installed).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("portal_sync_runs_total", "Sync runs by portal and result.");
        describe_counter!(
            "portal_sync_created_total",
            "Deadlines created by reconciliation."
        );
        describe_counter!(
            "portal_sync_updated_total",
            "Deadlines updated by reconciliation."
        );
        describe_counter!(
            "portal_sync_errors_total",
            "Errors recorded during sync runs (terminal and per-item)."
        );
        describe_histogram!(
            "portal_sync_duration_ms",
            "Wall time of one configuration sync in milliseconds."
        );
        describe_counter!(
            "portal_http_requests_total",
            "Outbound portal API requests."
        );
        describe_counter!(
            "portal_http_rate_limited_total",
            "Portal responses rejected with HTTP 429."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Exposition-format snapshot of every series recorded so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
