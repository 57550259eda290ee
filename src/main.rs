//! portal-sync: one-shot batch sync.
//! Loads the source list, syncs every active configuration once, logs the
//! batch report and exits non-zero when any configuration failed.

use anyhow::{Context, Result};
use portal_sync::{config, engine_from_config, metrics::Metrics, sync::MemoryStore};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portal_sync=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    // PORTAL_SYNC_METRICS=1 prints the Prometheus snapshot after the run.
    let metrics = if std::env::var("PORTAL_SYNC_METRICS").is_ok_and(|v| v == "1") {
        Some(Metrics::init()?)
    } else {
        None
    };

    let cfg = config::load_default().context("loading portal-sync config")?;
    if cfg.sources.is_empty() {
        tracing::warn!("no sources configured; nothing to sync");
        return Ok(());
    }
    let force = std::env::args().any(|a| a == "--force");

    let store = Arc::new(MemoryStore::with_sources(cfg.sources.clone()));
    let engine = engine_from_config(&cfg, store);
    let batch = engine.sync_all(force).await?;
    engine.flush_alerts().await;

    for r in &batch.reports {
        match (&r.failure, r.skipped) {
            (Some(f), _) => tracing::warn!(source_id = r.source_id, kind = %r.kind, error = %f, "failed"),
            (None, Some(reason)) => tracing::info!(source_id = r.source_id, kind = %r.kind, ?reason, "skipped"),
            (None, None) => tracing::info!(
                source_id = r.source_id,
                kind = %r.kind,
                created = r.created,
                updated = r.updated,
                warnings = r.errors.len(),
                "synced"
            ),
        }
    }
    println!("{}", serde_json::to_string_pretty(&batch)?);

    if let Some(m) = metrics {
        println!("{}", m.render());
    }
    if batch.failed > 0 {
        anyhow::bail!("{} of {} sources failed", batch.failed, batch.reports.len());
    }
    Ok(())
}
