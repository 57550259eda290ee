// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod scrape;
pub mod sync;

// ---- Re-exports for stable public API ----
pub use crate::model::{
    DeadlineKey, DeadlineRecord, PersistedDeadline, Priority, ScrapeOutcome, ScrapeStatus,
    SourceConfig,
};
pub use crate::scrape::registry::{ScraperFactory, ScraperRegistry};
pub use crate::scrape::Scraper;
pub use crate::sync::{BatchReport, SyncEngine, SyncFailure, SyncReport};

use std::sync::Arc;

/// Engine wired the way the binary runs it: built-in adapters with the
/// configured pacing, log or webhook alerts.
pub fn engine_from_config(
    cfg: &config::PortalSyncConfig,
    store: Arc<dyn sync::DeadlineStore>,
) -> SyncEngine {
    let registry = Arc::new(ScraperRegistry::with_builtin(cfg.settings.scrape_defaults()));
    let notifier: Arc<dyn notify::Notifier> = match &cfg.settings.webhook_url {
        Some(url) => Arc::new(notify::WebhookNotifier::new(url.clone())),
        None => Arc::new(notify::LogNotifier),
    };
    SyncEngine::new(registry, store, notifier).with_options(cfg.settings.sync_options())
}
