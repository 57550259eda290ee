// src/sync/mod.rs
//! # Sync orchestration
//! One configuration goes `validating -> authenticating -> scraping ->
//! reconciling -> done` (or `failed` from any of them). Batches group
//! configurations by `(owner, remote host)`: a group runs sequentially,
//! groups run concurrently up to `max_concurrency`.

pub mod orphans;
pub mod store;

use crate::metrics::ensure_metrics_described;
use crate::model::{DeadlineKey, ScrapeOutcome, ScrapeStatus, SourceConfig, SyncStatus};
use crate::notify::{DeadlineAlert, Notifier};
use crate::scrape::registry::ScraperRegistry;
use crate::scrape::{HttpError, Scraper};
use chrono::{DateTime, Duration, Utc};
use futures::{stream, FutureExt, StreamExt};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

pub use orphans::{annotate_orphans, OrphanReport};
pub use store::{DeadlineStore, MemoryStore, SyncFinish, Upsert};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Validating,
    Authenticating,
    Scraping,
    Reconciling,
    Done,
    Failed,
}

/// Terminal failure of one configuration sync.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncFailure {
    /// Unknown type, unbuildable adapter, or credentials/URL failing local checks.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The remote confirmed the credentials are wrong.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The scrape outcome was error or timeout.
    #[error("{message}")]
    Scrape {
        status: ScrapeStatus,
        message: String,
        errors: Vec<String>,
    },
    /// Unexpected error or panic.
    #[error("unexpected fault: {0}")]
    Fault(String),
}

impl SyncFailure {
    fn label(&self) -> &'static str {
        match self {
            SyncFailure::Configuration(_) => "configuration",
            SyncFailure::Authentication(_) => "authentication",
            SyncFailure::Scrape { status: ScrapeStatus::Timeout, .. } => "timeout",
            SyncFailure::Scrape { .. } => "scrape",
            SyncFailure::Fault(_) => "fault",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Inactive,
    AlreadyRunning,
    RecentlySynced,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub source_id: i64,
    pub owner_id: String,
    pub kind: String,
    pub phase: SyncPhase,
    pub created: usize,
    pub updated: usize,
    pub total_scraped: usize,
    pub errors: Vec<String>,
    pub skipped: Option<SkipReason>,
    #[serde(serialize_with = "failure_text")]
    pub failure: Option<SyncFailure>,
    pub orphans: OrphanReport,
}

fn failure_text<S: serde::Serializer>(f: &Option<SyncFailure>, s: S) -> Result<S::Ok, S::Error> {
    match f {
        Some(f) => s.serialize_some(&f.to_string()),
        None => s.serialize_none(),
    }
}

impl SyncReport {
    fn new(source_id: i64, owner_id: &str, kind: &str) -> Self {
        Self {
            source_id,
            owner_id: owner_id.to_string(),
            kind: kind.to_string(),
            phase: SyncPhase::Validating,
            created: 0,
            updated: 0,
            total_scraped: 0,
            errors: Vec::new(),
            skipped: None,
            failure: None,
            orphans: OrphanReport::default(),
        }
    }

    fn skip(mut self, reason: SkipReason) -> Self {
        self.skipped = Some(reason);
        self
    }

    fn fail(mut self, failure: SyncFailure) -> Self {
        self.phase = SyncPhase::Failed;
        self.failure = Some(failure);
        self
    }

    pub fn is_success(&self) -> bool {
        self.phase == SyncPhase::Done
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    fn result_label(&self) -> &'static str {
        match (&self.failure, self.skipped) {
            (Some(f), _) => f.label(),
            (None, Some(_)) => "skipped",
            (None, None) => "success",
        }
    }
}

/// Aggregate of one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub total_scraped: usize,
    pub reports: Vec<SyncReport>,
}

impl BatchReport {
    fn from_reports(mut reports: Vec<SyncReport>) -> Self {
        reports.sort_by_key(|r| r.source_id);
        let mut b = BatchReport::default();
        for r in &reports {
            if r.is_skipped() {
                b.skipped += 1;
            } else if r.is_success() {
                b.synced += 1;
            } else {
                b.failed += 1;
            }
            b.created += r.created;
            b.updated += r.updated;
            b.total_scraped += r.total_scraped;
        }
        b.reports = reports;
        b
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Ceiling on concurrently running `(owner, host)` groups.
    pub max_concurrency: usize,
    /// Skip a configuration synced more recently than this, unless forced.
    pub min_resync_interval: Option<Duration>,
    pub orphan_after: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            min_resync_interval: None,
            orphan_after: Duration::days(orphans::DEFAULT_ORPHAN_AFTER_DAYS),
        }
    }
}

pub struct SyncEngine {
    registry: Arc<ScraperRegistry>,
    store: Arc<dyn DeadlineStore>,
    notifier: Arc<dyn Notifier>,
    options: SyncOptions,
    /// Alert sends in flight; the sync never waits on them.
    alerts: Mutex<JoinSet<()>>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<ScraperRegistry>,
        store: Arc<dyn DeadlineStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            options: SyncOptions::default(),
            alerts: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Sync one configuration by id. Never panics and never returns early
    /// without releasing the running flag.
    pub async fn sync_source(&self, source_id: i64, force: bool) -> SyncReport {
        ensure_metrics_described();
        let config = match self.store.source(source_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                return SyncReport::new(source_id, "", "")
                    .fail(SyncFailure::Configuration(format!("source {source_id} not found")))
            }
            Err(e) => {
                return SyncReport::new(source_id, "", "").fail(SyncFailure::Fault(format!("{e:#}")))
            }
        };
        let report = SyncReport::new(config.id, &config.owner_id, &config.kind);

        if !config.is_active {
            tracing::debug!(source_id, "inactive source skipped");
            return report.skip(SkipReason::Inactive);
        }
        let now = Utc::now();
        if !force && recently_synced(&config, self.options.min_resync_interval, now) {
            tracing::debug!(source_id, "synced recently; skipped");
            return report.skip(SkipReason::RecentlySynced);
        }
        match self.store.try_begin_sync(source_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(source_id, "sync already running; skipped");
                return report.skip(SkipReason::AlreadyRunning);
            }
            Err(e) => return report.fail(SyncFailure::Fault(format!("{e:#}"))),
        }

        let started = Instant::now();
        let mut report = match AssertUnwindSafe(self.run(&config, report))
            .catch_unwind()
            .await
        {
            Ok(r) => r,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(source_id, kind = %config.kind, panic = %msg, "scraper panicked");
                SyncReport::new(config.id, &config.owner_id, &config.kind)
                    .fail(SyncFailure::Fault(format!("panic: {msg}")))
            }
        };

        let finish = SyncFinish {
            status: if report.is_success() {
                SyncStatus::Success
            } else {
                SyncStatus::Error
            },
            error: report.failure.as_ref().map(ToString::to_string),
            at: Utc::now(),
        };
        if let Err(e) = self.store.finish_sync(source_id, finish).await {
            tracing::warn!(source_id, error = ?e, "could not record sync result");
            report.errors.push(format!("recording sync result: {e:#}"));
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let portal = config.kind.to_ascii_lowercase();
        histogram!("portal_sync_duration_ms", "portal" => portal.clone()).record(elapsed_ms);
        counter!("portal_sync_runs_total", "portal" => portal.clone(), "result" => report.result_label())
            .increment(1);
        counter!("portal_sync_created_total", "portal" => portal.clone()).increment(report.created as u64);
        counter!("portal_sync_updated_total", "portal" => portal.clone()).increment(report.updated as u64);
        let error_count = report.errors.len() + usize::from(report.failure.is_some());
        counter!("portal_sync_errors_total", "portal" => portal).increment(error_count as u64);

        match &report.failure {
            None => tracing::info!(
                source_id,
                kind = %config.kind,
                created = report.created,
                updated = report.updated,
                scraped = report.total_scraped,
                warnings = report.errors.len(),
                elapsed_ms,
                "sync done"
            ),
            Some(f) => tracing::warn!(source_id, kind = %config.kind, error = %f, "sync failed"),
        }
        report
    }

    async fn run(&self, config: &SourceConfig, mut report: SyncReport) -> SyncReport {
        // validating
        let Some(scraper) = self.registry.create(config) else {
            return report.fail(SyncFailure::Configuration(format!(
                "unsupported source type '{}'",
                config.kind
            )));
        };
        if !scraper.validate_credentials() {
            return report.fail(SyncFailure::Configuration(format!(
                "invalid credentials or URL for {}",
                scraper.kind()
            )));
        }

        report.phase = SyncPhase::Authenticating;
        match scraper.authenticate().await {
            Ok(true) => {}
            Ok(false) => {
                return report.fail(SyncFailure::Authentication(format!(
                    "Failed to authenticate with {}",
                    scraper.kind()
                )))
            }
            Err(e) => {
                let status = if e.downcast_ref::<HttpError>().is_some_and(HttpError::is_timeout) {
                    ScrapeStatus::Timeout
                } else {
                    ScrapeStatus::Error
                };
                return report.fail(SyncFailure::Scrape {
                    status,
                    message: format!("Could not reach {}", scraper.kind()),
                    errors: vec![format!("{e:#}")],
                });
            }
        }

        report.phase = SyncPhase::Scraping;
        let outcome = match scraper.scrape().await {
            Ok(o) => o,
            Err(e) => return report.fail(SyncFailure::Fault(format!("{e:#}"))),
        };
        if !outcome.is_success() {
            return report.fail(SyncFailure::Scrape {
                status: outcome.status,
                message: outcome.message,
                errors: outcome.errors,
            });
        }

        report.phase = SyncPhase::Reconciling;
        self.reconcile(scraper.as_ref(), outcome, &mut report).await;

        let now = Utc::now();
        match annotate_orphans(
            self.store.as_ref(),
            &config.owner_id,
            config.id,
            self.options.orphan_after,
            now,
        )
        .await
        {
            Ok(o) => report.orphans = o,
            Err(e) => tracing::warn!(source_id = config.id, error = ?e, "orphan annotation failed"),
        }

        report.phase = SyncPhase::Done;
        report
    }

    /// Upsert every record; alert for newly created high/urgent ones.
    async fn reconcile(&self, scraper: &dyn Scraper, outcome: ScrapeOutcome, report: &mut SyncReport) {
        let config = scraper.config();
        report.total_scraped = outcome.records.len();
        report.errors.extend(outcome.errors);
        let now = Utc::now();

        for rec in &outcome.records {
            let key = DeadlineKey::new(&config.owner_id, config.id, &rec.source_item_id);
            match self.store.upsert(&key, rec, now).await {
                Ok(Upsert::Updated(_)) => report.updated += 1,
                Ok(Upsert::Created(d)) => {
                    report.created += 1;
                    if d.priority.is_alerting() {
                        let alert = DeadlineAlert {
                            owner_id: config.owner_id.clone(),
                            source_id: config.id,
                            title: d.title.clone(),
                            due_date: d.due_date,
                            url: d.source_url.clone(),
                            priority: d.priority,
                        };
                        self.send_alert(alert).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(source_id = config.id, item = %rec.source_item_id, error = ?e, "upsert failed");
                    report
                        .errors
                        .push(format!("Error processing deadline {}: {e:#}", rec.source_item_id));
                }
            }
        }
    }

    /// Hand the alert to a background task; failures are logged there.
    async fn send_alert(&self, alert: DeadlineAlert) {
        let notifier = Arc::clone(&self.notifier);
        let mut alerts = self.alerts.lock().await;
        // reap sends that already finished
        while let Some(res) = alerts.try_join_next() {
            log_alert_join(res);
        }
        alerts.spawn(async move {
            if let Err(e) = notifier.notify(&alert).await {
                tracing::warn!(
                    owner = %alert.owner_id,
                    source_id = alert.source_id,
                    title = %alert.title,
                    error = ?e,
                    "notification failed"
                );
            }
        });
    }

    /// Wait for every alert handed off so far. The one-shot binary calls this
    /// before exiting so queued sends are not dropped with the runtime.
    pub async fn flush_alerts(&self) {
        let mut pending = std::mem::take(&mut *self.alerts.lock().await);
        while let Some(res) = pending.join_next().await {
            log_alert_join(res);
        }
    }

    /// Every configuration of one owner.
    pub async fn sync_owner(&self, owner_id: &str, force: bool) -> anyhow::Result<BatchReport> {
        let sources = self.store.sources().await?;
        let mine = sources.into_iter().filter(|s| s.owner_id == owner_id).collect();
        Ok(self.run_batch(mine, force).await)
    }

    pub async fn sync_all(&self, force: bool) -> anyhow::Result<BatchReport> {
        let sources = self.store.sources().await?;
        Ok(self.run_batch(sources, force).await)
    }

    async fn run_batch(&self, sources: Vec<SourceConfig>, force: bool) -> BatchReport {
        let groups = group_by_instance(sources);
        tracing::info!(groups = groups.len(), max_concurrency = self.options.max_concurrency, "batch sync starting");

        let per_group: Vec<Vec<SyncReport>> = stream::iter(groups.into_values())
            .map(|ids| async move {
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    out.push(self.sync_source(id, force).await);
                }
                out
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;

        let batch = BatchReport::from_reports(per_group.into_iter().flatten().collect());
        tracing::info!(
            synced = batch.synced,
            skipped = batch.skipped,
            failed = batch.failed,
            created = batch.created,
            updated = batch.updated,
            "batch sync finished"
        );
        batch
    }
}

/// `(owner, host)` -> source ids, in id order.
fn group_by_instance(sources: Vec<SourceConfig>) -> BTreeMap<(String, String), Vec<i64>> {
    let mut groups: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();
    for s in sources {
        groups
            .entry((s.owner_id.clone(), s.instance_host()))
            .or_default()
            .push(s.id);
    }
    for ids in groups.values_mut() {
        ids.sort_unstable();
    }
    groups
}

fn log_alert_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        tracing::warn!(error = ?e, "notification task aborted");
    }
}

fn recently_synced(config: &SourceConfig, min: Option<Duration>, now: DateTime<Utc>) -> bool {
    match (min, config.last_sync) {
        (Some(min), Some(last)) => now - last < min,
        _ => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
