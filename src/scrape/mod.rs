// src/scrape/mod.rs
//! # Portal scraping
//! The capability contract every portal adapter implements, plus the
//! shared pieces adapters compose: HTTP client, date/priority/text helpers,
//! the page-stop rules and the `Harvest` accumulator that turns per-object
//! successes and failures into one `ScrapeOutcome`.

pub mod dates;
pub mod http;
pub mod portals;
pub mod priority;
pub mod registry;
pub mod text;

use crate::model::{DeadlineRecord, ScrapeOutcome, ScrapeStatus, SourceConfig};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Display;
use std::time::Duration;

pub use http::{ApiClient, Auth, HttpError, RateLimit};

/// Defaults applied to every adapter built by a registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrapeDefaults {
    pub rate_limit: RateLimit,
    pub http_timeout: Duration,
}

impl Default for ScrapeDefaults {
    fn default() -> Self {
        Self {
            rate_limit: RateLimit::default(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Static description of an adapter bound to one configuration.
#[derive(Debug, Clone, Serialize)]
pub struct PortalInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub url: String,
    pub objects: Vec<&'static str>,
    pub requires_auth: bool,
    pub supports_pagination: bool,
}

/// Capability contract for one external system.
///
/// An adapter is constructed bound to a single `SourceConfig`.
/// `scrape` reports expected failures (bad credentials, a failing page,
/// remote rate limiting) inside the outcome; only unexpected faults are `Err`.
#[async_trait::async_trait]
pub trait Scraper: Send + Sync {
    /// Registry key.
    fn kind(&self) -> &'static str;

    fn config(&self) -> &SourceConfig;

    fn portal_info(&self) -> PortalInfo;

    /// Local check only: required credential fields + base URL shape.
    fn validate_credentials(&self) -> bool;

    /// One lightweight "who am I" call. `Ok(false)` means the remote rejected us.
    async fn authenticate(&self) -> anyhow::Result<bool>;

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome>;
}

/// Stop rules for one paginated listing: stop on an empty or short page,
/// after two consecutive failed pages, or at the page cap.
#[derive(Debug, Clone)]
pub struct PageTracker {
    page_size: usize,
    max_pages: u32,
    pages: u32,
    consecutive_failures: u32,
    ok_pages: u32,
}

impl PageTracker {
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 2;

    pub fn new(page_size: usize, max_pages: u32) -> Self {
        Self {
            page_size,
            max_pages: max_pages.max(1),
            pages: 0,
            consecutive_failures: 0,
            ok_pages: 0,
        }
    }

    /// Record a fetched page of `items` entries. Returns whether to fetch the next one.
    pub fn page_ok(&mut self, items: usize) -> bool {
        self.pages += 1;
        self.ok_pages += 1;
        self.consecutive_failures = 0;
        items > 0 && items >= self.page_size && self.pages < self.max_pages
    }

    /// Record a failed page. Returns whether to try the next one.
    pub fn page_failed(&mut self) -> bool {
        self.pages += 1;
        self.consecutive_failures += 1;
        self.consecutive_failures < Self::MAX_CONSECUTIVE_FAILURES && self.pages < self.max_pages
    }

    /// Pages attempted so far (1-based number of the last one).
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Whether any page of this listing was actually read.
    pub fn reached(&self) -> bool {
        self.ok_pages > 0
    }
}

/// Accumulates records and errors over one scrape run.
#[derive(Debug, Default)]
pub struct Harvest {
    records: Vec<DeadlineRecord>,
    seen: HashSet<String>,
    errors: Vec<String>,
    objects_reached: usize,
    objects_failed: usize,
    failures: usize,
    timeouts: usize,
}

impl Harvest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; a repeated source item id within one run keeps the first sighting.
    pub fn push(&mut self, rec: DeadlineRecord) {
        if self.seen.insert(rec.source_item_id.clone()) {
            self.records.push(rec);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Non-fatal extraction problem (one item could not be parsed, ...).
    pub fn warn(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// A failed request while reading `what`.
    pub fn request_failed(&mut self, what: impl Display, err: &HttpError) {
        self.failures += 1;
        if err.is_timeout() {
            self.timeouts += 1;
        }
        self.errors.push(format!("{what}: {err}"));
    }

    /// A request for `what` returned no usable data (non-2xx or non-JSON).
    pub fn no_data(&mut self, what: impl Display) {
        self.failures += 1;
        self.errors.push(format!("{what}: no data returned"));
    }

    /// Close one independent object type (issues, sprints, courses, ...).
    pub fn object_done(&mut self, reached: bool) {
        if reached {
            self.objects_reached += 1;
        } else {
            self.objects_failed += 1;
        }
    }

    /// Error only when nothing was reachable and something failed;
    /// timeout when every failure was a timeout.
    pub fn finish(self, portal: &str) -> ScrapeOutcome {
        let n = self.records.len();
        if self.objects_reached == 0 && self.objects_failed > 0 {
            let status = if self.failures > 0 && self.timeouts == self.failures {
                ScrapeStatus::Timeout
            } else {
                ScrapeStatus::Error
            };
            let mut out = ScrapeOutcome::error(
                format!("Failed to fetch any data from {portal}"),
                self.errors,
            );
            out.status = status;
            return out;
        }
        let message = if self.errors.is_empty() {
            format!("Successfully scraped {n} deadlines from {portal}")
        } else {
            format!(
                "Scraped {n} deadlines from {portal} with {} warnings",
                self.errors.len()
            )
        };
        ScrapeOutcome::success(self.records, message).with_errors(self.errors)
    }
}

/// Read a numbered-page listing (`page=N`, `per_page=page_size`) whose pages
/// are bare JSON arrays. Failed pages are recorded on `harvest` and skipped.
/// Returns every item read and whether any page was reachable.
pub async fn fetch_numbered(
    api: &ApiClient,
    harvest: &mut Harvest,
    path: &str,
    query: &[(&str, String)],
    page_size: usize,
    max_pages: u32,
    label: &str,
) -> (Vec<serde_json::Value>, bool) {
    let mut items = Vec::new();
    let mut pages = PageTracker::new(page_size, max_pages);
    let mut page = 1u32;
    loop {
        let mut q = query.to_vec();
        q.push(("per_page", page_size.to_string()));
        q.push(("page", page.to_string()));
        let more = match api.get_json(path, &q).await {
            Ok(Some(serde_json::Value::Array(batch))) => {
                let n = batch.len();
                items.extend(batch);
                pages.page_ok(n)
            }
            Ok(_) => {
                harvest.no_data(format!("{label} page {page}"));
                pages.page_failed()
            }
            Err(e) => {
                harvest.request_failed(format!("{label} page {page}"), &e);
                pages.page_failed()
            }
        };
        if !more {
            break;
        }
        page += 1;
    }
    (items, pages.reached())
}

/// Run `authenticate` ahead of a scrape. `Some(outcome)` means stop and report it.
pub async fn auth_gate(scraper: &dyn Scraper, portal: &str) -> Option<ScrapeOutcome> {
    match scraper.authenticate().await {
        Ok(true) => None,
        Ok(false) => Some(ScrapeOutcome::error(
            "Authentication failed",
            vec![format!("Failed to authenticate with {portal}")],
        )),
        Err(e) => {
            tracing::warn!(portal, error = ?e, "authentication request failed");
            let mut out = ScrapeOutcome::error(
                format!("Could not reach {portal}"),
                vec![format!("{e:#}")],
            );
            if e.downcast_ref::<HttpError>().is_some_and(HttpError::is_timeout) {
                out.status = ScrapeStatus::Timeout;
            }
            Some(out)
        }
    }
}

/// Host check shared by `validate_credentials` implementations: the host
/// must contain one of `patterns`. Loopback hosts are accepted as
/// self-hosted/dev instances.
pub fn host_matches(url: &str, patterns: &[&str]) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return false;
    };
    if is_loopback(&host) {
        return true;
    }
    patterns.iter().any(|p| host.contains(p))
}

pub(crate) fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1"
}
