// tests/common/mod.rs
// Shared fixtures: fake remote APIs on 127.0.0.1:0, a scripted adapter and
// recording notifiers.
#![allow(dead_code)]

use anyhow::anyhow;
use axum::Router;
use parking_lot::Mutex;
use portal_sync::model::{DeadlineRecord, ScrapeOutcome, Settings, SourceConfig};
use portal_sync::notify::{DeadlineAlert, Notifier};
use portal_sync::scrape::dates::parse_date;
use portal_sync::scrape::priority::normalize_priority;
use portal_sync::scrape::{PortalInfo, ScrapeDefaults, Scraper};
use serde_json::{json, Value};
use std::sync::Arc;

/// Serve `router` on an ephemeral port; returns `http://127.0.0.1:<port>`.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Scrape rules with pacing turned off, merged with `extra`.
pub fn fast_rules(extra: Value) -> Settings {
    let mut rules = Settings::from_value(extra);
    rules.0.insert("rate_limit_delay".into(), json!(0));
    rules.0.insert("max_requests_per_minute".into(), json!(100_000));
    rules
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<DeadlineAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn titles(&self) -> Vec<String> {
        self.alerts.lock().iter().map(|a| a.title.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &DeadlineAlert) -> anyhow::Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Records alerts only after sleeping, like a webhook that is slow to answer.
pub struct SlowNotifier {
    pub delay: std::time::Duration,
    pub inner: RecordingNotifier,
}

impl SlowNotifier {
    pub fn new(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            inner: RecordingNotifier::default(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for SlowNotifier {
    async fn notify(&self, alert: &DeadlineAlert) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.notify(alert).await
    }
}

pub struct FailingNotifier;

#[async_trait::async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _alert: &DeadlineAlert) -> anyhow::Result<()> {
        Err(anyhow!("channel down"))
    }
}

pub const SCRIPTED: &str = "scripted";

/// Adapter driven entirely by its configuration, no network.
///
/// credentials.token required; rules: `auth` = "reject" | "unreachable",
/// `mode` = "panic" | "fail" | "fault", `items` = [{id, title, due, priority}].
pub struct ScriptedScraper {
    config: SourceConfig,
}

pub fn scripted_factory(
    config: &SourceConfig,
    _defaults: &ScrapeDefaults,
) -> anyhow::Result<Box<dyn Scraper>> {
    Ok(Box::new(ScriptedScraper {
        config: config.clone(),
    }))
}

pub fn scripted_source(id: i64, owner: &str, items: Value) -> SourceConfig {
    SourceConfig::new(id, owner, SCRIPTED, format!("https://scripted.example/{id}"))
        .with_credentials([("token", json!("t"))])
        .with_rules([("items", items)])
}

pub fn item(id: &str, title: &str, priority: &str) -> Value {
    json!({"id": id, "title": title, "due": "2030-01-15T09:00:00Z", "priority": priority})
}

#[async_trait::async_trait]
impl Scraper for ScriptedScraper {
    fn kind(&self) -> &'static str {
        SCRIPTED
    }

    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn portal_info(&self) -> PortalInfo {
        PortalInfo {
            kind: SCRIPTED,
            name: self.config.name.clone(),
            url: self.config.url.clone(),
            objects: vec!["items"],
            requires_auth: true,
            supports_pagination: false,
        }
    }

    fn validate_credentials(&self) -> bool {
        self.config.credentials.str("token").is_some()
    }

    async fn authenticate(&self) -> anyhow::Result<bool> {
        match self.config.scrape_rules.str("auth") {
            Some("reject") => Ok(false),
            Some("unreachable") => Err(anyhow!("connection refused")),
            _ => Ok(true),
        }
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome> {
        match self.config.scrape_rules.str("mode") {
            Some("panic") => panic!("scripted adapter exploded"),
            Some("fail") => {
                return Ok(ScrapeOutcome::error(
                    "Failed to fetch any data from scripted",
                    vec!["page 1: no data returned".to_string()],
                ))
            }
            Some("fault") => return Err(anyhow!("unexpected payload shape")),
            _ => {}
        }
        let items = self
            .config
            .scrape_rules
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let records: Vec<DeadlineRecord> = items
            .iter()
            .map(|i| {
                DeadlineRecord::new(
                    i["title"].as_str().unwrap(),
                    parse_date(i["due"].as_str().unwrap()).unwrap(),
                    i["id"].as_str().unwrap(),
                )
                .priority(normalize_priority(i["priority"].as_str().unwrap_or("medium")))
            })
            .collect();
        let n = records.len();
        Ok(ScrapeOutcome::success(records, format!("Successfully scraped {n} deadlines from scripted")))
    }
}
