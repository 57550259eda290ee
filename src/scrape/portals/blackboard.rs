// src/scrape/portals/blackboard.rs
//! Blackboard Learn REST API: courses -> gradebook columns of type Assignment.
//!
//! Credentials: `api_key` (Bearer), or `username` + `password` used as the
//! application key/secret for the OAuth2 client-credentials grant. The
//! session token lives on the adapter for the rest of the run.
//! Listings follow `paging.nextPage` cursors.

use super::{hours_from_points, id_field, str_field};
use crate::model::{DeadlineRecord, ScrapeOutcome, SourceConfig};
use crate::scrape::dates::parse_date;
use crate::scrape::priority::{is_long_past, priority_from_due};
use crate::scrape::text::{clean_html, truncate};
use crate::scrape::{
    auth_gate, host_matches, ApiClient, Auth, Harvest, PageTracker, PortalInfo, ScrapeDefaults,
    Scraper,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const KIND: &str = "blackboard";
const API: &str = "/learn/api/public/v1";
const PAGE_LIMIT: usize = 100;
const MAX_PAGES: u32 = 20;
const DESCRIPTION_LIMIT: usize = 200;
const HOST_PATTERNS: &[&str] = &["blackboard", "bb.", "learn.", "mylms.", "elearn."];

pub struct BlackboardScraper {
    config: SourceConfig,
    site: String,
    api: ApiClient,
}

impl BlackboardScraper {
    pub fn new(config: &SourceConfig, defaults: &ScrapeDefaults) -> anyhow::Result<Self> {
        let site = config.url.trim_end_matches('/').to_string();
        let api = ApiClient::new(
            KIND,
            &site,
            defaults.rate_limit.from_rules(&config.scrape_rules),
            defaults.http_timeout,
        )
        .with_header("Accept", "application/json");
        Ok(Self {
            config: config.clone(),
            site,
            api,
        })
    }

    /// Client-credentials grant; returns the access token when the remote accepts.
    async fn exchange_token(&self, key: &str, secret: &str) -> anyhow::Result<Option<String>> {
        let body = self
            .api
            .post_form(
                &format!("{API}/oauth2/token"),
                &[("grant_type", "client_credentials")],
                Some((key, secret)),
            )
            .await?;
        Ok(body
            .as_ref()
            .and_then(|v| str_field(v, "access_token"))
            .map(str::to_string))
    }

    /// Follow `paging.nextPage` until it disappears. A failed page ends the
    /// listing since there is no cursor to continue from.
    async fn fetch_cursor(
        &self,
        harvest: &mut Harvest,
        path: &str,
        label: &str,
    ) -> (Vec<Value>, bool) {
        let mut out = Vec::new();
        let mut pages = PageTracker::new(1, MAX_PAGES);
        let mut next = Some(path.to_string());
        let first_query = [("limit", PAGE_LIMIT.to_string())];
        while let Some(current) = next.take() {
            // cursors already carry their own query string
            let query: &[(&str, String)] = if pages.pages() == 0 { &first_query } else { &[] };
            match self.api.get_json(&current, query).await {
                Ok(Some(body)) => {
                    let results = body
                        .get("results")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    let n = results.len();
                    out.extend(results);
                    let more = pages.page_ok(n);
                    next = body
                        .get("paging")
                        .and_then(|p| str_field(p, "nextPage"))
                        .filter(|_| more)
                        .map(str::to_string);
                }
                Ok(None) => {
                    harvest.no_data(format!("{label} page {}", pages.pages() + 1));
                    pages.page_failed();
                }
                Err(e) => {
                    harvest.request_failed(format!("{label} page {}", pages.pages() + 1), &e);
                    pages.page_failed();
                }
            }
        }
        (out, pages.reached())
    }

    fn column_record(&self, col: &Value, course: &str, now: DateTime<Utc>) -> Option<DeadlineRecord> {
        if str_field(col, "type") != Some("Assignment") {
            return None;
        }
        let due = str_field(col, "dueDate")
            .or_else(|| col.get("grading").and_then(|g| str_field(g, "due")))
            .and_then(parse_date)?;
        if is_long_past(due, now) {
            return None;
        }
        let id = id_field(col, "id")?;
        let description = str_field(col, "description")
            .map(|d| truncate(&clean_html(d), DESCRIPTION_LIMIT))
            .unwrap_or_default();
        let points = col
            .get("pointsPossible")
            .or_else(|| col.get("score").and_then(|s| s.get("possible")))
            .and_then(Value::as_f64);
        Some(
            DeadlineRecord::new(
                format!("[{course}] {}", str_field(col, "name").unwrap_or("Untitled Assignment")),
                due,
                id,
            )
            .description(description)
            .priority(priority_from_due(due, now))
            .url(format!("{}/webapps/assignment/uploadAssignment", self.site))
            .tags([course, "blackboard", "assignment"])
            .hours(hours_from_points(points)),
        )
    }
}

#[async_trait::async_trait]
impl Scraper for BlackboardScraper {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn portal_info(&self) -> PortalInfo {
        PortalInfo {
            kind: KIND,
            name: self.config.name.clone(),
            url: self.site.clone(),
            objects: vec!["courses", "gradebook_columns"],
            requires_auth: true,
            supports_pagination: true,
        }
    }

    fn validate_credentials(&self) -> bool {
        let creds = &self.config.credentials;
        let has_key = creds.str("api_key").is_some();
        let has_login = creds.str("username").is_some() && creds.str("password").is_some();
        (has_key || has_login) && host_matches(&self.site, HOST_PATTERNS)
    }

    async fn authenticate(&self) -> anyhow::Result<bool> {
        let creds = &self.config.credentials;
        let token = match creds.str("api_key") {
            Some(k) => k.to_string(),
            None => match (creds.str("username"), creds.str("password")) {
                (Some(key), Some(secret)) => match self.exchange_token(key, secret).await? {
                    Some(t) => t,
                    None => {
                        tracing::warn!(portal = KIND, source_id = self.config.id, "oauth2 token request rejected");
                        return Ok(false);
                    }
                },
                _ => return Ok(false),
            },
        };
        self.api.set_auth(Auth::Bearer(token)).await;
        let version = self.api.get_json(&format!("{API}/system/version"), &[]).await?;
        Ok(version.is_some())
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome> {
        if let Some(out) = auth_gate(self, "Blackboard").await {
            return Ok(out);
        }
        let mut harvest = Harvest::new();
        let (courses, reached) = self
            .fetch_cursor(&mut harvest, &format!("{API}/courses"), "courses")
            .await;
        harvest.object_done(reached);

        let now = Utc::now();
        for course in &courses {
            let Some(course_id) = id_field(course, "id") else {
                continue;
            };
            let name = str_field(course, "name").unwrap_or("Unknown Course");
            let (columns, _) = self
                .fetch_cursor(
                    &mut harvest,
                    &format!("{API}/courses/{course_id}/gradebook/columns"),
                    &format!("gradebook of {name}"),
                )
                .await;
            for col in &columns {
                if let Some(rec) = self.column_record(col, name, now) {
                    harvest.push(rec);
                }
            }
        }

        tracing::info!(portal = KIND, source_id = self.config.id, courses = courses.len(), found = harvest.len(), "blackboard scrape finished");
        Ok(harvest
            .finish("Blackboard")
            .with_meta("courses_count", courses.len()))
    }
}
