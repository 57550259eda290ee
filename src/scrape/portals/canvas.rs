// src/scrape/portals/canvas.rs
//! Canvas LMS: active courses -> assignments with a due date.
//!
//! Credentials: `access_token` (Bearer).

use super::{hours_from_points, id_field, str_field};
use crate::model::{DeadlineRecord, ScrapeOutcome, SourceConfig};
use crate::scrape::dates::parse_date;
use crate::scrape::priority::{is_long_past, priority_from_due};
use crate::scrape::text::{clean_html, truncate};
use crate::scrape::{
    auth_gate, fetch_numbered, host_matches, ApiClient, Auth, Harvest, PortalInfo,
    ScrapeDefaults, Scraper,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

pub const KIND: &str = "canvas";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: u32 = 20;
const DESCRIPTION_LIMIT: usize = 200;
const HOST_PATTERNS: &[&str] = &["instructure.com", "canvas.", ".edu", "learning.", "lms."];

pub struct CanvasScraper {
    config: SourceConfig,
    api: ApiClient,
}

impl CanvasScraper {
    pub fn new(config: &SourceConfig, defaults: &ScrapeDefaults) -> anyhow::Result<Self> {
        let auth = config
            .credentials
            .str("access_token")
            .map(|t| Auth::Bearer(t.to_string()))
            .unwrap_or_default();
        let api = ApiClient::new(
            KIND,
            &format!("{}/api/v1", config.url.trim_end_matches('/')),
            defaults.rate_limit.from_rules(&config.scrape_rules),
            defaults.http_timeout,
        )
        .with_auth(auth);
        Ok(Self {
            config: config.clone(),
            api,
        })
    }
}

fn assignment_record(a: &Value, course: &str, now: DateTime<Utc>) -> Option<DeadlineRecord> {
    let due = str_field(a, "due_at").and_then(parse_date)?;
    if is_long_past(due, now) {
        return None;
    }
    let id = id_field(a, "id")?;
    let name = str_field(a, "name").unwrap_or("Untitled Assignment");
    let description = str_field(a, "description")
        .map(|d| truncate(&clean_html(d), DESCRIPTION_LIMIT))
        .unwrap_or_default();
    Some(
        DeadlineRecord::new(format!("[{course}] {name}"), due, id)
            .description(description)
            .priority(priority_from_due(due, now))
            .url(str_field(a, "html_url").unwrap_or_default())
            .tags([course, "canvas", "assignment"])
            .hours(hours_from_points(a.get("points_possible").and_then(Value::as_f64))),
    )
}

#[async_trait::async_trait]
impl Scraper for CanvasScraper {
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
            url: self.config.url.clone(),
            objects: vec!["courses", "assignments"],
            requires_auth: true,
            supports_pagination: true,
        }
    }

    fn validate_credentials(&self) -> bool {
        self.config.credentials.str("access_token").is_some()
            && host_matches(&self.config.url, HOST_PATTERNS)
    }

    async fn authenticate(&self) -> anyhow::Result<bool> {
        let profile = self.api.get_json("/users/self/profile", &[]).await?;
        Ok(profile.as_ref().and_then(|p| id_field(p, "id")).is_some())
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome> {
        if let Some(out) = auth_gate(self, "Canvas").await {
            return Ok(out);
        }
        let mut harvest = Harvest::new();
        let (courses, reached) = fetch_numbered(
            &self.api,
            &mut harvest,
            "/courses",
            &[("enrollment_state", "active".to_string())],
            PAGE_SIZE,
            MAX_PAGES,
            "courses",
        )
        .await;
        harvest.object_done(reached);

        let now = Utc::now();
        for course in &courses {
            let Some(course_id) = id_field(course, "id") else {
                continue;
            };
            let course_name = str_field(course, "name").unwrap_or("Unknown Course");
            let (assignments, _) = fetch_numbered(
                &self.api,
                &mut harvest,
                &format!("/courses/{course_id}/assignments"),
                &[("order_by", "due_at".to_string())],
                PAGE_SIZE,
                MAX_PAGES,
                &format!("assignments of {course_name}"),
            )
            .await;
            for a in &assignments {
                if let Some(rec) = assignment_record(a, course_name, now) {
                    harvest.push(rec);
                }
            }
        }

        tracing::info!(portal = KIND, source_id = self.config.id, courses = courses.len(), found = harvest.len(), "canvas scrape finished");
        Ok(harvest
            .finish("Canvas")
            .with_meta("courses_count", courses.len()))
    }
}
