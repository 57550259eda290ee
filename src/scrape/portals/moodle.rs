// src/scrape/portals/moodle.rs
//! Moodle via the REST web-service endpoint.
//!
//! Credentials: `webservice_token`, or `username` + `password` exchanged at
//! `/login/token.php` (service `moodle_mobile_app`) for a session token.
//! The token lives on the adapter for the rest of the run.

use super::{id_field, str_field};
use crate::model::{DeadlineRecord, ScrapeOutcome, SourceConfig};
use crate::scrape::dates::from_epoch;
use crate::scrape::priority::{is_long_past, priority_from_due};
use crate::scrape::text::{clean_html, truncate};
use crate::scrape::{
    auth_gate, host_matches, ApiClient, Harvest, HttpError, PortalInfo, ScrapeDefaults, Scraper,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

pub const KIND: &str = "moodle";
const WS_PATH: &str = "/webservice/rest/server.php";
const TOKEN_PATH: &str = "/login/token.php";
const TOKEN_SERVICE: &str = "moodle_mobile_app";
const EVENT_WINDOW_DAYS: i64 = 30;
const DESCRIPTION_LIMIT: usize = 200;
const ASSIGNMENT_HOURS: u32 = 2;
const EVENT_HOURS: u32 = 1;
const HOST_PATTERNS: &[&str] = &["moodle", "lms.", "elearning.", "learn.", ".edu"];

pub struct MoodleScraper {
    config: SourceConfig,
    site: String,
    api: ApiClient,
    user_id: RwLock<Option<String>>,
}

impl MoodleScraper {
    pub fn new(config: &SourceConfig, defaults: &ScrapeDefaults) -> anyhow::Result<Self> {
        let site = config.url.trim_end_matches('/').to_string();
        let api = ApiClient::new(
            KIND,
            &site,
            defaults.rate_limit.from_rules(&config.scrape_rules),
            defaults.http_timeout,
        );
        Ok(Self {
            config: config.clone(),
            site,
            api,
            user_id: RwLock::new(None),
        })
    }

    /// Call a web-service function. Moodle reports failures as 200 + `exception`.
    async fn ws(
        &self,
        function: &str,
        params: &[(&str, String)],
    ) -> Result<Option<Value>, HttpError> {
        let mut query = vec![("wsfunction", function.to_string())];
        query.extend_from_slice(params);
        let body = self.api.get_json(WS_PATH, &query).await?;
        match body {
            Some(v) if v.get("exception").is_some() => {
                tracing::warn!(
                    portal = KIND,
                    function,
                    error = str_field(&v, "message").unwrap_or("unknown"),
                    "web service exception"
                );
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Exchange username/password for a web-service token.
    async fn exchange_token(&self, user: &str, password: &str) -> Result<Option<String>, HttpError> {
        let query = [
            ("username", user.to_string()),
            ("password", password.to_string()),
            ("service", TOKEN_SERVICE.to_string()),
        ];
        let body = self.api.get_json(TOKEN_PATH, &query).await?;
        Ok(body.as_ref().and_then(|v| str_field(v, "token")).map(str::to_string))
    }

    fn assignment_record(&self, a: &Value, course: &str, now: DateTime<Utc>) -> Option<DeadlineRecord> {
        let due = a.get("duedate").and_then(Value::as_i64).and_then(from_epoch)?;
        if is_long_past(due, now) {
            return None;
        }
        let id = id_field(a, "id")?;
        let cmid = id_field(a, "cmid").unwrap_or_default();
        Some(
            DeadlineRecord::new(
                format!("[{course}] {}", str_field(a, "name").unwrap_or("Untitled Assignment")),
                due,
                id,
            )
            .description(description(a, "intro"))
            .priority(priority_from_due(due, now))
            .url(format!("{}/mod/assign/view.php?id={cmid}", self.site))
            .tags([course, "moodle", "assignment"])
            .hours(Some(ASSIGNMENT_HOURS)),
        )
    }
}

fn description(v: &Value, key: &str) -> String {
    str_field(v, key)
        .map(|d| truncate(&clean_html(d), DESCRIPTION_LIMIT))
        .unwrap_or_default()
}

/// Calendar events count only when they look like due dates.
fn event_record(e: &Value, course: &str, now: DateTime<Utc>) -> Option<DeadlineRecord> {
    let event_type = str_field(e, "eventtype").unwrap_or_default().to_lowercase();
    let name = str_field(e, "name").unwrap_or("Untitled Event");
    if !event_type.contains("due") && !name.to_lowercase().contains("assignment") {
        return None;
    }
    let due = e.get("timestart").and_then(Value::as_i64).and_then(from_epoch)?;
    if is_long_past(due, now) {
        return None;
    }
    let id = id_field(e, "id")?;
    Some(
        DeadlineRecord::new(format!("[{course}] {name}"), due, format!("event:{id}"))
            .description(description(e, "description"))
            .priority(priority_from_due(due, now))
            .url(str_field(e, "url").unwrap_or_default())
            .tags([course, "moodle", "event"])
            .hours(Some(EVENT_HOURS)),
    )
}

#[async_trait::async_trait]
impl Scraper for MoodleScraper {
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
            objects: vec!["courses", "assignments", "events"],
            requires_auth: true,
            supports_pagination: false,
        }
    }

    fn validate_credentials(&self) -> bool {
        let creds = &self.config.credentials;
        let has_token = creds.str("webservice_token").is_some();
        let has_login = creds.str("username").is_some() && creds.str("password").is_some();
        (has_token || has_login) && host_matches(&self.site, HOST_PATTERNS)
    }

    async fn authenticate(&self) -> anyhow::Result<bool> {
        let creds = &self.config.credentials;
        let token = match creds.str("webservice_token") {
            Some(t) => t.to_string(),
            None => match (creds.str("username"), creds.str("password")) {
                (Some(user), Some(password)) => match self.exchange_token(user, password).await? {
                    Some(t) => t,
                    None => {
                        tracing::warn!(portal = KIND, source_id = self.config.id, "token exchange rejected");
                        return Ok(false);
                    }
                },
                _ => return Ok(false),
            },
        };
        self.api
            .set_fixed_query(vec![
                ("wstoken".to_string(), token),
                ("moodlewsrestformat".to_string(), "json".to_string()),
            ])
            .await;

        let Some(info) = self.ws("core_webservice_get_site_info", &[]).await? else {
            return Ok(false);
        };
        if str_field(&info, "sitename").is_none() {
            return Ok(false);
        }
        *self.user_id.write().await = id_field(&info, "userid");
        Ok(true)
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome> {
        if let Some(out) = auth_gate(self, "Moodle").await {
            return Ok(out);
        }
        let user_id = self.user_id.read().await.clone().unwrap_or_else(|| "0".to_string());
        let mut harvest = Harvest::new();

        let courses = match self
            .ws("core_enrol_get_users_courses", &[("userid", user_id)])
            .await
        {
            Ok(Some(Value::Array(courses))) => {
                harvest.object_done(true);
                courses
            }
            Ok(_) => {
                harvest.no_data("courses");
                harvest.object_done(false);
                Vec::new()
            }
            Err(e) => {
                harvest.request_failed("courses", &e);
                harvest.object_done(false);
                Vec::new()
            }
        };

        let now = Utc::now();
        let window_end = now + Duration::days(EVENT_WINDOW_DAYS);
        for course in &courses {
            let Some(course_id) = id_field(course, "id") else {
                continue;
            };
            let name = str_field(course, "fullname").unwrap_or("Unknown Course");

            match self
                .ws("mod_assign_get_assignments", &[("courseids[0]", course_id.clone())])
                .await
            {
                Ok(Some(body)) => {
                    let assignments = body
                        .get("courses")
                        .and_then(Value::as_array)
                        .and_then(|cs| cs.first())
                        .and_then(|c| c.get("assignments"))
                        .and_then(Value::as_array);
                    for a in assignments.into_iter().flatten() {
                        if let Some(rec) = self.assignment_record(a, name, now) {
                            harvest.push(rec);
                        }
                    }
                }
                Ok(None) => harvest.no_data(format!("assignments of {name}")),
                Err(e) => harvest.request_failed(format!("assignments of {name}"), &e),
            }

            let params = [
                ("events[courseids][0]", course_id.clone()),
                ("options[timestart]", now.timestamp().to_string()),
                ("options[timeend]", window_end.timestamp().to_string()),
            ];
            match self.ws("core_calendar_get_calendar_events", &params).await {
                Ok(Some(body)) => {
                    let events = body.get("events").and_then(Value::as_array);
                    for e in events.into_iter().flatten() {
                        if let Some(rec) = event_record(e, name, now) {
                            harvest.push(rec);
                        }
                    }
                }
                Ok(None) => harvest.no_data(format!("events of {name}")),
                Err(e) => harvest.request_failed(format!("events of {name}"), &e),
            }
        }

        tracing::info!(portal = KIND, source_id = self.config.id, courses = courses.len(), found = harvest.len(), "moodle scrape finished");
        Ok(harvest
            .finish("Moodle")
            .with_meta("courses_count", courses.len()))
    }
}
