// src/scrape/portals/jira.rs
//! Jira tickets (JQL search), sprints and unreleased versions.
//!
//! Credentials: `username` + `api_token` (or `password`), sent as Basic auth.
//! Rules: `projects`, `assignee`, `statuses`, `max_results`.

use super::{id_field, str_field};
use crate::model::{DeadlineRecord, Priority, ScrapeOutcome, SourceConfig};
use crate::scrape::dates::{extract_due_date, parse_date};
use crate::scrape::priority::normalize_priority;
use crate::scrape::text::truncate;
use crate::scrape::{
    auth_gate, host_matches, ApiClient, Auth, Harvest, PageTracker, PortalInfo, ScrapeDefaults,
    Scraper,
};
use serde_json::Value;

pub const KIND: &str = "jira";
const SEARCH_PAGE: usize = 100;
const AGILE_PAGE: usize = 50;
const MAX_PAGES: u32 = 50;
const DESCRIPTION_LIMIT: usize = 500;

pub struct JiraScraper {
    config: SourceConfig,
    site: String,
    api: ApiClient,
}

impl JiraScraper {
    pub fn new(config: &SourceConfig, defaults: &ScrapeDefaults) -> anyhow::Result<Self> {
        let site = site_root(&config.url);
        let creds = &config.credentials;
        let auth = match (creds.str("username"), creds.str("api_token").or(creds.str("password"))) {
            (Some(user), Some(secret)) => Auth::Basic {
                user: user.to_string(),
                password: secret.to_string(),
            },
            _ => Auth::None,
        };
        let api = ApiClient::new(
            KIND,
            &site,
            defaults.rate_limit.from_rules(&config.scrape_rules),
            defaults.http_timeout,
        )
        .with_header("Accept", "application/json")
        .with_auth(auth);
        Ok(Self {
            config: config.clone(),
            site,
            api,
        })
    }

    fn projects(&self) -> Vec<String> {
        self.config.scrape_rules.str_list("projects")
    }

    fn page_size(&self) -> usize {
        self.config
            .scrape_rules
            .u64("max_results")
            .map(|n| n.clamp(1, 1000) as usize)
            .unwrap_or(SEARCH_PAGE)
    }

    /// JQL from the project/assignee/status rules, newest first.
    pub fn build_jql(&self) -> String {
        let rules = &self.config.scrape_rules;
        let mut conditions = Vec::new();
        let projects = self.projects();
        if !projects.is_empty() {
            conditions.push(format!("project in ({})", quoted_list(&projects)));
        }
        if let Some(assignee) = rules.str("assignee") {
            conditions.push(format!("assignee = '{}'", assignee.replace('\'', "\\'")));
        }
        let statuses = rules.str_list("statuses");
        if statuses.is_empty() {
            conditions.push("status not in ('Resolved', 'Closed', 'Done')".to_string());
        } else {
            conditions.push(format!("status in ({})", quoted_list(&statuses)));
        }
        format!("{} ORDER BY created DESC", conditions.join(" AND "))
    }

    /// JQL search pages. The server may cap `maxResults` below what was asked,
    /// so the offset advances by what actually came back and `total` decides
    /// when to stop.
    async fn collect_tickets(&self, harvest: &mut Harvest) {
        let jql = self.build_jql();
        let page_size = self.page_size();
        // short pages are judged against the server's own maxResults below
        let mut pages = PageTracker::new(1, MAX_PAGES);
        let mut start_at = 0usize;
        loop {
            let query = [
                ("jql", jql.clone()),
                ("startAt", start_at.to_string()),
                ("maxResults", page_size.to_string()),
                ("fields", "*all".to_string()),
            ];
            let label = format!("tickets page {}", pages.pages() + 1);
            let (more, step) = match self.api.get_json("/rest/api/2/search", &query).await {
                Ok(Some(body)) => match body.get("issues").and_then(Value::as_array) {
                    Some(issues) => {
                        for issue in issues {
                            if let Some(rec) = self.ticket_record(issue) {
                                harvest.push(rec);
                            }
                        }
                        let n = issues.len();
                        let more = pages.page_ok(n);
                        let fetched = start_at + n;
                        let more = match body.get("total").and_then(Value::as_u64) {
                            Some(total) => more && (fetched as u64) < total,
                            None => {
                                let served = body
                                    .get("maxResults")
                                    .and_then(Value::as_u64)
                                    .map_or(page_size, |m| m as usize);
                                more && n >= served
                            }
                        };
                        (more, n)
                    }
                    None => {
                        harvest.no_data(label);
                        (pages.page_failed(), page_size)
                    }
                },
                Ok(None) => {
                    harvest.no_data(label);
                    (pages.page_failed(), page_size)
                }
                Err(e) => {
                    harvest.request_failed(label, &e);
                    (pages.page_failed(), page_size)
                }
            };
            if !more {
                break;
            }
            start_at += step;
        }
        harvest.object_done(pages.reached());
    }

    /// Agile listings (`values` + `isLast`). Returns the values and whether any page was read.
    async fn agile_list(
        &self,
        harvest: &mut Harvest,
        path: &str,
        extra: &[(&str, String)],
        label: &str,
    ) -> (Vec<Value>, bool) {
        let mut out = Vec::new();
        let mut pages = PageTracker::new(1, MAX_PAGES);
        let mut start_at = 0usize;
        loop {
            let mut query: Vec<(&str, String)> = extra.to_vec();
            query.push(("startAt", start_at.to_string()));
            query.push(("maxResults", AGILE_PAGE.to_string()));
            let page_label = format!("{label} page {}", pages.pages() + 1);
            let (more, step) = match self.api.get_json(path, &query).await {
                Ok(Some(body)) => {
                    let values = body
                        .get("values")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    let is_last = body.get("isLast").and_then(Value::as_bool).unwrap_or(true);
                    let n = values.len();
                    out.extend(values);
                    let more = pages.page_ok(n);
                    (more && !is_last, n)
                }
                Ok(None) => {
                    harvest.no_data(page_label);
                    (pages.page_failed(), AGILE_PAGE)
                }
                Err(e) => {
                    harvest.request_failed(page_label, &e);
                    (pages.page_failed(), AGILE_PAGE)
                }
            };
            if !more {
                break;
            }
            start_at += step;
        }
        (out, pages.reached())
    }

    async fn collect_sprints(&self, harvest: &mut Harvest, projects: &[String]) {
        let mut reached = false;
        for project in projects {
            let (boards, ok) = self
                .agile_list(
                    harvest,
                    "/rest/agile/1.0/board",
                    &[("projectKeyOrId", project.clone()), ("type", "scrum".to_string())],
                    &format!("boards of {project}"),
                )
                .await;
            reached |= ok;
            for board in &boards {
                let Some(board_id) = id_field(board, "id") else {
                    continue;
                };
                let (sprints, _) = self
                    .agile_list(
                        harvest,
                        &format!("/rest/agile/1.0/board/{board_id}/sprint"),
                        &[("state", "active,future".to_string())],
                        &format!("sprints of board {board_id}"),
                    )
                    .await;
                for sprint in &sprints {
                    if let Some(rec) = self.sprint_record(sprint, project, &board_id) {
                        harvest.push(rec);
                    }
                }
            }
        }
        harvest.object_done(reached);
    }

    async fn collect_versions(&self, harvest: &mut Harvest, projects: &[String]) {
        let mut reached = false;
        for project in projects {
            let path = format!("/rest/api/2/project/{project}/versions");
            match self.api.get_json(&path, &[]).await {
                Ok(Some(Value::Array(versions))) => {
                    reached = true;
                    for v in &versions {
                        if let Some(rec) = self.version_record(v, project) {
                            harvest.push(rec);
                        }
                    }
                }
                Ok(_) => harvest.no_data(format!("versions of {project}")),
                Err(e) => harvest.request_failed(format!("versions of {project}"), &e),
            }
        }
        harvest.object_done(reached);
    }

    fn ticket_record(&self, issue: &Value) -> Option<DeadlineRecord> {
        let key = str_field(issue, "key")?;
        let fields = issue.get("fields")?;
        let summary = str_field(fields, "summary").unwrap_or("Untitled Issue");
        let description = str_field(fields, "description").unwrap_or_default();
        let due = str_field(fields, "duedate")
            .and_then(parse_date)
            .or_else(|| extract_due_date(&format!("{summary} {description}")))?;

        let priority = fields
            .get("priority")
            .and_then(|p| str_field(p, "name"))
            .map(jira_priority)
            .unwrap_or(Priority::Medium);

        let mut tags = vec!["jira".to_string(), "ticket".to_string()];
        for field in ["status", "issuetype"] {
            if let Some(name) = fields.get(field).and_then(|v| str_field(v, "name")) {
                tags.push(name.to_lowercase());
            }
        }
        Some(
            DeadlineRecord::new(summary, due, key)
                .description(truncate(description, DESCRIPTION_LIMIT))
                .priority(priority)
                .url(format!("{}/browse/{key}", self.site))
                .tags(tags)
                .hours(estimate_hours(fields)),
        )
    }

    fn sprint_record(&self, sprint: &Value, project: &str, board_id: &str) -> Option<DeadlineRecord> {
        let due = str_field(sprint, "endDate").and_then(parse_date)?;
        let id = id_field(sprint, "id")?;
        let state = str_field(sprint, "state").unwrap_or("unknown").to_lowercase();
        let priority = if state == "active" {
            Priority::High
        } else {
            Priority::Medium
        };
        let board = id_field(sprint, "originBoardId").unwrap_or_else(|| board_id.to_string());
        Some(
            DeadlineRecord::new(
                format!("Sprint: {}", str_field(sprint, "name").unwrap_or("Untitled Sprint")),
                due,
                format!("sprint:{id}"),
            )
            .description(format!("Sprint end date for {project}"))
            .priority(priority)
            .url(format!("{}/secure/RapidBoard.jspa?rapidView={board}", self.site))
            .tags(["jira", "sprint", state.as_str()]),
        )
    }

    fn version_record(&self, version: &Value, project: &str) -> Option<DeadlineRecord> {
        if version.get("released").and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }
        let due = str_field(version, "releaseDate").and_then(parse_date)?;
        let id = id_field(version, "id")?;
        let description = str_field(version, "description")
            .map(str::to_string)
            .unwrap_or_else(|| format!("Release version for {project}"));
        Some(
            DeadlineRecord::new(
                format!("Release: {}", str_field(version, "name").unwrap_or("Untitled Release")),
                due,
                format!("version:{id}"),
            )
            .description(description)
            .priority(Priority::High)
            .url(format!("{}/projects/{project}", self.site))
            .tags(["jira", "release", "version"]),
        )
    }
}

/// Site root of a Jira URL, with any `/rest/api/2` suffix dropped.
fn site_root(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/rest/api/2")
        .unwrap_or(trimmed)
        .to_string()
}

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("'{}'", s.replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Jira priority names: highest/critical/blocker are high, lowest/trivial/minor
/// low; other names go through the generic table.
pub fn jira_priority(name: &str) -> Priority {
    let n = name.to_lowercase();
    if ["highest", "critical", "blocker"].iter().any(|k| n.contains(k)) {
        Priority::High
    } else if ["lowest", "trivial", "minor"].iter().any(|k| n.contains(k)) {
        Priority::Low
    } else {
        normalize_priority(&n)
    }
}

/// `timeoriginalestimate` is in seconds; otherwise any numeric `*estimate*` field.
fn estimate_hours(fields: &Value) -> Option<u32> {
    if let Some(secs) = fields.get("timeoriginalestimate").and_then(Value::as_f64) {
        if secs > 0.0 {
            return Some((secs / 3600.0) as u32);
        }
    }
    fields.as_object()?.iter().find_map(|(name, v)| {
        if name.to_lowercase().contains("estimate") {
            v.as_f64().filter(|h| *h > 0.0).map(|h| h as u32)
        } else {
            None
        }
    })
}

#[async_trait::async_trait]
impl Scraper for JiraScraper {
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
            objects: vec!["tickets", "sprints", "versions"],
            requires_auth: true,
            supports_pagination: true,
        }
    }

    fn validate_credentials(&self) -> bool {
        let creds = &self.config.credentials;
        if creds.str("username").is_none() {
            return false;
        }
        if creds.is_non_string("api_token") || creds.is_non_string("password") {
            return false;
        }
        if creds.str("api_token").is_none() && creds.str("password").is_none() {
            return false;
        }
        // Atlassian cloud, any dotted on-prem host, or localhost
        host_matches(&self.site, &[".", "localhost"])
    }

    async fn authenticate(&self) -> anyhow::Result<bool> {
        let me = self.api.get_json("/rest/api/2/myself", &[]).await?;
        Ok(me
            .as_ref()
            .is_some_and(|v| ["accountId", "name", "key"].iter().any(|k| str_field(v, k).is_some())))
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome> {
        if let Some(out) = auth_gate(self, "Jira").await {
            return Ok(out);
        }
        let projects = self.projects();
        let mut harvest = Harvest::new();
        self.collect_tickets(&mut harvest).await;
        if !projects.is_empty() {
            self.collect_sprints(&mut harvest, &projects).await;
            self.collect_versions(&mut harvest, &projects).await;
        }

        tracing::info!(portal = KIND, source_id = self.config.id, found = harvest.len(), "jira scrape finished");
        Ok(harvest
            .finish("Jira")
            .with_meta("jira_url", self.site.clone())
            .with_meta("projects_scanned", projects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn scraper(rules: Value, creds: Value) -> JiraScraper {
        let cfg = SourceConfig::new(3, "u", KIND, "https://acme.atlassian.net/rest/api/2/")
            .with_rules(crate::model::Settings::from_value(rules))
            .with_credentials(crate::model::Settings::from_value(creds));
        JiraScraper::new(&cfg, &ScrapeDefaults::default()).unwrap()
    }

    #[test]
    fn site_root_strips_rest_suffix() {
        assert_eq!(site_root("https://acme.atlassian.net/rest/api/2/"), "https://acme.atlassian.net");
        assert_eq!(site_root("https://jira.corp.example"), "https://jira.corp.example");
    }

    #[test]
    fn jql_defaults_and_filters() {
        let s = scraper(json!({}), json!({}));
        assert_eq!(
            s.build_jql(),
            "status not in ('Resolved', 'Closed', 'Done') ORDER BY created DESC"
        );
        let s = scraper(
            json!({"projects": ["OPS", "ENG"], "assignee": "me", "statuses": ["In Progress"]}),
            json!({}),
        );
        assert_eq!(
            s.build_jql(),
            "project in ('OPS', 'ENG') AND assignee = 'me' AND status in ('In Progress') ORDER BY created DESC"
        );
    }

    #[test]
    fn credentials_need_user_and_secret() {
        assert!(!scraper(json!({}), json!({"username": "a"})).validate_credentials());
        assert!(scraper(json!({}), json!({"username": "a", "api_token": "t"})).validate_credentials());
        assert!(scraper(json!({}), json!({"username": "a", "password": "p"})).validate_credentials());
        assert!(!scraper(json!({}), json!({"username": "a", "api_token": 5})).validate_credentials());
    }

    #[test]
    fn ticket_fields_map_onto_record() {
        let s = scraper(json!({}), json!({}));
        let issue = json!({
            "key": "OPS-12",
            "fields": {
                "summary": "Rotate certificates",
                "description": "before expiry",
                "duedate": "2025-05-20",
                "priority": {"name": "Highest"},
                "status": {"name": "In Progress"},
                "issuetype": {"name": "Task"},
                "timeoriginalestimate": 14400
            }
        });
        let rec = s.ticket_record(&issue).unwrap();
        assert_eq!(rec.source_item_id, "OPS-12");
        assert_eq!(rec.due_date, Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap());
        assert_eq!(rec.priority, Priority::High);
        assert_eq!(rec.estimated_hours, Some(4));
        assert_eq!(rec.source_url, "https://acme.atlassian.net/browse/OPS-12");
        assert!(rec.tags.contains("in progress") && rec.tags.contains("task"));
    }

    #[test]
    fn released_versions_are_skipped() {
        let s = scraper(json!({}), json!({}));
        let released = json!({"id": "1", "name": "1.0", "releaseDate": "2025-01-01", "released": true});
        assert!(s.version_record(&released, "OPS").is_none());
        let upcoming = json!({"id": "2", "name": "2.0", "releaseDate": "2025-09-01", "released": false});
        let rec = s.version_record(&upcoming, "OPS").unwrap();
        assert_eq!(rec.priority, Priority::High);
        assert_eq!(rec.source_item_id, "version:2");
    }

    #[test]
    fn priority_names() {
        assert_eq!(jira_priority("Blocker"), Priority::High);
        assert_eq!(jira_priority("Minor"), Priority::Low);
        assert_eq!(jira_priority("High"), Priority::High);
        assert_eq!(jira_priority("Medium"), Priority::Medium);
    }
}
