// src/scrape/portals/github.rs
//! GitHub issues, pull requests and milestones for one repository.
//!
//! Rules: `repo_url` (defaults to the source URL), `include_closed`,
//! `milestone_filter`, `api_base` (GitHub Enterprise / tests).
//! Credentials: optional `token`; without it the public API is used.

use super::{id_field, label_names, str_field};
use crate::model::{DeadlineRecord, Priority, ScrapeOutcome, SourceConfig};
use crate::scrape::dates::{extract_due_date, parse_date};
use crate::scrape::priority::any_label_contains;
use crate::scrape::text::truncate;
use crate::scrape::{
    auth_gate, fetch_numbered, is_loopback, ApiClient, Auth, Harvest, PortalInfo, RateLimit,
    ScrapeDefaults, Scraper,
};
use serde_json::Value;

pub const KIND: &str = "github";
const DEFAULT_API: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;
const MAX_PAGES: u32 = 50;
const MAX_LABEL_TAGS: usize = 5;
const DESCRIPTION_LIMIT: usize = 500;

const HIGH_LABELS: &[&str] = &["critical", "urgent", "high priority", "blocker", "p0", "p1"];
const LOW_LABELS: &[&str] = &["low priority", "nice to have", "enhancement", "p3", "p4", "p5"];

pub struct GithubScraper {
    config: SourceConfig,
    api: ApiClient,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Issue,
    PullRequest,
}

impl GithubScraper {
    pub fn new(config: &SourceConfig, defaults: &ScrapeDefaults) -> anyhow::Result<Self> {
        let rules = &config.scrape_rules;
        let limit: RateLimit = defaults.rate_limit.from_rules(rules);
        let base = rules.str("api_base").unwrap_or(DEFAULT_API);
        let auth = match config.credentials.str("token") {
            Some(t) => Auth::Bearer(t.to_string()),
            None => Auth::None,
        };
        let api = ApiClient::new(KIND, base, limit, defaults.http_timeout)
            .with_header("Accept", "application/vnd.github+json")
            .with_auth(auth);
        Ok(Self {
            config: config.clone(),
            api,
        })
    }

    fn repo_url(&self) -> &str {
        self.config
            .scrape_rules
            .str("repo_url")
            .unwrap_or(&self.config.url)
    }

    fn state(&self) -> &'static str {
        if self.config.scrape_rules.bool("include_closed").unwrap_or(false) {
            "all"
        } else {
            "open"
        }
    }

    async fn milestone_number(&self, repo: &str, title: &str) -> Option<String> {
        let query = [
            ("state", "all".to_string()),
            ("per_page", PAGE_SIZE.to_string()),
        ];
        let listing = self
            .api
            .get_json(&format!("/repos/{repo}/milestones"), &query)
            .await
            .ok()
            .flatten()?;
        listing
            .as_array()?
            .iter()
            .find(|m| str_field(m, "title") == Some(title))
            .and_then(|m| id_field(m, "number"))
    }

    async fn collect_items(
        &self,
        harvest: &mut Harvest,
        repo: &str,
        kind: ItemKind,
        milestone: Option<&str>,
    ) {
        let (path, label) = match kind {
            ItemKind::Issue => (format!("/repos/{repo}/issues"), "issues"),
            ItemKind::PullRequest => (format!("/repos/{repo}/pulls"), "pull requests"),
        };
        let mut query = vec![("state", self.state().to_string())];
        if let Some(m) = milestone {
            query.push(("milestone", m.to_string()));
        }
        let (items, reached) =
            fetch_numbered(&self.api, harvest, &path, &query, PAGE_SIZE, MAX_PAGES, label).await;
        for item in &items {
            // PRs also appear in the issues listing
            if kind == ItemKind::Issue && item.get("pull_request").is_some() {
                continue;
            }
            if let Some(rec) = item_record(item, kind) {
                harvest.push(rec);
            }
        }
        harvest.object_done(reached);
    }

    async fn collect_milestones(&self, harvest: &mut Harvest, repo: &str, filter: Option<&str>) {
        let path = format!("/repos/{repo}/milestones");
        let query = [("state", "all".to_string())];
        let (milestones, reached) =
            fetch_numbered(&self.api, harvest, &path, &query, PAGE_SIZE, MAX_PAGES, "milestones")
                .await;
        for m in &milestones {
            if filter.is_some_and(|f| str_field(m, "title") != Some(f)) {
                continue;
            }
            if let Some(rec) = milestone_record(m) {
                harvest.push(rec);
            }
        }
        harvest.object_done(reached);
    }
}

/// `owner/repo` from a github.com repository URL.
pub fn parse_repo(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if !matches!(host.as_str(), "github.com" | "www.github.com") && !is_loopback(&host) {
        return None;
    }
    let mut parts = parsed.path_segments()?.filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?.trim_end_matches(".git");
    if repo.is_empty() {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

pub fn label_priority(labels: &[String]) -> Priority {
    if any_label_contains(labels, HIGH_LABELS) {
        Priority::High
    } else if any_label_contains(labels, LOW_LABELS) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

fn item_record(item: &Value, kind: ItemKind) -> Option<DeadlineRecord> {
    let title = str_field(item, "title")?;
    let body = str_field(item, "body").unwrap_or_default();
    let due = item
        .get("milestone")
        .and_then(|m| str_field(m, "due_on"))
        .and_then(parse_date)
        .or_else(|| extract_due_date(&format!("{title} {body}")))?;
    let id = id_field(item, "number")?;

    let labels = label_names(item.get("labels").unwrap_or(&Value::Null));
    let mut priority = label_priority(&labels);
    let (kind_tag, title) = match kind {
        ItemKind::Issue => ("issue", title.to_string()),
        ItemKind::PullRequest => {
            if item.get("draft").and_then(Value::as_bool).unwrap_or(false) {
                priority = Priority::Low;
            }
            ("pull-request", format!("PR: {title}"))
        }
    };

    let label_tags: Vec<String> = labels
        .iter()
        .take(MAX_LABEL_TAGS)
        .map(|l| l.to_lowercase())
        .collect();
    Some(
        DeadlineRecord::new(title, due, id)
            .description(truncate(body, DESCRIPTION_LIMIT))
            .priority(priority)
            .url(str_field(item, "html_url").unwrap_or_default())
            .tags([kind_tag, "github"])
            .tags(label_tags),
    )
}

fn milestone_record(m: &Value) -> Option<DeadlineRecord> {
    let due = str_field(m, "due_on").and_then(parse_date)?;
    let id = id_field(m, "id")?;
    let title = str_field(m, "title").unwrap_or("Untitled");
    Some(
        DeadlineRecord::new(format!("Milestone: {title}"), due, format!("milestone:{id}"))
            .description(truncate(
                str_field(m, "description").unwrap_or_default(),
                DESCRIPTION_LIMIT,
            ))
            .priority(Priority::Medium)
            .url(str_field(m, "html_url").unwrap_or_default())
            .tags(["milestone", "github"]),
    )
}

#[async_trait::async_trait]
impl Scraper for GithubScraper {
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
            url: self.repo_url().to_string(),
            objects: vec!["issues", "pull_requests", "milestones"],
            requires_auth: false,
            supports_pagination: true,
        }
    }

    fn validate_credentials(&self) -> bool {
        // token is optional, but must be a string when present
        if self.config.credentials.is_non_string("token") {
            return false;
        }
        parse_repo(self.repo_url()).is_some()
    }

    async fn authenticate(&self) -> anyhow::Result<bool> {
        if !self.api.has_auth().await {
            return Ok(true);
        }
        let me = self.api.get_json("/user", &[]).await?;
        Ok(me.as_ref().and_then(|v| str_field(v, "login")).is_some())
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome> {
        if let Some(out) = auth_gate(self, "GitHub").await {
            return Ok(out);
        }
        let Some(repo) = parse_repo(self.repo_url()) else {
            return Ok(ScrapeOutcome::error(
                "No repository URL provided",
                vec!["repo_url is required in configuration".to_string()],
            ));
        };
        let filter = self.config.scrape_rules.str("milestone_filter");
        let milestone = match filter {
            Some(title) => self.milestone_number(&repo, title).await,
            None => None,
        };

        let mut harvest = Harvest::new();
        self.collect_items(&mut harvest, &repo, ItemKind::Issue, milestone.as_deref())
            .await;
        self.collect_items(&mut harvest, &repo, ItemKind::PullRequest, None)
            .await;
        self.collect_milestones(&mut harvest, &repo, filter).await;

        tracing::info!(portal = KIND, source_id = self.config.id, repo = %repo, found = harvest.len(), "github scrape finished");
        Ok(harvest
            .finish(&repo)
            .with_meta("repository", repo.clone())
            .with_meta("include_closed", self.state() == "all")
            .with_meta("milestone_filter", filter.map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn cfg(url: &str) -> SourceConfig {
        SourceConfig::new(1, "owner-1", KIND, url)
    }

    #[test]
    fn repo_parsing() {
        assert_eq!(parse_repo("https://github.com/rust-lang/rust").as_deref(), Some("rust-lang/rust"));
        assert_eq!(parse_repo("https://www.github.com/a/b.git/").as_deref(), Some("a/b"));
        assert_eq!(parse_repo("https://github.com/only-owner"), None);
        assert_eq!(parse_repo("https://gitlab.com/a/b"), None);
    }

    #[test]
    fn token_must_be_a_string() {
        let ok = GithubScraper::new(&cfg("https://github.com/a/b"), &ScrapeDefaults::default()).unwrap();
        assert!(ok.validate_credentials());

        let bad_cfg = cfg("https://github.com/a/b").with_credentials([("token", json!(123))]);
        let bad = GithubScraper::new(&bad_cfg, &ScrapeDefaults::default()).unwrap();
        assert!(!bad.validate_credentials());

        let no_repo = GithubScraper::new(&cfg("https://github.com/"), &ScrapeDefaults::default()).unwrap();
        assert!(!no_repo.validate_credentials());
    }

    #[test]
    fn blocker_issue_with_text_deadline() {
        let issue = json!({
            "number": 7,
            "title": "Fix bug (deadline: 2025-03-01)",
            "body": null,
            "html_url": "https://github.com/a/b/issues/7",
            "labels": [{"name": "blocker"}]
        });
        let rec = item_record(&issue, ItemKind::Issue).unwrap();
        assert_eq!(rec.due_date, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(rec.priority, Priority::High);
        assert_eq!(rec.source_item_id, "7");
        assert!(rec.tags.contains("issue") && rec.tags.contains("blocker"));
    }

    #[test]
    fn milestone_due_on_wins_over_text() {
        let issue = json!({
            "number": 8,
            "title": "Ship it, due 2025-01-01",
            "milestone": {"due_on": "2025-02-02T08:00:00Z"},
            "labels": []
        });
        let rec = item_record(&issue, ItemKind::Issue).unwrap();
        assert_eq!(rec.due_date, Utc.with_ymd_and_hms(2025, 2, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn draft_pr_is_low_and_undated_items_are_skipped() {
        let pr = json!({
            "number": 9, "title": "WIP", "body": "due 2025-04-04",
            "draft": true, "labels": [{"name": "urgent"}]
        });
        let rec = item_record(&pr, ItemKind::PullRequest).unwrap();
        assert_eq!(rec.priority, Priority::Low);
        assert_eq!(rec.title, "PR: WIP");

        let undated = json!({"number": 10, "title": "No date", "labels": []});
        assert!(item_record(&undated, ItemKind::Issue).is_none());
    }

    #[test]
    fn label_heuristics() {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert_eq!(label_priority(&s(&["Critical bug"])), Priority::High);
        assert_eq!(label_priority(&s(&["enhancement"])), Priority::Low);
        assert_eq!(label_priority(&s(&["docs"])), Priority::Medium);
    }
}
