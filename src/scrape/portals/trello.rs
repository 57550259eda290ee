// src/scrape/portals/trello.rs
//! Trello cards, one bulk fetch per board.
//!
//! Credentials: `api_key` + `api_token`, sent as `key`/`token` query pairs.
//! Rules: `boards` (ids), `board_urls` (`https://trello.com/b/<id>/...`),
//! `lists` (list-name filter), `include_completed`, `api_base`.
//! Without configured boards the member's open boards are scanned.

use super::{id_field, str_field};
use crate::model::{DeadlineRecord, Priority, ScrapeOutcome, SourceConfig};
use crate::scrape::dates::{extract_due_date, parse_date};
use crate::scrape::text::{extract_hours, slugify, truncate};
use crate::scrape::{
    auth_gate, host_matches, is_loopback, ApiClient, Harvest, PortalInfo, ScrapeDefaults, Scraper,
};
use serde_json::Value;
use std::collections::HashSet;

pub const KIND: &str = "trello";
const DEFAULT_API: &str = "https://api.trello.com";
const MAX_LABEL_TAGS: usize = 5;
const DESCRIPTION_LIMIT: usize = 500;

const LOW_LABELS: &[&str] = &[
    "low priority", "low", "minor", "nice to have", "optional", "someday", "enhancement", "feature",
];
const HIGH_LABELS: &[&str] = &[
    "urgent", "critical", "high", "priority", "important", "blocker", "asap", "rush",
];

pub struct TrelloScraper {
    config: SourceConfig,
    api: ApiClient,
}

impl TrelloScraper {
    pub fn new(config: &SourceConfig, defaults: &ScrapeDefaults) -> anyhow::Result<Self> {
        let rules = &config.scrape_rules;
        let creds = &config.credentials;
        let mut fixed = Vec::new();
        if let (Some(key), Some(token)) = (creds.str("api_key"), creds.str("api_token")) {
            fixed.push(("key".to_string(), key.to_string()));
            fixed.push(("token".to_string(), token.to_string()));
        }
        let api = ApiClient::new(
            KIND,
            rules.str("api_base").unwrap_or(DEFAULT_API),
            defaults.rate_limit.from_rules(rules),
            defaults.http_timeout,
        )
        .with_fixed_query(fixed);
        Ok(Self {
            config: config.clone(),
            api,
        })
    }

    /// Board ids from the `boards` and `board_urls` rules, first occurrence wins.
    pub fn configured_boards(&self) -> Vec<String> {
        let rules = &self.config.scrape_rules;
        let mut out: Vec<String> = Vec::new();
        let from_urls = rules
            .str_list("board_urls")
            .into_iter()
            .filter_map(|u| board_id_from_url(&u));
        for id in rules.str_list("boards").into_iter().chain(from_urls) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    async fn member_boards(&self, harvest: &mut Harvest) -> Option<Vec<String>> {
        let query = [("filter", "open".to_string()), ("fields", "name,closed".to_string())];
        match self.api.get_json("/1/members/me/boards", &query).await {
            Ok(Some(Value::Array(boards))) => Some(
                boards
                    .iter()
                    .filter(|b| !b.get("closed").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|b| id_field(b, "id"))
                    .collect(),
            ),
            Ok(_) => {
                harvest.no_data("member boards");
                None
            }
            Err(e) => {
                harvest.request_failed("member boards", &e);
                None
            }
        }
    }

    /// Ids of lists whose name is in the `lists` rule; `None` when no filter is set
    /// or nothing matched.
    async fn list_filter(&self, harvest: &mut Harvest, board_id: &str) -> Option<HashSet<String>> {
        let wanted = self.config.scrape_rules.str_list("lists");
        if wanted.is_empty() {
            return None;
        }
        let path = format!("/1/boards/{board_id}/lists");
        let query = [("fields", "name".to_string())];
        let lists = match self.api.get_json(&path, &query).await {
            Ok(Some(Value::Array(lists))) => lists,
            Ok(_) => {
                harvest.no_data(format!("lists of board {board_id}"));
                Vec::new()
            }
            Err(e) => {
                harvest.request_failed(format!("lists of board {board_id}"), &e);
                Vec::new()
            }
        };
        let ids: HashSet<String> = lists
            .iter()
            .filter(|l| str_field(l, "name").is_some_and(|n| wanted.iter().any(|w| w == n)))
            .filter_map(|l| id_field(l, "id"))
            .collect();
        // no matching list: keep the whole board
        if ids.is_empty() {
            tracing::debug!(portal = KIND, board_id, ?wanted, "no list matched the filter");
            return None;
        }
        Some(ids)
    }

    async fn collect_board(&self, harvest: &mut Harvest, board_id: &str) -> bool {
        let board_query = [("fields", "name,url".to_string())];
        let board = match self.api.get_json(&format!("/1/boards/{board_id}"), &board_query).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                harvest.no_data(format!("board {board_id}"));
                return false;
            }
            Err(e) => {
                harvest.request_failed(format!("board {board_id}"), &e);
                return false;
            }
        };
        let board_name = str_field(&board, "name").unwrap_or("Unknown Board").to_string();
        let lists = self.list_filter(harvest, board_id).await;

        let cards_query = [
            ("filter", "open".to_string()),
            ("fields", "name,desc,due,dueComplete,url,labels,idList".to_string()),
            ("members", "true".to_string()),
            ("member_fields", "fullName,username".to_string()),
        ];
        let cards = match self
            .api
            .get_json(&format!("/1/boards/{board_id}/cards"), &cards_query)
            .await
        {
            Ok(Some(Value::Array(cards))) => cards,
            Ok(_) => {
                harvest.no_data(format!("cards of board {board_id}"));
                return false;
            }
            Err(e) => {
                harvest.request_failed(format!("cards of board {board_id}"), &e);
                return false;
            }
        };

        let include_completed = self
            .config
            .scrape_rules
            .bool("include_completed")
            .unwrap_or(false);
        for card in &cards {
            if let Some(allowed) = &lists {
                let in_list = str_field(card, "idList").is_some_and(|l| allowed.contains(l));
                if !in_list {
                    continue;
                }
            }
            if let Some(rec) = card_record(card, &board_name, include_completed) {
                harvest.push(rec);
            }
        }
        true
    }
}

/// `https://trello.com/b/<id>/<slug>` -> `<id>`.
pub fn board_id_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let mut parts = parsed.path_segments()?.filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some("b"), Some(id)) => Some(id.to_string()),
        _ => None,
    }
}

fn is_valid_board_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if !matches!(host.as_str(), "trello.com" | "www.trello.com") && !is_loopback(&host) {
        return false;
    }
    let parts: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    parts.len() >= 2 && matches!(parts[0], "b" | "c")
}

/// Label name keywords first, then colour; low indicators win ties within a label.
pub fn label_priority(labels: &[Value]) -> Priority {
    for label in labels {
        let name = str_field(label, "name").unwrap_or_default().to_lowercase();
        let color = str_field(label, "color").unwrap_or_default().to_lowercase();
        if LOW_LABELS.iter().any(|k| name.contains(k)) || color == "green" {
            return Priority::Low;
        }
        if HIGH_LABELS.iter().any(|k| name.contains(k)) || color == "red" {
            return Priority::High;
        }
    }
    Priority::Medium
}

fn card_record(card: &Value, board_name: &str, include_completed: bool) -> Option<DeadlineRecord> {
    let id = id_field(card, "id")?;
    let name = str_field(card, "name").unwrap_or("Untitled Card");
    let desc = str_field(card, "desc").unwrap_or_default();
    let due = str_field(card, "due")
        .and_then(parse_date)
        .or_else(|| extract_due_date(&format!("{name} {desc}")))?;
    if card.get("dueComplete").and_then(Value::as_bool).unwrap_or(false) && !include_completed {
        return None;
    }

    let labels = card
        .get("labels")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let label_tags: Vec<String> = labels
        .iter()
        .take(MAX_LABEL_TAGS)
        .filter_map(|l| str_field(l, "name"))
        .map(str::to_lowercase)
        .collect();

    let members: Vec<&str> = card
        .get("members")
        .and_then(Value::as_array)
        .map(|ms| {
            ms.iter()
                .filter_map(|m| str_field(m, "fullName").or_else(|| str_field(m, "username")))
                .collect()
        })
        .unwrap_or_default();
    let mut description = if desc.is_empty() {
        format!("Card from {board_name}")
    } else {
        desc.to_string()
    };
    if !members.is_empty() {
        description.push_str(&format!("\nAssigned to: {}", members.join(", ")));
    }

    Some(
        DeadlineRecord::new(name, due, id)
            .description(truncate(&description, DESCRIPTION_LIMIT))
            .priority(label_priority(&labels))
            .url(str_field(card, "url").unwrap_or_default())
            .tags(["trello", "card"])
            .tags(label_tags)
            .tags([slugify(board_name)])
            .hours(extract_hours(desc)),
    )
}

#[async_trait::async_trait]
impl Scraper for TrelloScraper {
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
            objects: vec!["cards"],
            requires_auth: true,
            supports_pagination: false,
        }
    }

    fn validate_credentials(&self) -> bool {
        let creds = &self.config.credentials;
        if creds.str("api_key").is_none() || creds.str("api_token").is_none() {
            return false;
        }
        if !host_matches(&self.config.url, &["trello"]) {
            return false;
        }
        // an API override must still be an http(s) URL with a host
        if let Some(base) = self.config.scrape_rules.str("api_base") {
            if !host_matches(base, &[""]) {
                return false;
            }
        }
        self.config
            .scrape_rules
            .str_list("board_urls")
            .iter()
            .all(|u| is_valid_board_url(u))
    }

    async fn authenticate(&self) -> anyhow::Result<bool> {
        let query = [("fields", "id,username".to_string())];
        let me = self.api.get_json("/1/members/me", &query).await?;
        Ok(me.as_ref().and_then(|v| id_field(v, "id")).is_some())
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeOutcome> {
        if let Some(out) = auth_gate(self, "Trello").await {
            return Ok(out);
        }
        let mut harvest = Harvest::new();
        let mut boards = self.configured_boards();
        if boards.is_empty() {
            match self.member_boards(&mut harvest).await {
                Some(ids) => boards = ids,
                None => {
                    harvest.object_done(false);
                    return Ok(harvest.finish("Trello"));
                }
            }
        }
        if boards.is_empty() {
            return Ok(ScrapeOutcome::error(
                "No valid boards found to scrape",
                vec!["No board IDs could be determined from configuration".to_string()],
            ));
        }

        for board in &boards {
            let reached = self.collect_board(&mut harvest, board).await;
            harvest.object_done(reached);
        }

        tracing::info!(portal = KIND, source_id = self.config.id, boards = boards.len(), found = harvest.len(), "trello scrape finished");
        Ok(harvest
            .finish(&format!("{} Trello boards", boards.len()))
            .with_meta("boards_scanned", boards.len())
            .with_meta("board_ids", boards))
    }
}
