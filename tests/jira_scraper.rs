// tests/jira_scraper.rs
mod common;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::{fast_rules, serve};
use portal_sync::model::{ScrapeStatus, Settings, SourceConfig};
use portal_sync::scrape::portals::JiraScraper;
use portal_sync::scrape::{ScrapeDefaults, Scraper};
use portal_sync::Priority;
use serde_json::{json, Value};
use std::collections::HashMap;

type Q = Query<HashMap<String, String>>;

// ada:tok
const BASIC: &str = "Basic YWRhOnRvaw==";

fn authorized(h: &HeaderMap) -> bool {
    h.get("authorization").and_then(|v| v.to_str().ok()) == Some(BASIC)
}

fn ticket(key: &str, due: &str, prio: &str) -> Value {
    json!({
        "key": key,
        "fields": {
            "summary": format!("Ticket {key}"),
            "duedate": due,
            "priority": {"name": prio},
            "status": {"name": "To Do"},
            "issuetype": {"name": "Bug"}
        }
    })
}

async fn search(h: HeaderMap, Query(q): Q) -> Response {
    if !authorized(&h) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert!(q.get("jql").is_some_and(|j| j.starts_with("project in ('OPS')")));
    let issues = match q.get("startAt").map(String::as_str) {
        Some("0") => json!([ticket("OPS-1", "2025-04-01", "Highest"), ticket("OPS-2", "2025-04-02", "Minor")]),
        Some("2") => json!([ticket("OPS-3", "2025-04-03", "Medium")]),
        _ => json!([]),
    };
    Json(json!({"total": 3, "issues": issues})).into_response()
}

fn app() -> Router {
    Router::new()
        .route(
            "/rest/api/2/myself",
            get(|h: HeaderMap| async move {
                if authorized(&h) {
                    Json(json!({"accountId": "abc"})).into_response()
                } else {
                    StatusCode::UNAUTHORIZED.into_response()
                }
            }),
        )
        .route("/rest/api/2/search", get(search))
        .route(
            "/rest/agile/1.0/board",
            get(|Query(q): Q| async move {
                assert_eq!(q.get("projectKeyOrId").map(String::as_str), Some("OPS"));
                Json(json!({"values": [{"id": 9, "name": "OPS board"}], "isLast": true}))
            }),
        )
        .route(
            "/rest/agile/1.0/board/{id}/sprint",
            get(|Path(id): Path<String>| async move {
                assert_eq!(id, "9");
                Json(json!({"values": [
                    {"id": 51, "name": "Sprint 4", "state": "active", "endDate": "2025-04-10T17:00:00.000Z"},
                    {"id": 52, "name": "Sprint 5", "state": "future"}
                ], "isLast": true}))
            }),
        )
        .route(
            "/rest/api/2/project/{key}/versions",
            get(|| async {
                Json(json!([
                    {"id": "700", "name": "2.0", "releaseDate": "2025-05-01", "released": false},
                    {"id": "600", "name": "1.0", "releaseDate": "2025-01-01", "released": true}
                ]))
            }),
        )
}

fn source(base: &str, secret: &str) -> SourceConfig {
    SourceConfig::new(3, "ops-team", "jira", base)
        .with_credentials(Settings::from_value(json!({"username": "ada", "api_token": secret})))
        .with_rules(fast_rules(json!({"projects": ["OPS"], "max_results": 2})))
}

#[tokio::test]
async fn tickets_sprints_and_versions() {
    let base = serve(app()).await;
    let s = JiraScraper::new(&source(&base, "tok"), &ScrapeDefaults::default()).unwrap();
    assert!(s.validate_credentials());
    let out = s.scrape().await.unwrap();
    assert_eq!(out.status, ScrapeStatus::Success, "{:?}", out.errors);

    let mut ids: Vec<_> = out.records.iter().map(|r| r.source_item_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["OPS-1", "OPS-2", "OPS-3", "sprint:51", "version:700"]);

    let by_id = |id: &str| out.records.iter().find(|r| r.source_item_id == id).unwrap();
    assert_eq!(by_id("OPS-1").priority, Priority::High);
    assert_eq!(by_id("OPS-2").priority, Priority::Low);
    assert_eq!(by_id("OPS-1").source_url, format!("{base}/browse/OPS-1"));
    assert_eq!(by_id("sprint:51").title, "Sprint: Sprint 4");
    assert_eq!(by_id("sprint:51").priority, Priority::High);
    assert_eq!(by_id("version:700").title, "Release: 2.0");
    assert_eq!(out.metadata["projects_scanned"], json!(["OPS"]));
}

#[tokio::test]
async fn wrong_api_token_fails_authentication() {
    let base = serve(app()).await;
    let s = JiraScraper::new(&source(&base, "nope"), &ScrapeDefaults::default()).unwrap();
    assert!(!s.authenticate().await.unwrap());
    let out = s.scrape().await.unwrap();
    assert_eq!(out.status, ScrapeStatus::Error);
    assert_eq!(out.errors, vec!["Failed to authenticate with Jira"]);
}

#[tokio::test]
async fn server_capped_pages_are_followed_to_total() {
    const TOTAL: usize = 150;
    let app = Router::new()
        .route("/rest/api/2/myself", get(|| async { Json(json!({"accountId": "abc"})) }))
        .route(
            "/rest/api/2/search",
            get(|Query(q): Q| async move {
                // asks for 200, gets at most 100, like Jira Cloud
                assert_eq!(q.get("maxResults").map(String::as_str), Some("200"));
                let start: usize = q.get("startAt").and_then(|s| s.parse().ok()).unwrap_or(0);
                let issues: Vec<Value> = (start..TOTAL.min(start + 100))
                    .map(|i| ticket(&format!("OPS-{i}"), "2025-04-01", "Medium"))
                    .collect();
                Json(json!({"startAt": start, "maxResults": 100, "total": TOTAL, "issues": issues}))
            }),
        );
    let base = serve(app).await;
    let cfg = SourceConfig::new(4, "ops-team", "jira", base)
        .with_credentials(Settings::from_value(json!({"username": "ada", "api_token": "tok"})))
        .with_rules(fast_rules(json!({"max_results": 200})));
    let out = JiraScraper::new(&cfg, &ScrapeDefaults::default())
        .unwrap()
        .scrape()
        .await
        .unwrap();
    assert!(out.is_success(), "{:?}", out.errors);
    assert!(out.errors.is_empty(), "{:?}", out.errors);
    assert_eq!(out.records.len(), TOTAL);
    assert!(out.records.iter().any(|r| r.source_item_id == "OPS-149"));
}
