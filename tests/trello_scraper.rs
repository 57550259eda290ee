// tests/trello_scraper.rs
mod common;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use common::{fast_rules, serve};
use portal_sync::model::{ScrapeStatus, SourceConfig};
use portal_sync::scrape::portals::TrelloScraper;
use portal_sync::scrape::{ScrapeDefaults, Scraper};
use portal_sync::Priority;
use serde_json::{json, Value};
use std::collections::HashMap;

type Q = Query<HashMap<String, String>>;

fn authorized(q: &HashMap<String, String>) -> bool {
    q.get("key").map(String::as_str) == Some("k") && q.get("token").map(String::as_str) == Some("t")
}

fn guarded(q: &HashMap<String, String>, body: Value) -> Response {
    if authorized(q) {
        Json(body).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

fn app() -> Router {
    Router::new()
        .route(
            "/1/members/me",
            get(|Query(q): Q| async move { guarded(&q, json!({"id": "m1", "username": "ada"})) }),
        )
        .route(
            "/1/members/me/boards",
            get(|Query(q): Q| async move {
                guarded(&q, json!([
                    {"id": "B1", "name": "Launch Plan", "closed": false},
                    {"id": "B2", "name": "Archive", "closed": true}
                ]))
            }),
        )
        .route(
            "/1/boards/B1",
            get(|Query(q): Q| async move { guarded(&q, json!({"id": "B1", "name": "Launch Plan"})) }),
        )
        .route(
            "/1/boards/B1/lists",
            get(|Query(q): Q| async move {
                guarded(&q, json!([{"id": "L1", "name": "Doing"}, {"id": "L2", "name": "Backlog"}]))
            }),
        )
        .route(
            "/1/boards/B1/cards",
            get(|Query(q): Q| async move {
                guarded(&q, json!([
                    {
                        "id": "c1",
                        "name": "Prepare demo",
                        "desc": "",
                        "due": "2025-06-01T10:00:00.000Z",
                        "idList": "L1",
                        "labels": [{"name": "", "color": "red"}],
                        "url": "https://trello.com/c/c1"
                    },
                    {
                        "id": "c2",
                        "name": "Groom backlog by 2025-06-20 deadline",
                        "desc": "",
                        "idList": "L2",
                        "labels": []
                    },
                    {"id": "c3", "name": "No date at all", "idList": "L1", "labels": []}
                ]))
            }),
        )
        .route("/1/boards/GONE", get(|| async { StatusCode::NOT_FOUND }))
}

fn source(base: &str, rules: Value) -> SourceConfig {
    let mut rules = rules;
    rules["api_base"] = json!(base);
    SourceConfig::new(2, "owner-2", "trello", "https://trello.com")
        .with_credentials([("api_key", json!("k")), ("api_token", json!("t"))])
        .with_rules(fast_rules(rules))
}

fn scraper(cfg: &SourceConfig) -> TrelloScraper {
    TrelloScraper::new(cfg, &ScrapeDefaults::default()).unwrap()
}

#[tokio::test]
async fn due_field_and_red_label_without_text_fallback() {
    let base = serve(app()).await;
    let out = scraper(&source(&base, json!({"boards": ["B1"]}))).scrape().await.unwrap();
    assert_eq!(out.status, ScrapeStatus::Success);
    assert_eq!(out.records.len(), 2);

    let demo = out.records.iter().find(|r| r.source_item_id == "c1").unwrap();
    assert_eq!(demo.due_date, Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap());
    assert_eq!(demo.priority, Priority::High);
    assert!(demo.tags.contains("launch-plan"));

    let groom = out.records.iter().find(|r| r.source_item_id == "c2").unwrap();
    assert_eq!(groom.due_date, Utc.with_ymd_and_hms(2025, 6, 20, 0, 0, 0).unwrap());
    assert_eq!(groom.priority, Priority::Medium);
}

#[tokio::test]
async fn list_filter_keeps_only_named_lists() {
    let base = serve(app()).await;
    let cfg = source(&base, json!({"boards": ["B1"], "lists": ["Doing"]}));
    let out = scraper(&cfg).scrape().await.unwrap();
    let ids: Vec<_> = out.records.iter().map(|r| r.source_item_id.as_str()).collect();
    assert_eq!(ids, vec!["c1"]);
}

#[tokio::test]
async fn list_filter_matching_nothing_keeps_the_board() {
    let base = serve(app()).await;
    let cfg = source(&base, json!({"boards": ["B1"], "lists": ["Shipped"]}));
    let out = scraper(&cfg).scrape().await.unwrap();
    assert!(out.is_success());
    let mut ids: Vec<_> = out.records.iter().map(|r| r.source_item_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn falls_back_to_open_member_boards() {
    let base = serve(app()).await;
    let out = scraper(&source(&base, json!({}))).scrape().await.unwrap();
    assert!(out.is_success());
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.metadata["board_ids"], json!(["B1"]));
}

#[tokio::test]
async fn one_missing_board_does_not_sink_the_rest() {
    let base = serve(app()).await;
    let out = scraper(&source(&base, json!({"boards": ["GONE", "B1"]}))).scrape().await.unwrap();
    assert!(out.is_success());
    assert_eq!(out.records.len(), 2);
    assert!(out.errors.iter().any(|e| e.contains("board GONE")), "{:?}", out.errors);
}

#[tokio::test]
async fn wrong_token_fails_authentication() {
    let base = serve(app()).await;
    let cfg = source(&base, json!({"boards": ["B1"]}))
        .with_credentials([("api_key", json!("k")), ("api_token", json!("nope"))]);
    let out = scraper(&cfg).scrape().await.unwrap();
    assert_eq!(out.status, ScrapeStatus::Error);
    assert_eq!(out.errors, vec!["Failed to authenticate with Trello"]);
}
