// tests/api_client.rs
mod common;

use axum::http::header;
use axum::routing::get;
use axum::{Json, Router};
use common::serve;
use portal_sync::scrape::{ApiClient, RateLimit};
use serde_json::json;
use std::time::Duration;

fn client(base: &str) -> ApiClient {
    ApiClient::new(
        "test",
        base,
        RateLimit {
            delay: Duration::ZERO,
            per_minute: 10_000,
        },
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn only_json_content_types_are_parsed() {
    let app = Router::new()
        .route("/json", get(|| async { Json(json!({"ok": true})) }))
        .route(
            "/vendor",
            get(|| async { ([(header::CONTENT_TYPE, "application/vnd.api+json; charset=utf-8")], r#"{"ok": 1}"#) }),
        )
        // JSON-looking body behind an HTML login page content type
        .route(
            "/html",
            get(|| async { ([(header::CONTENT_TYPE, "text/html")], r#"{"ok": true}"#) }),
        )
        .route("/plain", get(|| async { "[1, 2, 3]" }));
    let base = serve(app).await;
    let c = client(&base);

    assert_eq!(c.get_json("/json", &[]).await.unwrap(), Some(json!({"ok": true})));
    assert_eq!(c.get_json("/vendor", &[]).await.unwrap(), Some(json!({"ok": 1})));
    assert_eq!(c.get_json("/html", &[]).await.unwrap(), None);
    assert_eq!(c.get_json("/plain", &[]).await.unwrap(), None);
}
