// src/scrape/http.rs
//! Outbound HTTP for portal adapters.
//!
//! One `ApiClient` per adapter instance. Every request goes through the
//! throttle (per-minute quota + cooperative delay since the previous request),
//! so requests within one configuration are naturally serialized.
//!
//! Non-2xx and non-JSON responses are logged and surface as `Ok(None)`.
//! HTTP 429, timeouts and transport failures are typed errors.

use crate::metrics::ensure_metrics_described;
use crate::model::Settings;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use metrics::counter;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("rate limited by remote (HTTP 429): {url}")]
    RateLimited { url: String },
    #[error("request timed out: {url}")]
    Timeout { url: String },
    #[error("request failed: {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout { .. })
    }
}

/// Request pacing for one adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Minimum gap between two consecutive requests.
    pub delay: Duration,
    /// Ceiling on requests per minute (token bucket).
    pub per_minute: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            per_minute: 60,
        }
    }
}

impl RateLimit {
    /// Override `self` with `rate_limit_delay` / `max_requests_per_minute` scrape rules.
    pub fn from_rules(self, rules: &Settings) -> Self {
        let delay = rules
            .f64("rate_limit_delay")
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.delay);
        let per_minute = rules
            .u64("max_requests_per_minute")
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.per_minute);
        Self { delay, per_minute }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Bearer(String),
    Basic { user: String, password: String },
}

pub struct ApiClient {
    portal: &'static str,
    client: Client,
    base: String,
    auth: RwLock<Auth>,
    /// Query pairs appended to every request (Trello key/token, Moodle wstoken).
    fixed_query: RwLock<Vec<(String, String)>>,
    headers: Vec<(&'static str, &'static str)>,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
    limiter: DirectLimiter,
}

impl ApiClient {
    pub fn new(portal: &'static str, base: &str, limit: RateLimit, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("portal-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = ?e, "http client builder failed; using defaults");
                Client::new()
            });
        let per_minute = NonZeroU32::new(limit.per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            portal,
            client,
            base: base.trim_end_matches('/').to_string(),
            auth: RwLock::new(Auth::None),
            fixed_query: RwLock::new(Vec::new()),
            headers: Vec::new(),
            delay: limit.delay,
            last_request: Mutex::new(None),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    /// Static header sent with every request (`Accept` variants and the like).
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = RwLock::new(auth);
        self
    }

    pub fn with_fixed_query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.fixed_query = RwLock::new(pairs);
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn set_auth(&self, auth: Auth) {
        *self.auth.write().await = auth;
    }

    pub async fn has_auth(&self) -> bool {
        !matches!(*self.auth.read().await, Auth::None)
    }

    pub async fn set_fixed_query(&self, pairs: Vec<(String, String)>) {
        *self.fixed_query.write().await = pairs;
    }

    /// Absolute URLs pass through; anything else is joined onto the base.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base, path.trim_start_matches('/'))
        }
    }

    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, HttpError> {
        let url = self.url(path);
        let req = self.client.get(&url).query(query);
        self.send(req, url, true).await
    }

    /// Form POST; used for token exchanges. `basic` overrides the stored auth.
    pub async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        basic: Option<(&str, &str)>,
    ) -> Result<Option<Value>, HttpError> {
        let url = self.url(path);
        let mut req = self.client.post(&url).form(form);
        if let Some((user, password)) = basic {
            req = req.basic_auth(user, Some(password));
        }
        self.send(req, url, basic.is_none()).await
    }

    async fn send(
        &self,
        mut req: RequestBuilder,
        url: String,
        stored_auth: bool,
    ) -> Result<Option<Value>, HttpError> {
        ensure_metrics_described();
        self.throttle().await;

        for (name, value) in &self.headers {
            req = req.header(*name, *value);
        }

        req = match &*self.auth.read().await {
            _ if !stored_auth => req,
            Auth::None => req,
            Auth::Bearer(token) => req.bearer_auth(token),
            Auth::Basic { user, password } => req.basic_auth(user, Some(password)),
        };
        {
            let fixed = self.fixed_query.read().await;
            if !fixed.is_empty() {
                req = req.query(&*fixed);
            }
        }

        counter!("portal_http_requests_total", "portal" => self.portal).increment(1);
        let rsp = match req.send().await {
            Ok(rsp) => rsp,
            Err(e) if e.is_timeout() => {
                tracing::warn!(portal = self.portal, url = %url, "request timed out");
                return Err(HttpError::Timeout { url });
            }
            Err(e) => {
                tracing::warn!(portal = self.portal, url = %url, error = ?e, "request failed");
                return Err(HttpError::Transport { url, source: e });
            }
        };

        let status = rsp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            counter!("portal_http_rate_limited_total", "portal" => self.portal).increment(1);
            tracing::warn!(portal = self.portal, url = %url, "remote rate limit hit");
            return Err(HttpError::RateLimited { url });
        }
        if !status.is_success() {
            tracing::warn!(portal = self.portal, url = %url, status = status.as_u16(), "non-success status");
            return Ok(None);
        }

        let is_json = rsp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
        if !is_json {
            tracing::warn!(portal = self.portal, url = %url, "response content type is not JSON");
            return Ok(None);
        }

        match rsp.json::<Value>().await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_timeout() => Err(HttpError::Timeout { url }),
            Err(e) => {
                tracing::warn!(portal = self.portal, url = %url, error = ?e, "response is not JSON");
                Ok(None)
            }
        }
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;

        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < self.delay {
                tokio::time::sleep(self.delay - since).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rate_limit_rules_override_defaults() {
        let rules = Settings::from_value(json!({
            "rate_limit_delay": 0.25,
            "max_requests_per_minute": 30
        }));
        let rl = RateLimit::default().from_rules(&rules);
        assert_eq!(rl.delay, Duration::from_millis(250));
        assert_eq!(rl.per_minute, 30);
    }

    #[test]
    fn invalid_rate_rules_fall_back() {
        let rules = Settings::from_value(json!({
            "rate_limit_delay": -3,
            "max_requests_per_minute": 0
        }));
        assert_eq!(RateLimit::default().from_rules(&rules), RateLimit::default());
    }

    #[test]
    fn url_joining() {
        let c = ApiClient::new("test", "https://x.example/api/", RateLimit::default(), Duration::from_secs(1));
        assert_eq!(c.url("/v1/items"), "https://x.example/api/v1/items");
        assert_eq!(c.url("v1/items"), "https://x.example/api/v1/items");
        assert_eq!(c.url("https://other.example/a"), "https://other.example/a");
    }

    #[tokio::test]
    async fn throttle_enforces_delay_between_requests() {
        let c = ApiClient::new(
            "test",
            "http://127.0.0.1:9",
            RateLimit { delay: Duration::from_millis(60), per_minute: 600 },
            Duration::from_secs(1),
        );
        let t0 = Instant::now();
        c.throttle().await;
        c.throttle().await;
        assert!(t0.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn auth_can_be_swapped_after_construction() {
        let c = ApiClient::new("test", "http://127.0.0.1:9", RateLimit::default(), Duration::from_secs(1));
        assert!(!c.has_auth().await);
        c.set_auth(Auth::Bearer("tok".into())).await;
        assert!(c.has_auth().await);
    }
}
