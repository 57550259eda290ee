// src/notify/webhook.rs
use super::{DeadlineAlert, Notifier};
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// JSON POST to a webhook URL with bounded retries and doubling backoff.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    backoff: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// First retry delay; doubles on every further attempt.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    fn delay(&self, attempt: u8) -> Duration {
        self.backoff * (1u32 << (attempt - 1).min(16))
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    owner_id: &'a str,
    source_id: i64,
    title: &'a str,
    due_date: String,
    priority: &'static str,
    url: &'a str,
}

impl<'a> From<&'a DeadlineAlert> for WebhookPayload<'a> {
    fn from(a: &'a DeadlineAlert) -> Self {
        Self {
            event: "deadline.created",
            owner_id: &a.owner_id,
            source_id: a.source_id,
            title: &a.title,
            due_date: a.due_date.to_rfc3339(),
            priority: a.priority.as_str(),
            url: &a.url,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &DeadlineAlert) -> Result<()> {
        let payload = WebhookPayload::from(alert);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(attempt, error = %err, "webhook attempt failed; retrying");
            tokio::time::sleep(self.delay(attempt)).await;
        }
    }
}
