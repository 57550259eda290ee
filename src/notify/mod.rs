// src/notify/mod.rs
//! Downstream alerts for newly discovered high/urgent deadlines.
//!
//! The sync engine only decides *when* to alert; content and channel belong
//! to the `Notifier` implementation.

pub mod webhook;

use crate::model::Priority;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use webhook::WebhookNotifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadlineAlert {
    pub owner_id: String,
    pub source_id: i64,
    pub title: String,
    pub due_date: DateTime<Utc>, // UTC
    pub url: String,
    pub priority: Priority,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &DeadlineAlert) -> anyhow::Result<()>;
}

/// Writes alerts to the tracing log. Default channel for the binary.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &DeadlineAlert) -> anyhow::Result<()> {
        tracing::info!(
            owner = %alert.owner_id,
            source_id = alert.source_id,
            priority = %alert.priority,
            due = %alert.due_date.to_rfc3339(),
            url = %alert.url,
            "new deadline: {}",
            alert.title
        );
        Ok(())
    }
}
