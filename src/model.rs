//! # Data Model
//! Canonical types shared by the scrapers and the sync engine.
//!
//! - `SourceConfig`: an owner's connection to one tracker/LMS instance.
//! - `DeadlineRecord`: one normalized item produced by a scrape run.
//! - `ScrapeOutcome`: status + records + errors for one adapter invocation.
//! - `PersistedDeadline`: the stored mirror of a record, keyed by `DeadlineKey`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// The four canonical priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// High and urgent items trigger a notification on first sighting.
    pub fn is_alerting(&self) -> bool {
        matches!(self, Priority::High | Priority::Urgent)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one scrape invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Idle,
    Running,
    Success,
    Error,
    Timeout,
}

/// Sync state stored on a source configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

/// Lifecycle of a persisted deadline. Owned by other parts of the system;
/// the sync engine only ever sets `Pending` on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Overdue,
}

/// Opaque JSON object with typed accessors. Used for both the credential
/// blob and the scrape-rule map of a source configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(pub Map<String, Value>);

impl Settings {
    pub fn from_value(v: Value) -> Self {
        match v {
            Value::Object(m) => Self(m),
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Non-empty string value. Non-string values are treated as absent.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// True when the key is present but holds something other than a string.
    pub fn is_non_string(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(v) if !v.is_string() && !v.is_null())
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// String list; a single string is accepted as a one-element list.
    pub fn str_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        }
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Settings {
    fn from(pairs: [(&str, Value); N]) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

/// An owner's connection to one external tracker or LMS instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: i64,
    pub owner_id: String,
    #[serde(default)]
    pub name: String,
    /// Registry key: "github", "jira", "trello", "canvas", "moodle", "blackboard".
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub credentials: Settings,
    #[serde(default)]
    pub scrape_rules: Settings,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Seconds between scheduled syncs; consumed by the external scheduler.
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: u64,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub sync_count: u64,
}

fn default_active() -> bool {
    true
}

fn default_sync_frequency() -> u64 {
    3600
}

impl SourceConfig {
    pub fn new(
        id: i64,
        owner_id: impl Into<String>,
        kind: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let kind = kind.into();
        Self {
            id,
            owner_id: owner_id.into(),
            name: format!("{kind} portal"),
            kind,
            url: url.into(),
            credentials: Settings::default(),
            scrape_rules: Settings::default(),
            is_active: true,
            sync_frequency: default_sync_frequency(),
            last_sync: None,
            sync_status: SyncStatus::Idle,
            last_error: None,
            sync_count: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<Settings>) -> Self {
        self.credentials = credentials.into();
        self
    }

    pub fn with_rules(mut self, rules: impl Into<Settings>) -> Self {
        self.scrape_rules = rules.into();
        self
    }

    /// Lowercased host of the base URL, used to group syncs per remote instance.
    pub fn instance_host(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| self.url.to_ascii_lowercase())
    }
}

/// One extracted item, normalized. Built once per scrape run and never mutated
/// after it leaves the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineRecord {
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    /// Identifier of the item inside its source configuration (issue number, card id, ...).
    pub source_item_id: String,
    pub source_url: String,
    pub tags: BTreeSet<String>,
    pub estimated_hours: Option<u32>,
}

impl DeadlineRecord {
    pub fn new(
        title: impl Into<String>,
        due_date: DateTime<Utc>,
        source_item_id: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            due_date,
            priority: Priority::Medium,
            source_item_id: source_item_id.into(),
            source_url: String::new(),
            tags: BTreeSet::new(),
            estimated_hours: None,
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.description = if text.trim().is_empty() { None } else { Some(text) };
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags.extend(
            tags.into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty()),
        );
        self
    }

    pub fn hours(mut self, hours: Option<u32>) -> Self {
        self.estimated_hours = hours;
        self
    }
}

/// Result of one adapter invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub status: ScrapeStatus,
    pub records: Vec<DeadlineRecord>,
    pub message: String,
    pub errors: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl ScrapeOutcome {
    pub fn success(records: Vec<DeadlineRecord>, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = format!("Successfully scraped {} deadlines", records.len());
        }
        Self {
            status: ScrapeStatus::Success,
            records,
            message,
            errors: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Error outcome. With no explicit errors, the message itself is the only entry.
    pub fn error(message: impl Into<String>, errors: Vec<String>) -> Self {
        let message = message.into();
        let errors = if errors.is_empty() {
            vec![message.clone()]
        } else {
            errors
        };
        Self {
            status: ScrapeStatus::Error,
            records: Vec::new(),
            message,
            errors,
            metadata: Map::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ScrapeStatus::Success
    }

    /// Successful, but some pages or object types could not be read.
    pub fn has_warnings(&self) -> bool {
        self.is_success() && !self.errors.is_empty()
    }
}

/// Uniqueness key for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeadlineKey {
    pub owner_id: String,
    pub source_id: i64,
    pub source_item_id: String,
}

impl DeadlineKey {
    pub fn new(owner_id: &str, source_id: i64, source_item_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            source_id,
            source_item_id: source_item_id.to_string(),
        }
    }
}

/// A deadline as kept by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDeadline {
    pub id: i64,
    pub key: DeadlineKey,
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub source_url: String,
    pub tags: BTreeSet<String>,
    pub estimated_hours: Option<u32>,
    pub status: LifecycleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time a scrape reported this item.
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub possibly_orphaned: bool,
}

impl PersistedDeadline {
    pub fn from_record(id: i64, key: DeadlineKey, rec: &DeadlineRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            key,
            title: rec.title.clone(),
            description: rec.description.clone(),
            due_date: rec.due_date,
            priority: rec.priority,
            source_url: rec.source_url.clone(),
            tags: rec.tags.clone(),
            estimated_hours: rec.estimated_hours,
            status: LifecycleStatus::Pending,
            created_at: now,
            updated_at: now,
            last_seen_at: now,
            possibly_orphaned: false,
        }
    }

    /// Mirror the mutable fields of a fresh sighting. Lifecycle status is left alone.
    pub fn apply(&mut self, rec: &DeadlineRecord, now: DateTime<Utc>) {
        self.title = rec.title.clone();
        self.description = rec.description.clone();
        self.due_date = rec.due_date;
        self.priority = rec.priority;
        self.source_url = rec.source_url.clone();
        self.tags = rec.tags.clone();
        self.estimated_hours = rec.estimated_hours;
        self.updated_at = now;
        self.last_seen_at = now;
        self.possibly_orphaned = false;
    }
}
