// src/config.rs
//! Runtime settings and the source list for the one-shot binary.
//!
//! Resolution order:
//! 1) $PORTAL_SYNC_CONFIG
//! 2) config/portal_sync.toml
//! 3) config/portal_sync.json
//! 4) built-in defaults, no sources

use crate::model::SourceConfig;
use crate::scrape::{RateLimit, ScrapeDefaults};
use crate::sync::SyncOptions;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PATH: &str = "PORTAL_SYNC_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/portal_sync.toml";
pub const DEFAULT_JSON_PATH: &str = "config/portal_sync.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_concurrency: usize,
    pub http_timeout_secs: u64,
    /// Unset means no guard between runs.
    pub min_resync_interval_secs: Option<u64>,
    pub orphan_after_days: i64,
    /// Seconds between two requests to the same portal.
    pub rate_limit_delay: f64,
    pub max_requests_per_minute: u32,
    /// Alerts go to the log when unset.
    pub webhook_url: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            http_timeout_secs: 30,
            min_resync_interval_secs: None,
            orphan_after_days: crate::sync::orphans::DEFAULT_ORPHAN_AFTER_DAYS,
            rate_limit_delay: 1.0,
            max_requests_per_minute: 60,
            webhook_url: None,
        }
    }
}

impl SyncSettings {
    pub fn scrape_defaults(&self) -> ScrapeDefaults {
        let fallback = RateLimit::default();
        let delay = if self.rate_limit_delay.is_finite() && self.rate_limit_delay >= 0.0 {
            Duration::from_secs_f64(self.rate_limit_delay)
        } else {
            fallback.delay
        };
        ScrapeDefaults {
            rate_limit: RateLimit {
                delay,
                per_minute: if self.max_requests_per_minute == 0 {
                    fallback.per_minute
                } else {
                    self.max_requests_per_minute
                },
            },
            http_timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrency: self.max_concurrency.max(1),
            min_resync_interval: self
                .min_resync_interval_secs
                .and_then(|s| i64::try_from(s).ok())
                .map(chrono::Duration::seconds),
            orphan_after: chrono::Duration::days(self.orphan_after_days.max(1)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortalSyncConfig {
    #[serde(default)]
    pub settings: SyncSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl PortalSyncConfig {
    fn validate(self) -> Result<Self> {
        let mut seen = HashSet::new();
        for s in &self.sources {
            if !seen.insert(s.id) {
                bail!("duplicate source id {}", s.id);
            }
            if s.owner_id.trim().is_empty() {
                bail!("source {} has an empty owner_id", s.id);
            }
        }
        Ok(self)
    }
}

/// Load from an explicit path. TOML or JSON, chosen by extension first.
pub fn load_from(path: &Path) -> Result<PortalSyncConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse(&content, &ext).with_context(|| format!("parsing {}", path.display()))
}

pub fn load_default() -> Result<PortalSyncConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from(DEFAULT_TOML_PATH);
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from(DEFAULT_JSON_PATH);
    if json_p.exists() {
        return load_from(&json_p);
    }
    Ok(PortalSyncConfig::default())
}

fn parse(s: &str, hint_ext: &str) -> Result<PortalSyncConfig> {
    let cfg = match hint_ext {
        "toml" => toml::from_str(s)?,
        "json" => serde_json::from_str(s)?,
        // unknown extension: JSON if it looks like an object, else TOML
        _ if s.trim_start().starts_with('{') => serde_json::from_str(s)?,
        _ => toml::from_str(s)?,
    };
    PortalSyncConfig::validate(cfg)
}
