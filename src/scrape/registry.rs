// src/scrape/registry.rs
//! Source-type key -> adapter factory.
//!
//! Filled once at startup by explicit `register` calls and read-only after
//! that. `global()` holds the built-in six with default pacing.

use super::portals::{
    blackboard, canvas, github, jira, moodle, trello, BlackboardScraper, CanvasScraper,
    GithubScraper, JiraScraper, MoodleScraper, TrelloScraper,
};
use super::{ScrapeDefaults, Scraper};
use crate::model::SourceConfig;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Builds an adapter bound to one configuration.
pub type ScraperFactory = fn(&SourceConfig, &ScrapeDefaults) -> anyhow::Result<Box<dyn Scraper>>;

pub struct ScraperRegistry {
    defaults: ScrapeDefaults,
    factories: HashMap<String, ScraperFactory>,
}

static GLOBAL: Lazy<Arc<ScraperRegistry>> =
    Lazy::new(|| Arc::new(ScraperRegistry::with_builtin(ScrapeDefaults::default())));

/// Process-wide registry with every built-in adapter and default pacing.
pub fn global() -> Arc<ScraperRegistry> {
    Arc::clone(&GLOBAL)
}

fn boxed<S: Scraper + 'static>(
    r: anyhow::Result<S>,
) -> anyhow::Result<Box<dyn Scraper>> {
    r.map(|s| Box::new(s) as Box<dyn Scraper>)
}

impl ScraperRegistry {
    pub fn new(defaults: ScrapeDefaults) -> Self {
        Self {
            defaults,
            factories: HashMap::new(),
        }
    }

    pub fn with_builtin(defaults: ScrapeDefaults) -> Self {
        let mut r = Self::new(defaults);
        r.register(github::KIND, |c, d| boxed(GithubScraper::new(c, d)));
        r.register(jira::KIND, |c, d| boxed(JiraScraper::new(c, d)));
        r.register(trello::KIND, |c, d| boxed(TrelloScraper::new(c, d)));
        r.register(canvas::KIND, |c, d| boxed(CanvasScraper::new(c, d)));
        r.register(moodle::KIND, |c, d| boxed(MoodleScraper::new(c, d)));
        r.register(blackboard::KIND, |c, d| boxed(BlackboardScraper::new(c, d)));
        r
    }

    pub fn defaults(&self) -> &ScrapeDefaults {
        &self.defaults
    }

    /// Keys are case-insensitive. Re-registering a key replaces the factory.
    pub fn register(&mut self, kind: &str, factory: ScraperFactory) {
        let key = kind.trim().to_ascii_lowercase();
        if self.factories.insert(key.clone(), factory).is_some() {
            tracing::debug!(kind = %key, "scraper factory replaced");
        }
    }

    pub fn lookup(&self, kind: &str) -> Option<ScraperFactory> {
        self.factories
            .get(&kind.trim().to_ascii_lowercase())
            .copied()
    }

    pub fn available_types(&self) -> BTreeSet<String> {
        self.factories.keys().cloned().collect()
    }

    /// `None` for an unknown type or a failing factory; the caller treats
    /// both as a configuration error.
    pub fn create(&self, config: &SourceConfig) -> Option<Box<dyn Scraper>> {
        let Some(factory) = self.lookup(&config.kind) else {
            tracing::warn!(kind = %config.kind, source_id = config.id, "no scraper registered for type");
            return None;
        };
        match factory(config, &self.defaults) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(kind = %config.kind, source_id = config.id, error = ?e, "scraper construction failed");
                None
            }
        }
    }

    /// Build a throwaway adapter of `kind` for `config` and run its local checks.
    pub fn validate_config(&self, kind: &str, config: &SourceConfig) -> bool {
        let Some(factory) = self.lookup(kind) else {
            return false;
        };
        factory(config, &self.defaults)
            .map(|s| s.validate_credentials())
            .unwrap_or(false)
    }
}

impl Default for ScraperRegistry {
    fn default() -> Self {
        Self::with_builtin(ScrapeDefaults::default())
    }
}
