// src/sync/store.rs
//! Persistence collaborator: source configurations and the deadlines mirrored
//! from them. `MemoryStore` backs tests and the one-shot binary.

use crate::model::{
    DeadlineKey, DeadlineRecord, LifecycleStatus, PersistedDeadline, SourceConfig, SyncStatus,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// What a single upsert did.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Created(PersistedDeadline),
    Updated(PersistedDeadline),
}

impl Upsert {
    pub fn deadline(&self) -> &PersistedDeadline {
        match self {
            Upsert::Created(d) | Upsert::Updated(d) => d,
        }
    }
}

/// Sync metadata written when a run ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFinish {
    pub status: SyncStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait DeadlineStore: Send + Sync {
    async fn sources(&self) -> Result<Vec<SourceConfig>>;

    async fn source(&self, id: i64) -> Result<Option<SourceConfig>>;

    /// Atomically flip an idle/finished source to running. `false` when a
    /// sync is already in flight.
    async fn try_begin_sync(&self, source_id: i64) -> Result<bool>;

    /// Record the end of a run and bump the sync counter.
    async fn finish_sync(&self, source_id: i64, finish: SyncFinish) -> Result<()>;

    /// Insert or update one deadline keyed by `(owner, source, item id)`.
    async fn upsert(
        &self,
        key: &DeadlineKey,
        record: &DeadlineRecord,
        now: DateTime<Utc>,
    ) -> Result<Upsert>;

    async fn deadlines_for_source(&self, owner_id: &str, source_id: i64)
        -> Result<Vec<PersistedDeadline>>;

    async fn set_orphaned(&self, key: &DeadlineKey, orphaned: bool) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<BTreeMap<i64, SourceConfig>>,
    deadlines: RwLock<BTreeMap<DeadlineKey, PersistedDeadline>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: impl IntoIterator<Item = SourceConfig>) -> Self {
        Self {
            sources: RwLock::new(sources.into_iter().map(|s| (s.id, s)).collect()),
            ..Self::default()
        }
    }

    pub async fn add_source(&self, config: SourceConfig) {
        self.sources.write().await.insert(config.id, config);
    }

    pub async fn deadline(&self, key: &DeadlineKey) -> Option<PersistedDeadline> {
        self.deadlines.read().await.get(key).cloned()
    }

    pub async fn deadline_count(&self) -> usize {
        self.deadlines.read().await.len()
    }

    /// Lifecycle changes come from the owner, outside the sync path.
    pub async fn set_status(&self, key: &DeadlineKey, status: LifecycleStatus) -> Result<()> {
        let mut map = self.deadlines.write().await;
        let d = map
            .get_mut(key)
            .ok_or_else(|| anyhow!("deadline {key:?} not found"))?;
        d.status = status;
        Ok(())
    }

    /// Backdate `last_seen_at`, as if the item had not been reported for a while.
    pub async fn set_last_seen(&self, key: &DeadlineKey, at: DateTime<Utc>) -> Result<()> {
        let mut map = self.deadlines.write().await;
        let d = map
            .get_mut(key)
            .ok_or_else(|| anyhow!("deadline {key:?} not found"))?;
        d.last_seen_at = at;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeadlineStore for MemoryStore {
    async fn sources(&self) -> Result<Vec<SourceConfig>> {
        Ok(self.sources.read().await.values().cloned().collect())
    }

    async fn source(&self, id: i64) -> Result<Option<SourceConfig>> {
        Ok(self.sources.read().await.get(&id).cloned())
    }

    async fn try_begin_sync(&self, source_id: i64) -> Result<bool> {
        let mut map = self.sources.write().await;
        let src = map
            .get_mut(&source_id)
            .ok_or_else(|| anyhow!("source {source_id} not found"))?;
        if src.sync_status == SyncStatus::Running {
            return Ok(false);
        }
        src.sync_status = SyncStatus::Running;
        Ok(true)
    }

    async fn finish_sync(&self, source_id: i64, finish: SyncFinish) -> Result<()> {
        let mut map = self.sources.write().await;
        let src = map
            .get_mut(&source_id)
            .ok_or_else(|| anyhow!("source {source_id} not found"))?;
        src.sync_status = finish.status;
        src.last_error = finish.error;
        src.last_sync = Some(finish.at);
        src.sync_count += 1;
        Ok(())
    }

    async fn upsert(
        &self,
        key: &DeadlineKey,
        record: &DeadlineRecord,
        now: DateTime<Utc>,
    ) -> Result<Upsert> {
        let mut map = self.deadlines.write().await;
        if let Some(existing) = map.get_mut(key) {
            existing.apply(record, now);
            return Ok(Upsert::Updated(existing.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let created = PersistedDeadline::from_record(id, key.clone(), record, now);
        map.insert(key.clone(), created.clone());
        Ok(Upsert::Created(created))
    }

    async fn deadlines_for_source(
        &self,
        owner_id: &str,
        source_id: i64,
    ) -> Result<Vec<PersistedDeadline>> {
        Ok(self
            .deadlines
            .read()
            .await
            .values()
            .filter(|d| d.key.owner_id == owner_id && d.key.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn set_orphaned(&self, key: &DeadlineKey, orphaned: bool) -> Result<()> {
        let mut map = self.deadlines.write().await;
        let d = map
            .get_mut(key)
            .ok_or_else(|| anyhow!("deadline {key:?} not found"))?;
        d.possibly_orphaned = orphaned;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;

    fn rec(id: &str, title: &str) -> DeadlineRecord {
        DeadlineRecord::new(title, Utc::now(), id).priority(Priority::High)
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let store = MemoryStore::new();
        let key = DeadlineKey::new("u1", 1, "42");
        let first = store.upsert(&key, &rec("42", "Old"), Utc::now()).await.unwrap();
        assert!(matches!(first, Upsert::Created(_)));
        store.set_status(&key, LifecycleStatus::InProgress).await.unwrap();

        let second = store.upsert(&key, &rec("42", "New"), Utc::now()).await.unwrap();
        let Upsert::Updated(d) = second else {
            panic!("expected update");
        };
        assert_eq!(d.title, "New");
        assert_eq!(d.id, first.deadline().id);
        assert_eq!(d.status, LifecycleStatus::InProgress);
        assert_eq!(store.deadline_count().await, 1);
    }

    #[tokio::test]
    async fn same_item_id_under_other_owner_is_separate() {
        let store = MemoryStore::new();
        store.upsert(&DeadlineKey::new("a", 1, "7"), &rec("7", "A"), Utc::now()).await.unwrap();
        store.upsert(&DeadlineKey::new("b", 1, "7"), &rec("7", "B"), Utc::now()).await.unwrap();
        assert_eq!(store.deadline_count().await, 2);
    }

    #[tokio::test]
    async fn begin_sync_is_exclusive() {
        let store = MemoryStore::with_sources([SourceConfig::new(1, "u", "github", "https://github.com/a/b")]);
        assert!(store.try_begin_sync(1).await.unwrap());
        assert!(!store.try_begin_sync(1).await.unwrap());
        store
            .finish_sync(1, SyncFinish { status: SyncStatus::Success, error: None, at: Utc::now() })
            .await
            .unwrap();
        let src = store.source(1).await.unwrap().unwrap();
        assert_eq!(src.sync_count, 1);
        assert!(src.last_sync.is_some());
        assert!(store.try_begin_sync(1).await.unwrap());
        assert!(store.try_begin_sync(99).await.is_err());
    }
}
