// src/sync/orphans.rs
//! Flag stored deadlines that their source has stopped reporting.
//!
//! Nothing is ever deleted: an item can vanish upstream because it was closed,
//! moved, or simply fell outside a filter. Re-sighting clears the flag.

use super::store::DeadlineStore;
use crate::model::{LifecycleStatus, PersistedDeadline};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const DEFAULT_ORPHAN_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub flagged: usize,
    pub cleared: usize,
}

pub fn is_stale(d: &PersistedDeadline, orphan_after: Duration, now: DateTime<Utc>) -> bool {
    d.status != LifecycleStatus::Completed && now - d.last_seen_at > orphan_after
}

/// Bring the orphan flag of every deadline of one source in line with `last_seen_at`.
pub async fn annotate_orphans(
    store: &dyn DeadlineStore,
    owner_id: &str,
    source_id: i64,
    orphan_after: Duration,
    now: DateTime<Utc>,
) -> Result<OrphanReport> {
    let mut report = OrphanReport::default();
    for d in store.deadlines_for_source(owner_id, source_id).await? {
        let stale = is_stale(&d, orphan_after, now);
        if stale == d.possibly_orphaned {
            continue;
        }
        store.set_orphaned(&d.key, stale).await?;
        if stale {
            report.flagged += 1;
        } else {
            report.cleared += 1;
        }
    }
    if report.flagged > 0 {
        tracing::info!(owner = owner_id, source_id, flagged = report.flagged, "deadlines no longer reported upstream");
    }
    Ok(report)
}
