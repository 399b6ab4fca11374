//! In-memory write-through cache sitting in front of the durable store
//! (spec §4.5).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{CycleRecord, CycleState};

const EVICTION_AGE: chrono::Duration = chrono::Duration::minutes(5);

struct Inner {
    records: HashMap<Uuid, CycleRecord>,
    dirty: HashSet<Uuid>,
}

pub struct WriteThroughCache {
    inner: Mutex<Inner>,
    max_batch_size: usize,
    pub flush_interval: Duration,
}

impl WriteThroughCache {
    pub fn new(max_batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                dirty: HashSet::new(),
            }),
            max_batch_size,
            flush_interval,
        }
    }

    /// Updates the cached record and marks it dirty. Returns `true` when
    /// the caller should trigger an immediate flush (terminal state, or
    /// the dirty set has reached `max_batch_size`).
    pub async fn save(&self, record: CycleRecord) -> bool {
        let mut inner = self.inner.lock().await;
        let terminal = record.state.is_terminal_for_flush();
        inner.dirty.insert(record.id);
        inner.records.insert(record.id, record);
        terminal || inner.dirty.len() >= self.max_batch_size
    }

    pub async fn get(&self, id: Uuid) -> Option<CycleRecord> {
        self.inner.lock().await.records.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<CycleRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    pub async fn active(&self) -> Vec<CycleRecord> {
        self.inner
            .lock()
            .await
            .records
            .values()
            .filter(|r| r.state.is_active_for_recovery())
            .cloned()
            .collect()
    }

    pub async fn dirty_records(&self) -> Vec<CycleRecord> {
        let inner = self.inner.lock().await;
        inner.dirty.iter().filter_map(|id| inner.records.get(id).cloned()).collect()
    }

    pub async fn dirty_count(&self) -> usize {
        self.inner.lock().await.dirty.len()
    }

    /// Clears dirtiness for exactly the given ids; a record mutated again
    /// mid-flush stays dirty because it was re-inserted into the set after
    /// this snapshot was taken by the caller.
    pub async fn mark_clean(&self, ids: &[Uuid]) {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.dirty.remove(id);
        }
    }

    /// Drops completed/failed records that are clean and older than 5
    /// minutes past their `ended_at`.
    pub async fn evict_stale(&self) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let dirty = inner.dirty.clone();
        inner.records.retain(|id, record| {
            if dirty.contains(id) {
                return true;
            }
            if !matches!(record.state, CycleState::Completed | CycleState::Failed) {
                return true;
            }
            match record.ended_at {
                Some(ended) => now - ended < EVICTION_AGE,
                None => true,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Currency, Cycle};

    fn sample() -> CycleRecord {
        let cycle = Cycle::new(Currency::new("BTC").unwrap(), Currency::new("ETH").unwrap(), Currency::new("USDT").unwrap());
        CycleRecord::new("s1", cycle, 1.0)
    }

    #[tokio::test]
    async fn save_marks_dirty_and_signals_flush_on_terminal_state() {
        let cache = WriteThroughCache::new(100, Duration::from_secs(5));
        let mut record = sample();
        assert!(!cache.save(record.clone()).await);

        record.complete();
        assert!(cache.save(record).await);
    }

    #[tokio::test]
    async fn save_signals_flush_when_batch_size_reached() {
        let cache = WriteThroughCache::new(2, Duration::from_secs(5));
        assert!(!cache.save(sample()).await);
        assert!(cache.save(sample()).await);
    }

    #[tokio::test]
    async fn mark_clean_removes_from_dirty_set() {
        let cache = WriteThroughCache::new(100, Duration::from_secs(5));
        let record = sample();
        let id = record.id;
        cache.save(record).await;
        assert_eq!(cache.dirty_count().await, 1);
        cache.mark_clean(&[id]).await;
        assert_eq!(cache.dirty_count().await, 0);
    }

    #[tokio::test]
    async fn evict_stale_keeps_dirty_and_recent_records() {
        let cache = WriteThroughCache::new(100, Duration::from_secs(5));
        let mut record = sample();
        record.complete();
        record.ended_at = Some(Utc::now() - chrono::Duration::minutes(10));
        let id = record.id;
        cache.save(record).await;
        cache.mark_clean(&[id]).await;
        cache.evict_stale().await;
        assert!(cache.get(id).await.is_none());
    }
}
