//! The durable pending-change store.
//!
//! Every mutation builds the next queue, writes it to durable storage, and
//! only then swaps it into memory. A failed write leaves both copies as
//! they were before the call. All operations serialize on one lock.

use super::envelope::{self, QUEUE_KEY};
use super::types::SyncError;
use crate::model::PendingChange;
use crate::storage::{DurableStorage, PersistenceError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

type DepthObserver = Arc<dyn Fn(usize) + Send + Sync>;

/// What a sync cycle decided for one attempted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Applied or terminally failed: take it off the queue.
    Remove,
    /// Retryable failure: bump the counter, removing the change once it
    /// reaches `max_retries`.
    Retry { max_retries: u32 },
}

/// How [`ChangeStore::settle`] applied a [`Disposition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Removed,
    Deferred { attempts: u32 },
    Exhausted { attempts: u32 },
    /// The change left the queue before the batch was settled.
    Missing,
}

struct Inner {
    /// Kept sorted by [`PendingChange::queue_order`].
    changes: Vec<PendingChange>,
    next_sequence: u64,
}

/// Persisted queue of [`PendingChange`]s.
pub struct ChangeStore {
    storage: Arc<dyn DurableStorage>,
    inner: Mutex<Inner>,
    depth_observer: Mutex<Option<DepthObserver>>,
}

impl ChangeStore {
    /// Load the queue from `storage`, upgrading older formats in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored queue cannot be read, verified or
    /// upgraded. A corrupt queue is never silently replaced.
    pub fn open(storage: Arc<dyn DurableStorage>) -> Result<Self, PersistenceError> {
        let mut changes = match storage.get(QUEUE_KEY)? {
            Some(bytes) => {
                let decoded = envelope::decode(&bytes)?;
                if decoded.migrated_from.is_some() {
                    storage.set(QUEUE_KEY, &envelope::encode(&decoded.changes)?)?;
                }
                decoded.changes
            }
            None => Vec::new(),
        };
        changes.sort_by(PendingChange::queue_order);
        let next_sequence = changes.iter().map(|c| c.sequence + 1).max().unwrap_or(0);
        debug!(count = changes.len(), "Loaded pending change queue");

        Ok(Self {
            storage,
            inner: Mutex::new(Inner {
                changes,
                next_sequence,
            }),
            depth_observer: Mutex::new(None),
        })
    }

    /// Called with the new depth after every committed mutation that
    /// changes it. Runs after the store lock is released.
    pub fn set_depth_observer(&self, observer: impl Fn(usize) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.depth_observer.lock() {
            *slot = Some(Arc::new(observer));
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, PersistenceError> {
        self.inner.lock().map_err(|_| PersistenceError::Poisoned)
    }

    fn notify_depth(&self, depth: usize) {
        let observer = self.depth_observer.lock().ok().and_then(|slot| slot.clone());
        if let Some(observer) = observer {
            observer(depth);
        }
    }

    /// Write `next` durably, then make it the in-memory queue.
    fn commit(&self, inner: &mut Inner, next: Vec<PendingChange>) -> Result<(), PersistenceError> {
        let bytes = envelope::encode(&next)?;
        if let Err(e) = self.storage.set(QUEUE_KEY, &bytes) {
            warn!(error = %e, "Failed to persist pending change queue");
            return Err(e);
        }
        inner.changes = next;
        Ok(())
    }

    /// Durably append a change.
    ///
    /// The store assigns the change's `sequence`. Returns the change as
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateChange`] if the id is already queued and
    /// [`SyncError::Persistence`] if the write fails; the queue is unchanged
    /// in both cases.
    pub fn enqueue(&self, mut change: PendingChange) -> Result<PendingChange, SyncError> {
        let depth = {
            let mut inner = self.lock()?;
            if inner.changes.iter().any(|c| c.id == change.id) {
                return Err(SyncError::DuplicateChange(change.id));
            }
            change.sequence = inner.next_sequence;

            let mut next = inner.changes.clone();
            let at = next.partition_point(|c| c.queue_order(&change).is_lt());
            next.insert(at, change.clone());
            self.commit(&mut inner, next)?;
            inner.next_sequence += 1;
            inner.changes.len()
        };

        debug!(
            change_id = %change.id,
            entity = %change.entity_kind(),
            entity_id = %change.entity_id,
            op = %change.change_kind(),
            "Change queued"
        );
        self.notify_depth(depth);
        Ok(change)
    }

    /// Up to `max_count` changes in dispatch order, without removing them.
    #[must_use]
    pub fn dequeue_batch(&self, max_count: usize) -> Vec<PendingChange> {
        self.lock()
            .map(|inner| inner.changes.iter().take(max_count).cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a change. Removing an absent id succeeds and returns `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the change stays queued.
    pub fn remove(&self, id: &str) -> Result<bool, PersistenceError> {
        let depth = {
            let mut inner = self.lock()?;
            let Some(pos) = inner.changes.iter().position(|c| c.id == id) else {
                return Ok(false);
            };
            let mut next = inner.changes.clone();
            next.remove(pos);
            self.commit(&mut inner, next)?;
            inner.changes.len()
        };
        self.notify_depth(depth);
        Ok(true)
    }

    /// Bump a change's retry counter and return the new count.
    ///
    /// Returns `None` if the change is no longer queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the counter is unchanged.
    pub fn increment_retry(&self, id: &str) -> Result<Option<u32>, PersistenceError> {
        let mut inner = self.lock()?;
        let Some(pos) = inner.changes.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let mut next = inner.changes.clone();
        let count = bump_retry(&mut next[pos]);
        self.commit(&mut inner, next)?;
        Ok(Some(count))
    }

    /// Apply a whole batch of dispositions with a single durable write.
    ///
    /// Results come back in the order of `batch`. Nothing is written when
    /// every id is already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; no disposition is applied.
    pub fn settle(&self, batch: &[(String, Disposition)]) -> Result<Vec<Settled>, PersistenceError> {
        let (settled, depth) = {
            let mut inner = self.lock()?;
            let mut next = inner.changes.clone();
            let mut settled = Vec::with_capacity(batch.len());

            for (id, disposition) in batch {
                let Some(pos) = next.iter().position(|c| &c.id == id) else {
                    settled.push(Settled::Missing);
                    continue;
                };
                settled.push(match *disposition {
                    Disposition::Remove => {
                        next.remove(pos);
                        Settled::Removed
                    }
                    Disposition::Retry { max_retries } => {
                        let attempts = bump_retry(&mut next[pos]);
                        if attempts >= max_retries {
                            next.remove(pos);
                            Settled::Exhausted { attempts }
                        } else {
                            Settled::Deferred { attempts }
                        }
                    }
                });
            }

            if settled.iter().all(|s| *s == Settled::Missing) {
                return Ok(settled);
            }
            let before = inner.changes.len();
            self.commit(&mut inner, next)?;
            let after = inner.changes.len();
            (settled, (after != before).then_some(after))
        };

        if let Some(depth) = depth {
            self.notify_depth(depth);
        }
        Ok(settled)
    }

    /// Drop every queued change and return how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the queue is unchanged.
    pub fn clear(&self) -> Result<usize, PersistenceError> {
        let removed = {
            let mut inner = self.lock()?;
            let removed = inner.changes.len();
            if removed == 0 {
                return Ok(0);
            }
            self.commit(&mut inner, Vec::new())?;
            removed
        };
        warn!(removed, "Cleared pending change queue");
        self.notify_depth(0);
        Ok(removed)
    }

    /// Ordered copy of the whole queue.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingChange> {
        self.lock().map(|inner| inner.changes.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<PendingChange> {
        self.lock()
            .ok()
            .and_then(|inner| inner.changes.iter().find(|c| c.id == id).cloned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |inner| inner.changes.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest retry count among queued changes.
    #[must_use]
    pub fn min_retry_count(&self) -> Option<u32> {
        self.lock()
            .ok()
            .and_then(|inner| inner.changes.iter().map(|c| c.retry_count).min())
    }
}

fn bump_retry(change: &mut PendingChange) -> u32 {
    change.retry_count = change.retry_count.saturating_add(1);
    change.retry_count
}

impl std::fmt::Debug for ChangeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStore").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, NewChange, Priority, Product};
    use crate::storage::{MemoryStorage, SqliteStore};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn change(entity: &str, at: i64, priority: Priority) -> PendingChange {
        NewChange::update(Product::new(entity, "Milk", ts(0)))
            .with_priority(priority)
            .into_pending(ts(at), "user", "device")
    }

    fn memory_store() -> (Arc<MemoryStorage>, ChangeStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = ChangeStore::open(storage.clone()).unwrap();
        (storage, store)
    }

    #[test]
    fn test_enqueue_orders_by_priority_then_time() {
        let (_, store) = memory_store();
        let low = store.enqueue(change("p1", 1, Priority::Low)).unwrap();
        let late = store.enqueue(change("p2", 5, Priority::Normal)).unwrap();
        let early = store.enqueue(change("p3", 2, Priority::Normal)).unwrap();
        let high = store.enqueue(change("p4", 9, Priority::High)).unwrap();

        let ids: Vec<_> = store.snapshot().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![high.id.clone(), early.id.clone(), late.id, low.id]);

        let batch: Vec<_> = store.dequeue_batch(2).into_iter().map(|c| c.id).collect();
        assert_eq!(batch, vec![high.id, early.id]);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_equal_timestamps_keep_enqueue_order() {
        let (_, store) = memory_store();
        let a = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();
        let b = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();
        assert!(a.sequence < b.sequence);

        let ids: Vec<_> = store.snapshot().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_, store) = memory_store();
        let c = change("p1", 1, Priority::Normal);
        store.enqueue(c.clone()).unwrap();
        assert!(matches!(store.enqueue(c), Err(SyncError::DuplicateChange(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_write_leaves_queue_untouched() {
        let (storage, store) = memory_store();
        let kept = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();

        storage.fail_writes(true);
        assert!(matches!(
            store.enqueue(change("p2", 2, Priority::Normal)),
            Err(SyncError::Persistence(_))
        ));
        assert!(store.remove(&kept.id).is_err());
        assert!(store.increment_retry(&kept.id).is_err());
        assert!(store.clear().is_err());

        assert_eq!(store.snapshot(), vec![kept.clone()]);
        storage.fail_writes(false);

        let reopened = ChangeStore::open(storage).unwrap();
        assert_eq!(reopened.snapshot(), vec![kept]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (storage, store) = memory_store();
        let c = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();
        let writes = storage.write_count();

        assert!(store.remove(&c.id).unwrap());
        assert!(!store.remove(&c.id).unwrap());
        assert!(!store.remove("chg_missing").unwrap());
        assert_eq!(storage.write_count(), writes + 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_increment_retry() {
        let (_, store) = memory_store();
        let c = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();
        assert_eq!(store.increment_retry(&c.id).unwrap(), Some(1));
        assert_eq!(store.increment_retry(&c.id).unwrap(), Some(2));
        assert_eq!(store.increment_retry("nope").unwrap(), None);
        assert_eq!(store.get(&c.id).unwrap().retry_count, 2);
        assert_eq!(store.min_retry_count(), Some(2));
    }

    #[test]
    fn test_settle_writes_batch_once() {
        let (storage, store) = memory_store();
        let applied = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();
        let flaky = store.enqueue(change("p2", 2, Priority::Normal)).unwrap();
        let mut worn = change("p3", 3, Priority::Normal);
        worn.retry_count = 2;
        let worn = store.enqueue(worn).unwrap();
        let writes = storage.write_count();

        let retry = Disposition::Retry { max_retries: 3 };
        let settled = store
            .settle(&[
                (applied.id.clone(), Disposition::Remove),
                (flaky.id.clone(), retry),
                (worn.id.clone(), retry),
                ("chg_gone".to_string(), Disposition::Remove),
            ])
            .unwrap();

        assert_eq!(
            settled,
            vec![
                Settled::Removed,
                Settled::Deferred { attempts: 1 },
                Settled::Exhausted { attempts: 3 },
                Settled::Missing,
            ]
        );
        assert_eq!(storage.write_count(), writes + 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&flaky.id).unwrap().retry_count, 1);

        let reopened = ChangeStore::open(storage).unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());
    }

    #[test]
    fn test_settle_failure_applies_nothing() {
        let (storage, store) = memory_store();
        let a = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();
        let b = store.enqueue(change("p2", 2, Priority::Normal)).unwrap();
        let before = store.snapshot();

        storage.fail_writes(true);
        assert!(store
            .settle(&[
                (a.id.clone(), Disposition::Remove),
                (b.id.clone(), Disposition::Retry { max_retries: 3 }),
            ])
            .is_err());
        assert_eq!(store.snapshot(), before);

        assert_eq!(
            store.settle(&[("chg_gone".to_string(), Disposition::Remove)]).unwrap(),
            vec![Settled::Missing]
        );
    }

    #[test]
    fn test_depth_observer_sees_mutations() {
        let (_, store) = memory_store();
        let last = Arc::new(AtomicUsize::new(usize::MAX));
        let l = Arc::clone(&last);
        store.set_depth_observer(move |depth| l.store(depth, Ordering::SeqCst));

        let c = store.enqueue(change("p1", 1, Priority::Normal)).unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 1);
        store.enqueue(change("p2", 1, Priority::Normal)).unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 2);
        store.remove(&c.id).unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 1);
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(last.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reopen_preserves_order_and_sequence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync.db");

        let expected = {
            let store = ChangeStore::open(Arc::new(SqliteStore::open(&path).unwrap())).unwrap();
            store.enqueue(change("p1", 3, Priority::Normal)).unwrap();
            store.enqueue(change("p1", 3, Priority::Normal)).unwrap();
            store.enqueue(change("p2", 1, Priority::Low)).unwrap();
            store.enqueue(
                NewChange::delete(EntityKind::ShoppingList, "l1").into_pending(ts(0), "u", "d"),
            )
            .unwrap();
            store.snapshot()
        };

        let store = ChangeStore::open(Arc::new(SqliteStore::open(&path).unwrap())).unwrap();
        assert_eq!(store.snapshot(), expected);

        let next = store.enqueue(change("p3", 0, Priority::Normal)).unwrap();
        assert_eq!(next.sequence, 4);
    }

    #[test]
    fn test_corrupt_queue_fails_open() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(QUEUE_KEY, b"{not json").unwrap();
        assert!(ChangeStore::open(storage).is_err());
    }

    #[test]
    fn test_legacy_queue_is_rewritten_on_open() {
        let storage = Arc::new(MemoryStorage::new());
        let legacy = serde_json::json!([{
            "id": "c1", "type": "delete", "entity": "recipe", "entityId": "r1",
            "timestamp": 1_700_000_000_000_i64, "userId": "u", "retryCount": 0, "priority": "normal"
        }]);
        storage.set(QUEUE_KEY, &serde_json::to_vec(&legacy).unwrap()).unwrap();

        let store = ChangeStore::open(storage.clone()).unwrap();
        assert_eq!(store.len(), 1);

        let raw: serde_json::Value =
            serde_json::from_slice(&storage.get(QUEUE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(raw["schemaVersion"], envelope::SCHEMA_VERSION);
    }
}
