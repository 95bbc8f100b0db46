use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{CancellationToken, Cancelled, PoolKind, Scheduler};

struct DebounceEntry {
    id: u64,
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

struct DebouncerInner<K> {
    scheduler: Scheduler,
    pool: PoolKind,
    delay: Duration,
    next_id: AtomicU64,
    entries: Mutex<HashMap<K, DebounceEntry>>,
}

/// Per-key debouncer: scheduling a key cancels and replaces whatever was
/// pending for that key, so only the latest request survives a burst.
///
/// The delay timer runs on the scheduler's IO runtime; the debounced job runs
/// on the configured worker pool, so timers are never starved by running
/// work.
#[derive(Clone)]
pub struct KeyedDebouncer<K> {
    inner: Arc<DebouncerInner<K>>,
}

pub struct DebouncedHandle {
    token: CancellationToken,
}

impl DebouncedHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<K> KeyedDebouncer<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(scheduler: Scheduler, pool: PoolKind, delay: Duration) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                scheduler,
                pool,
                delay,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn debounce<F>(&self, key: K, f: F) -> DebouncedHandle
    where
        F: FnOnce(CancellationToken) -> Result<(), Cancelled> + Send + 'static,
    {
        self.debounce_with_delay(key, self.inner.delay, f)
    }

    pub fn debounce_with_delay<F>(&self, key: K, delay: Duration, f: F) -> DebouncedHandle
    where
        F: FnOnce(CancellationToken) -> Result<(), Cancelled> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        // Replace-and-dispose-previous must be atomic per key.
        if let Some(previous) = self.inner.entries.lock().remove(&key) {
            previous.token.cancel();
            previous.handle.abort();
        }

        let inner = Arc::clone(&self.inner);
        let key_for_task = key.clone();
        let token_for_task = token.clone();
        let mut f = Some(f);

        let handle = inner.scheduler.io_handle().spawn(async move {
            tokio::select! {
                _ = token_for_task.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(f) = f.take() {
                        let task = inner.scheduler.spawn_blocking_on(inner.pool, token_for_task.clone(), f);
                        let _ = task.join().await;
                    }
                }
            }

            // Only the entry belonging to this firing may clean itself up; a
            // replacement with the same key owns the slot now.
            let mut entries = inner.entries.lock();
            if let Some(current) = entries.get(&key_for_task) {
                if current.id == id {
                    entries.remove(&key_for_task);
                }
            }
        });

        self.inner.entries.lock().insert(
            key,
            DebounceEntry {
                id,
                token: token.clone(),
                handle,
            },
        );

        DebouncedHandle { token }
    }

    /// Cancel the pending (or running) entry for `key`; returns whether one
    /// existed.
    pub fn cancel(&self, key: &K) -> bool {
        let Some(entry) = self.inner.entries.lock().remove(key) else {
            return false;
        };
        entry.token.cancel();
        entry.handle.abort();
        true
    }

    /// Cancel everything; used at shutdown.
    pub fn cancel_all(&self) {
        let entries: Vec<_> = {
            let mut map = self.inner.entries.lock();
            map.drain().collect()
        };
        for (_key, entry) in entries {
            entry.token.cancel();
            entry.handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn burst_collapses_to_one_execution() {
        let scheduler = Scheduler::default();
        let debouncer =
            KeyedDebouncer::new(scheduler.clone(), PoolKind::Scan, Duration::from_millis(200));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            debouncer.debounce("project-a", move |_token| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            std::thread::sleep(Duration::from_millis(10));
        }

        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_keys_do_not_interfere() {
        let scheduler = Scheduler::default();
        let debouncer =
            KeyedDebouncer::new(scheduler.clone(), PoolKind::Scan, Duration::from_millis(30));
        let runs = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b", "c"] {
            let runs = Arc::clone(&runs);
            debouncer.debounce(key, move |_token| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancel_prevents_execution() {
        let scheduler = Scheduler::default();
        let debouncer =
            KeyedDebouncer::new(scheduler.clone(), PoolKind::Scan, Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));

        {
            let runs = Arc::clone(&runs);
            debouncer.debounce("key", move |_token| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert!(debouncer.cancel(&"key"));
        assert!(!debouncer.cancel(&"key"));

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[test]
    fn cancel_all_clears_every_key() {
        let scheduler = Scheduler::default();
        let debouncer =
            KeyedDebouncer::new(scheduler.clone(), PoolKind::Scan, Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            let runs = Arc::clone(&runs);
            debouncer.debounce(key, move |_token| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        debouncer.cancel_all();

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
