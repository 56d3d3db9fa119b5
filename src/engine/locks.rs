//! Per-key mutual exclusion.
//!
//! Every transition on a question runs while holding the lock for its token,
//! from the first read until the store write and timer adjustment are done.
//! Distinct keys never contend. Entries are dropped once nobody holds or waits
//! on them.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Registry of async locks keyed by string.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

/// Held lock for one key; released on drop.
pub struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock for `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self.locks.lock().entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;

        KeyGuard {
            key: key.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        drop(self.guard.take());

        // Only the map itself still references the mutex: nobody holds or awaits it.
        if let Some(mutex) = locks.get(&self.key)
            && Arc::strong_count(mutex) == 1
        {
            locks.remove(&self.key);
        }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let locks = locks.clone();
            let inside = inside.clone();
            let peak = peak.clone();

            tokio::spawn(async move {
                let _guard = locks.lock("Q1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            })
        });

        for task in tasks.collect::<Vec<_>>() {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = KeyedLocks::new();

        let _first = locks.lock("Q1").await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock("Q2")).await;

        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = KeyedLocks::new();
        let first = locks.lock("Q1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("Q1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        waiter.await.unwrap();

        assert!(locks.is_empty());
    }
}
