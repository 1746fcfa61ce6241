//! Per-task mutual exclusion (spec §4.7/§5): every mutation the engine makes
//! to a task record goes through the lock for that task's id, so a dispatch
//! finishing and a revise being processed concurrently can't lose a write.
//! Locks are created lazily and never removed — tasks are long-lived and the
//! registry stays bounded by the number of tasks ever seen, which is
//! acceptable for the in-memory and relational backends alike.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Clone, Default)]
pub struct TaskLocks {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(task_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(task_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire the write lock for `task_id`. The caller holds the guard for
    /// the duration of its read-modify-write save.
    pub async fn acquire(&self, task_id: &str) -> TaskLockGuard {
        let lock = self.lock_for(task_id).await;
        let guard = lock.lock_owned().await;
        TaskLockGuard { _guard: guard }
    }
}

/// An acquired per-task lock, held for the duration of a read-modify-write
/// save. `OwnedMutexGuard` carries its own `Arc<Mutex<()>>` so this type has
/// no lifetime to thread through call sites.
pub struct TaskLockGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_writers_on_same_task_id() {
        let locks = TaskLocks::new();
        let counter = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let locks = locks.clone();
            let counter = counter.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("task-1").await;
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
