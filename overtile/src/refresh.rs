//! Background refresh task registry.
//!
//! Refresh tasks are deliberately detached from the request that spawned
//! them: the requester already has its (stale) response, and the refresh
//! benefits future requests. The registry exists so the process still
//! knows about them: duplicate refreshes for the same key are skipped
//! while one is in flight, and graceful shutdown can drain the set with a
//! bounded timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct Inner {
    tasks: DashMap<String, JoinHandle<()>>,
}

/// Process-wide registry of detached background tasks.
#[derive(Clone, Default)]
pub struct RefreshManager {
    inner: Arc<Inner>,
}

impl RefreshManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` unless another task with the same key is still
    /// running. Returns whether the task was spawned.
    pub fn spawn_deduped<F>(&self, key: String, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(existing) = self.inner.tasks.get(&key) {
            if !existing.is_finished() {
                debug!(%key, "refresh already in flight, skipping");
                return false;
            }
        }
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            task.await;
            inner.tasks.remove(&task_key);
        });
        self.inner.tasks.insert(key, handle);
        true
    }

    /// Number of tasks still running.
    pub fn active_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|entry| !entry.is_finished())
            .count()
    }

    /// Drops handles of finished tasks.
    pub fn cleanup_finished(&self) {
        self.inner.tasks.retain(|_, handle| !handle.is_finished());
    }

    /// Waits until every tracked task has finished.
    pub async fn wait_all(&self) {
        loop {
            self.cleanup_finished();
            if self.inner.tasks.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits for all tasks, giving up after `timeout`. Returns whether
    /// everything finished in time.
    pub async fn wait_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_all()).await.is_ok()
    }

    /// Aborts everything still running.
    pub fn abort_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.abort();
        }
    }
}
