use crate::pool::WorkerPool;
use std::time::Duration;
use tessera_containers::prelude::Reclaim;

/// Construction parameters of a [`crate::ResourceManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Core worker count
    pub workers: usize,
    /// How long a worker waits for work before retiring
    pub idle_timeout: Duration,
    /// Worker threads are named `<thread_name>-<n>`
    pub thread_name: String,
    /// Reclamation policy of the value cache. With [`Reclaim::Phantom`] an entry is only evicted
    /// after it was pinned through [`crate::ResourceManager::pin`] and every pin was released.
    pub cache: Reclaim,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: WorkerPool::default_workers(),
            idle_timeout: Duration::from_secs(5),
            thread_name: "tessera-assets".to_string(),
            cache: Reclaim::default(),
        }
    }
}

impl ManagerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn with_cache(mut self, cache: Reclaim) -> Self {
        self.cache = cache;
        self
    }
}
