use crossbeam_channel::RecvTimeoutError;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
struct PoolShared {
    job_recv: crossbeam_channel::Receiver<Job>,
    core: usize,
    idle_timeout: Duration,
    thread_name: String,
    /// Workers currently alive
    live: AtomicUsize,
    /// Workers currently running a job
    active: AtomicUsize,
    /// Used to number worker threads
    spawned: AtomicUsize,
}

/// Fixed core, unbounded queue executor
///
/// Workers are spawned on demand up to the core size and retire after sitting idle for the
/// idle timeout. Dropping the pool lets running jobs finish without joining them.
#[derive(Debug)]
pub struct WorkerPool {
    job_send: crossbeam_channel::Sender<Job>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(workers: usize, idle_timeout: Duration, thread_name: impl Into<String>) -> Self {
        let (job_send, job_recv) = crossbeam_channel::unbounded();
        Self {
            job_send,
            shared: Arc::new(PoolShared {
                job_recv,
                core: workers.max(1),
                idle_timeout,
                thread_name: thread_name.into(),
                live: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    /// Default core size, one less than the available parallelism but at least one
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }

    /// Queue `job`, spawning a worker if the pool is below its core size
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // the pool owns a receiver, so sending cannot fail
        let _ = self.job_send.send(Box::new(job));
        self.grow();
    }

    /// Drop every queued job that has not started yet
    pub fn purge(&self) -> usize {
        let mut purged = 0;
        while let Ok(job) = self.shared.job_recv.try_recv() {
            drop(job);
            purged += 1;
        }
        purged
    }

    pub fn core_size(&self) -> usize {
        self.shared.core
    }

    /// Live worker threads
    pub fn pool_size(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Workers busy running a job
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.job_recv.len()
    }

    fn grow(&self) {
        let shared = &self.shared;
        let mut live = shared.live.load(Ordering::SeqCst);
        while live < shared.core {
            match shared
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    spawn_worker(shared.clone());
                    return;
                }
                Err(current) => live = current,
            }
        }
    }
}

fn spawn_worker(shared: Arc<PoolShared>) {
    let n = shared.spawned.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{}", shared.thread_name, n);
    let worker_shared = shared.clone();
    let spawned = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || work(worker_shared));
    match spawned {
        Ok(_) => tracing::debug!("Spawned worker thread {name}"),
        Err(e) => {
            shared.live.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("Unable to spawn worker thread {name}: {e}");
        }
    }
}

fn work(shared: Arc<PoolShared>) {
    loop {
        match shared.job_recv.recv_timeout(shared.idle_timeout) {
            Ok(job) => {
                shared.active.fetch_add(1, Ordering::SeqCst);
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Worker job panicked");
                }
                shared.active.fetch_sub(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) => {
                shared.live.fetch_sub(1, Ordering::SeqCst);
                // a job may have slipped in while the count still included us
                if shared.job_recv.is_empty() || !rejoin(&shared) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                shared.live.fetch_sub(1, Ordering::SeqCst);
                break;
            }
        }
    }
    tracing::debug!(
        "Retired worker thread {}",
        std::thread::current().name().unwrap_or_default()
    );
}

fn rejoin(shared: &PoolShared) -> bool {
    let mut live = shared.live.load(Ordering::SeqCst);
    while live < shared.core {
        match shared
            .live
            .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => return true,
            Err(current) => live = current,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Instant;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_runs_jobs() {
        let pool = WorkerPool::new(2, Duration::from_secs(5), "test-pool");
        let (send, recv) = crossbeam_channel::unbounded();
        for i in 0..16 {
            let send = send.clone();
            pool.submit(move || {
                let _ = send.send(i);
            });
        }
        let mut seen: Vec<i32> = (0..16)
            .map(|_| recv.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
        assert!(pool.pool_size() <= 2);
    }

    #[test]
    fn test_never_exceeds_core() {
        let pool = WorkerPool::new(3, Duration::from_secs(5), "test-core");
        let gate = Arc::new(Barrier::new(4));
        for _ in 0..3 {
            let gate = gate.clone();
            pool.submit(move || {
                gate.wait();
            });
        }
        pool.submit(|| {});
        assert!(wait_for(|| pool.active() == 3));
        assert_eq!(pool.pool_size(), 3);
        assert_eq!(pool.queued(), 1);
        gate.wait();
        assert!(wait_for(|| pool.queued() == 0 && pool.active() == 0));
    }

    #[test]
    fn test_thread_names() {
        let pool = WorkerPool::new(1, Duration::from_secs(5), "named");
        let (send, recv) = crossbeam_channel::bounded(1);
        pool.submit(move || {
            let _ = send.send(std::thread::current().name().map(str::to_string));
        });
        let name = recv.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("named-0"));
    }

    #[test]
    fn test_idle_workers_retire_and_respawn() {
        let pool = WorkerPool::new(2, Duration::from_millis(20), "test-idle");
        let (send, recv) = crossbeam_channel::unbounded();
        let job_send = send.clone();
        pool.submit(move || {
            let _ = job_send.send(());
        });
        recv.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wait_for(|| pool.pool_size() == 0));

        pool.submit(move || {
            let _ = send.send(());
        });
        recv.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_panicking_job_keeps_worker() {
        let pool = WorkerPool::new(1, Duration::from_secs(5), "test-panic");
        pool.submit(|| panic!("boom"));
        let (send, recv) = crossbeam_channel::bounded(1);
        pool.submit(move || {
            let _ = send.send(7);
        });
        assert_eq!(recv.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert_eq!(pool.pool_size(), 1);
    }

    #[test]
    fn test_purge_drops_queued_jobs() {
        let pool = WorkerPool::new(1, Duration::from_secs(5), "test-purge");
        let gate = Arc::new(Barrier::new(2));
        let blocker = gate.clone();
        pool.submit(move || {
            blocker.wait();
        });
        assert!(wait_for(|| pool.active() == 1));
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let ran = ran.clone();
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pool.purge(), 4);
        gate.wait();
        assert!(wait_for(|| pool.active() == 0));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
