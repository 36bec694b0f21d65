//! Priority-scheduled worker pool.
//!
//! Hand-rolled rather than built on a published priority-queue thread-pool
//! crate: one `VecDeque` per priority tier behind a `Mutex`, with a
//! `Notify` to wake idle workers. Every worker scans tiers in strict priority order
//! (`top → high → normal → low`) before idling, so higher-priority work
//! always drains first while same-tier jobs stay FIFO — the ordering
//! guarantee the session layer depends on for per-connection message
//! order. Handoff between pipeline stages is always a `push` back onto
//! this pool, never a direct call, so a long-running stage cannot starve
//! the reactor (see [`crate::pipeline`]).

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{sync::Notify, task::JoinHandle};

use crate::pipeline::Priority;

/// A unit of work submitted to the pool. Boxed so the pool can hold jobs
/// from any stage uniformly.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Number of worker tasks spawned per priority tier.
///
/// `top` is a single always-available worker; the others come from the
/// caller's desired parallelism, set through the public `start(...)`
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Workers dedicated to `top` priority, fixed at 1.
    pub top: usize,
    /// Workers primarily servicing `high` priority.
    pub high: usize,
    /// Workers primarily servicing `normal` priority.
    pub normal: usize,
    /// Workers primarily servicing `low` priority.
    pub low: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { top: 1, high: 2, normal: 4, low: 2 }
    }
}

struct Tiers {
    top: Mutex<VecDeque<Job>>,
    high: Mutex<VecDeque<Job>>,
    normal: Mutex<VecDeque<Job>>,
    low: Mutex<VecDeque<Job>>,
    notify: Notify,
    shutdown: AtomicBool,
}

impl Tiers {
    fn queue_for(&self, priority: Priority) -> &Mutex<VecDeque<Job>> {
        match priority {
            Priority::Top => &self.top,
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    fn try_pop(&self) -> Option<Job> {
        for tier in [&self.top, &self.high, &self.normal, &self.low] {
            if let Ok(mut queue) = tier.lock() {
                if let Some(job) = queue.pop_front() {
                    return Some(job);
                }
            }
        }
        None
    }
}

/// A running priority-scheduled worker pool.
pub struct WorkerPool {
    tiers: Arc<Tiers>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start the pool, spawning `config.top + config.high + config.normal +
    /// config.low` tokio tasks, all servicing the shared tiered queue.
    #[must_use]
    pub fn start(config: PoolConfig) -> Self {
        let tiers = Arc::new(Tiers {
            top: Mutex::new(VecDeque::new()),
            high: Mutex::new(VecDeque::new()),
            normal: Mutex::new(VecDeque::new()),
            low: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker_count = config.top + config.high + config.normal + config.low;
        let handles = (0..worker_count.max(1))
            .map(|_| {
                let tiers = Arc::clone(&tiers);
                tokio::spawn(Self::worker_loop(tiers))
            })
            .collect();

        Self { tiers, handles }
    }

    async fn worker_loop(tiers: Arc<Tiers>) {
        loop {
            if tiers.shutdown.load(Ordering::Acquire) {
                return;
            }
            if let Some(job) = tiers.try_pop() {
                job();
                continue;
            }
            // Re-check shutdown periodically in case a notify is missed
            // during the shutdown race.
            tokio::select! {
                _ = tiers.notify.notified() => {},
                () = tokio::time::sleep(Duration::from_millis(200)) => {},
            }
        }
    }

    /// Enqueue a job at the given priority. Never blocks: the queues are
    /// unbounded, and any per-session outbound cap is enforced by the
    /// caller before reaching here.
    pub fn push(&self, priority: Priority, job: Job) {
        if self.tiers.shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut queue) = self.tiers.queue_for(priority).lock() {
            queue.push_back(job);
        }
        self.tiers.notify.notify_waiters();
    }

    /// Shut the pool down: stop accepting new work semantically (callers
    /// should stop calling `push`), wake every idle worker, and wait for
    /// all worker tasks to exit. Outstanding queued jobs are dropped
    /// without running; their output is discarded silently.
    pub async fn stop(self) {
        self.tiers.shutdown.store(true, Ordering::Release);
        self.tiers.notify.notify_waiters();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn higher_priority_jobs_run_before_lower_priority_ones() {
        let pool = WorkerPool::start(PoolConfig { top: 1, high: 0, normal: 0, low: 0 });

        // Occupy the only worker with a blocking job so both of the real
        // jobs below are queued before either can be dequeued, removing
        // the race between "push" and "worker picks it up".
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.push(
            Priority::Low,
            Box::new(move || {
                ready_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            }),
        );
        ready_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx_low = tx.clone();
        pool.push(Priority::Low, Box::new(move || tx_low.send("low").unwrap()));
        let tx_top = tx.clone();
        pool.push(Priority::Top, Box::new(move || tx_top.send("top").unwrap()));
        release_tx.send(()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "top");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "low");
        pool.stop().await;
    }

    #[tokio::test]
    async fn same_priority_jobs_run_in_fifo_order() {
        let pool = WorkerPool::start(PoolConfig { top: 1, high: 0, normal: 0, low: 0 });
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            pool.push(Priority::Normal, Box::new(move || tx.send(i).unwrap()));
        }

        for expected in 0..5 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), expected);
        }
        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_workers_without_panicking() {
        let pool = WorkerPool::start(PoolConfig::default());
        pool.push(Priority::Normal, Box::new(|| {}));
        pool.stop().await;
    }
}
