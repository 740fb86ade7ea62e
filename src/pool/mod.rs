use crossbeam_deque::{Injector, Stealer};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

mod builder;
pub use builder::Builder;

mod parker;
use parker::Parker;

mod rapid;
use rapid::RapidSlot;

mod worker;

#[cfg(test)]
mod tests;

/// A unit of work handed to the pool. Boxed so queues stay homogeneous; the
/// partitioner erases the borrow it carries behind its completion protocol.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A task eligible for the rapid-start broadcast: instead of being queued it
/// is published once and every lane claims a `part` of it concurrently.
pub(crate) trait RapidTask: Send + Sync {
    /// Runs the sub-range of the task that corresponds to `part` out of
    /// `total_parts`. Called at most once per part, possibly on any lane.
    fn invoke(&self, part: usize, total_parts: usize);
}

/// Fixed pool of worker lanes.
///
/// Lane 0 is the calling application thread: it is never spawned and only
/// executes work while it spin-services the pool from inside a top-level
/// scheduling call. Lanes `1..thread_count` are spawned worker threads that
/// steal from each other and park when there is nothing to do.
pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Cheap cloneable handle used to submit and service work.
    pub fn handle(&self) -> Handle {
        Handle(Arc::clone(&self.shared))
    }

    /// Total number of lanes, including the caller lane 0.
    pub fn thread_count(&self) -> usize {
        self.shared.threads
    }

    fn shutdown(&self) {
        // Ensure we shut down once; workers observe the flag after unparking.
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            self.shared.parker.unpark_all();
            let mut handles = self.handles.lock();
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
            tracing::debug!("thread pool stopped");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State shared between every lane of one pool.
pub struct Shared {
    /// Total lanes, including the never-spawned caller lane 0.
    threads: usize,

    /// Global queue where new jobs land when submitted from outside the pool.
    injector: Injector<Job>,

    /// Per-lane pinned inboxes for `run_on_thread`. The hint is advisory:
    /// other lanes steal from foreign inboxes as a last resort so pinned
    /// work cannot strand behind a busy worker.
    inboxes: Vec<Injector<Job>>,

    /// Stealer side of every spawned worker's local queue, `stealers[i]`
    /// belonging to lane `i + 1`.
    stealers: Vec<Stealer<Job>>,

    /// Single rapid-start broadcast slot.
    rapid: RapidSlot,

    parker: Parker,

    shutdown: AtomicBool,

    #[cfg(test)]
    stats: PoolStats,
}

impl Shared {
    fn new(threads: usize, stealers: Vec<Stealer<Job>>) -> Self {
        Self {
            threads,
            injector: Injector::new(),
            inboxes: (0..threads).map(|_| Injector::new()).collect(),
            stealers,
            rapid: RapidSlot::new(),
            parker: Parker::new(),
            shutdown: AtomicBool::new(false),

            #[cfg(test)]
            stats: PoolStats::default(),
        }
    }

    /// Total number of lanes, including the caller lane 0.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Lane index of the current thread: its worker lane when the thread
    /// belongs to this pool, 0 for every other thread.
    pub fn current_worker_index(&self) -> usize {
        worker::current_lane(self)
    }

    /// Submits a job to any free lane. From a worker of this pool the job
    /// lands on that worker's local LIFO queue, otherwise on the injector.
    pub(crate) fn schedule(&self, job: Job) {
        #[cfg(test)]
        self.stats.bump(&self.stats.scheduled);

        if let Err(job) = worker::try_push_local(self, job) {
            self.injector.push(job);
        }
        self.parker.unpark_one();
    }

    /// Submits a job preferring lane `hint`.
    pub(crate) fn run_on_thread(&self, job: Job, hint: usize) {
        #[cfg(test)]
        self.stats.bump(&self.stats.pinned);

        debug_assert!(hint < self.threads, "lane hint out of range");
        self.inboxes[hint.min(self.threads - 1)].push(job);
        self.parker.unpark_one();
    }

    /// Offers a task for the rapid-start broadcast. Accepted only when the
    /// pool is idle (nothing queued, every spawned worker parked) and no
    /// broadcast is already running; otherwise the task is handed back.
    pub(crate) fn try_run_rapid(&self, task: Box<dyn RapidTask>) -> Option<Box<dyn RapidTask>> {
        let spawned = self.threads - 1;
        if !self.injector.is_empty() || !self.parker.all_parked(spawned) {
            #[cfg(test)]
            self.stats.bump(&self.stats.rapid_rejected);
            return Some(task);
        }

        match self.rapid.try_arm(task) {
            Some(rejected) => {
                #[cfg(test)]
                self.stats.bump(&self.stats.rapid_rejected);
                Some(rejected)
            }
            None => {
                #[cfg(test)]
                self.stats.bump(&self.stats.rapid_accepted);

                tracing::trace!("rapid-start broadcast armed");
                self.parker.unpark_all();
                None
            }
        }
    }

    /// Runs one piece of pending work if any: a rapid part first, then a
    /// queued job. Returns immediately when there is nothing to do.
    pub fn try_execute_one(&self) -> bool {
        if self.rapid.run_parts(self.threads) {
            return true;
        }
        match self.find_job() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    fn has_work(&self) -> bool {
        self.rapid.is_active()
            || !self.injector.is_empty()
            || self.inboxes.iter().any(|inbox| !inbox.is_empty())
            || self.stealers.iter().any(|stealer| !stealer.is_empty())
    }
}

#[cfg(test)]
impl Shared {
    pub(crate) fn test_stats(&self) -> &PoolStats {
        &self.stats
    }

    pub(crate) fn parked_workers(&self) -> usize {
        self.parker.parked()
    }

    pub(crate) fn spawned_workers(&self) -> usize {
        self.threads - 1
    }

    pub(crate) fn rapid_active(&self) -> bool {
        self.rapid.is_active()
    }
}

/// Cloneable handle to a pool's shared state.
#[derive(Clone)]
pub struct Handle(Arc<Shared>);

#[doc(hidden)]
impl Deref for Handle {
    type Target = Shared;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Introspection counters for tests; no-op in release builds.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    scheduled: std::sync::atomic::AtomicUsize,
    pinned: std::sync::atomic::AtomicUsize,
    rapid_accepted: std::sync::atomic::AtomicUsize,
    rapid_rejected: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl PoolStats {
    fn bump(&self, counter: &std::sync::atomic::AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::Relaxed)
    }

    pub(crate) fn pinned(&self) -> usize {
        self.pinned.load(Ordering::Relaxed)
    }

    /// Jobs submitted through either queueing entry point.
    pub(crate) fn submissions(&self) -> usize {
        self.scheduled() + self.pinned()
    }

    pub(crate) fn rapid_accepted(&self) -> usize {
        self.rapid_accepted.load(Ordering::Relaxed)
    }

    pub(crate) fn rapid_attempts(&self) -> usize {
        self.rapid_accepted() + self.rapid_rejected.load(Ordering::Relaxed)
    }
}
