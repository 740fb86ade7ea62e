use crate::pool::{Shared, ThreadPool, worker};
use anyhow::{Context, Result, ensure};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

pub(crate) type ThreadNameFn = Arc<dyn Fn() -> String + Send + Sync + 'static>;

fn default_thread_name_fn() -> ThreadNameFn {
    let counter = Arc::new(AtomicUsize::new(1));

    Arc::new(move || {
        let lane = counter.fetch_add(1, Ordering::Relaxed);
        format!("forkspan-worker-{lane}")
    })
}

/// Configures and spawns a [`ThreadPool`].
pub struct Builder {
    /// Total lane count, including the caller lane 0; `worker_threads(n)`
    /// spawns `n - 1` threads. Defaults to [`crate::num_workers`].
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the pool.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the pool.
    thread_stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
        }
    }

    pub fn worker_threads(&mut self, val: usize) -> &mut Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name for threads spawned by the pool.
    ///
    /// The default name is "forkspan-worker-{N}".
    pub fn thread_name(&mut self, val: impl Into<String>) -> &mut Self {
        let val = val.into();
        self.thread_name = Arc::new(move || val.clone());
        self
    }

    /// Sets the stack size (in bytes) for threads spawned by the pool.
    pub fn thread_stack_size(&mut self, val: usize) -> &mut Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Spawns the configured pool. Workers start parked-or-stealing right
    /// away; nothing else has to happen before work can be submitted.
    pub fn try_build(&self) -> Result<ThreadPool> {
        let threads = self.worker_threads.unwrap_or_else(crate::num_workers);
        ensure!(threads > 0, "thread count must be > 0");

        // Lane i (1-based) owns locals[i - 1]; stealers keep the same order.
        let locals: Vec<_> = (1..threads)
            .map(|_| crossbeam_deque::Worker::new_lifo())
            .collect();
        let stealers: Vec<_> = locals.iter().map(|local| local.stealer()).collect();

        let shared = Arc::new(Shared::new(threads, stealers.clone()));

        let mut handles = Vec::with_capacity(threads - 1);
        for (i, local) in locals.into_iter().enumerate() {
            let lane = i + 1;

            // Each worker probes the others in its own shuffled order to
            // reduce contention on the same victim.
            let mut other_stealers: Vec<_> = stealers
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, stealer)| stealer.clone())
                .collect();
            fastrand::shuffle(&mut other_stealers);

            let shared_for_worker = Arc::clone(&shared);
            let mut builder = thread::Builder::new().name((self.thread_name)());
            if let Some(stack_size) = self.thread_stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder
                .spawn(move || worker::worker_loop(shared_for_worker, lane, local, other_stealers));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Unwind the partially spawned pool before reporting.
                    shared.shutdown.store(true, Ordering::Release);
                    shared.parker.unpark_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e).context("failed to spawn worker thread");
                }
            }
        }

        tracing::debug!(threads, "thread pool started");
        Ok(ThreadPool {
            shared,
            handles: Mutex::new(handles),
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
