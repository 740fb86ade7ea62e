use crate::pool::{Job, Shared};
use crossbeam_deque::{Steal, Stealer, Worker as CbWorker};
use std::cell::RefCell;
use std::iter;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Bounds the steal loop when every probe keeps returning `Retry`.
const MAX_STEAL_RETRIES: usize = 4;

/// Thread-local identity of a spawned worker: its lane, its own local queue
/// and a shuffled view of the other workers' stealers.
pub(super) struct WorkerContext {
    lane: usize,
    local: CbWorker<Job>,
    stealers: Vec<Stealer<Job>>,
    shared: Arc<Shared>,
}

thread_local! {
    static CONTEXT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Runs `f` against the worker context if the current thread is a worker of
/// `shared`'s pool. Threads of other pools and application threads get `None`.
fn with_worker<R>(shared: &Shared, f: impl FnOnce(&WorkerContext) -> R) -> Option<R> {
    CONTEXT.with(|cell| {
        let borrow = cell.borrow();
        match borrow.as_ref() {
            Some(ctx) if ptr::eq(Arc::as_ptr(&ctx.shared), shared) => Some(f(ctx)),
            _ => None,
        }
    })
}

pub(super) fn current_lane(shared: &Shared) -> usize {
    with_worker(shared, |ctx| ctx.lane).unwrap_or(0)
}

/// Pushes onto the current worker's local queue, or returns the job when the
/// calling thread does not belong to this pool.
pub(super) fn try_push_local(shared: &Shared, job: Job) -> Result<(), Job> {
    let mut slot = Some(job);
    with_worker(shared, |ctx| {
        ctx.local.push(slot.take().expect("job pushed twice"));
    });
    match slot {
        None => Ok(()),
        Some(job) => Err(job),
    }
}

pub(super) fn worker_loop(
    shared: Arc<Shared>,
    lane: usize,
    local: CbWorker<Job>,
    stealers: Vec<Stealer<Job>>,
) {
    CONTEXT.with(|cell| {
        *cell.borrow_mut() = Some(WorkerContext {
            lane,
            local,
            stealers,
            shared: Arc::clone(&shared),
        });
    });
    tracing::trace!(lane, "worker running");

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if shared.try_execute_one() {
            continue;
        }
        shared
            .parker
            .park_if(|| !shared.has_work() && !shared.shutdown.load(Ordering::Acquire));
    }

    tracing::trace!(lane, "worker exiting");
    CONTEXT.with(|cell| cell.borrow_mut().take());
}

impl Shared {
    pub(super) fn find_job(&self) -> Option<Job> {
        with_worker(self, |ctx| self.find_job_as_worker(ctx))
            .unwrap_or_else(|| self.find_job_as_external())
    }

    fn find_job_as_worker(&self, ctx: &WorkerContext) -> Option<Job> {
        // 1. Pop the local LIFO first: freshly split work, cache still hot,
        //    and it leaves the older (larger) halves for the stealers.
        ctx.local.pop().or_else(|| {
            iter::repeat_with(|| {
                // 2. Own pinned inbox, then the global injector; batches land
                //    in the local queue so one probe pays for several jobs.
                self.inboxes[ctx.lane]
                    .steal_batch_and_pop(&ctx.local)
                    .or_else(|| self.injector.steal_batch_and_pop(&ctx.local))
                    // 3. Other workers' local queues, in this worker's
                    //    shuffled order. Collect stops at the first success.
                    .or_else(|| ctx.stealers.iter().map(|s| s.steal()).collect())
                    // 4. Foreign inboxes last; pinned work must not strand.
                    .or_else(|| self.steal_foreign_inboxes(ctx.lane))
            })
            .take(MAX_STEAL_RETRIES)
            .find(|steal| !steal.is_retry())
            .and_then(|steal| steal.success())
        })
    }

    // Application threads service the pool as lane 0: no local queue, so
    // everything is a plain steal.
    fn find_job_as_external(&self) -> Option<Job> {
        iter::repeat_with(|| {
            self.inboxes[0]
                .steal()
                .or_else(|| self.injector.steal())
                .or_else(|| self.stealers.iter().map(|s| s.steal()).collect())
                .or_else(|| self.steal_foreign_inboxes(0))
        })
        .take(MAX_STEAL_RETRIES)
        .find(|steal| !steal.is_retry())
        .and_then(|steal| steal.success())
    }

    fn steal_foreign_inboxes(&self, lane: usize) -> Steal<Job> {
        self.inboxes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != lane)
            .map(|(_, inbox)| inbox.steal())
            .collect()
    }
}
