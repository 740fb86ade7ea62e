use crate::partition::node::TaskNode;
use crate::partition::stack::{self, StackFrame};
use crate::partition::{Balance, GrainMode};
use crate::pool::{Handle, Job, RapidTask};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Warm-up budget: how long a DELAYED task keeps executing sequentially
/// before it agrees to shed work. Calibrated per architecture against the
/// 99th percentile of scheduling jitter, so almost every loop that finishes
/// inside the budget never pays for a single task allocation.
#[cfg(target_arch = "x86_64")]
pub(super) const INIT_TIME: Duration = Duration::from_millis(25);
#[cfg(target_arch = "aarch64")]
pub(super) const INIT_TIME: Duration = Duration::from_micros(75);
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub(super) const INIT_TIME: Duration = Duration::from_millis(1);

/// Half-open index range `[from, to)`, for both data indices and lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Span {
    pub(super) from: u64,
    pub(super) to: u64,
}

impl Span {
    pub(super) fn new(from: u64, to: u64) -> Self {
        debug_assert!(from <= to);
        Self { from, to }
    }

    pub(super) fn size(&self) -> u64 {
        self.to - self.from
    }
}

/// Subdivision policy of a live range task.
#[derive(Debug, Clone, Copy)]
pub(super) struct SplitData {
    /// Lanes considered responsible for this task; never empty.
    pub(super) threads: Span,
    pub(super) grain: u64,
    pub(super) depth: usize,
}

impl SplitData {
    /// Fan-out of the geometric initial distribution.
    pub(super) const K_SPLIT: u64 = 2;
}

/// Shared borrow of the user's loop body, passed by raw pointer into every
/// task derived from one `parallel_for` call.
///
/// # Safety
///
/// Sound only under the root-pin protocol: the `parallel_for` frame that owns
/// the body does not return until every holder of this pointer has released
/// its task node, so the pointee outlives all uses.
pub(super) struct BodyRef<F>(*const F);

impl<F> Clone for BodyRef<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for BodyRef<F> {}

// Only a shared reference crosses threads, so `Sync` on the body is all the
// wrapper needs.
unsafe impl<F: Sync> Send for BodyRef<F> {}
unsafe impl<F: Sync> Sync for BodyRef<F> {}

impl<F: Fn(u64)> BodyRef<F> {
    pub(super) fn new(body: &F) -> Self {
        Self(body)
    }

    /// # Safety
    ///
    /// The enclosing `parallel_for` must still be pinned (see type docs).
    pub(super) unsafe fn call(&self, index: u64) {
        unsafe { (*self.0)(index) }
    }
}

/// Extends a job's borrow to `'static`.
///
/// # Safety
///
/// The caller must guarantee the job finishes (or is dropped) before the
/// borrows it captures expire. The completion spins in this crate do so by
/// holding the root task node pinned until every task has released.
pub(super) unsafe fn erase_job<'a>(job: Box<dyn FnOnce() + Send + 'a>) -> Job {
    unsafe { std::mem::transmute(job) }
}

/// Same contract as [`erase_job`], for rapid-start tasks.
pub(super) unsafe fn erase_rapid<'a>(task: Box<dyn RapidTask + 'a>) -> Box<dyn RapidTask> {
    unsafe { std::mem::transmute(task) }
}

/// Lets `par_do` move a borrowed `FnOnce` into a pool job.
///
/// # Safety
///
/// Same protocol as [`BodyRef`]: the slot lives on the caller's frame and the
/// caller spins until the job has run and released.
pub(super) struct TakeRef<F>(*mut Option<F>);

unsafe impl<F: Send> Send for TakeRef<F> {}

impl<F> TakeRef<F> {
    pub(super) fn new(slot: &mut Option<F>) -> Self {
        Self(slot)
    }

    /// # Safety
    ///
    /// The slot must still be alive and not aliased; called at most once.
    pub(super) unsafe fn take(&self) -> Option<F> {
        unsafe { (*self.0).take() }
    }
}

/// A closure over a sub-range `[cur, end)` of one parallel-for call.
///
/// Runs in deterministic phases: the very first task of a call distributes
/// slabs geometrically across the lanes, a DELAYED task then works head
/// iterations for the warm-up budget, after which the remainder is halved
/// into stealable tasks down to the grain size and the rest drained in
/// place. Dropping the task releases its node on the completion tree.
pub(super) struct RangeTask<F> {
    pool: Handle,
    node: Arc<TaskNode>,
    cur: u64,
    end: u64,
    body: BodyRef<F>,
    split: SplitData,
    balance: Balance,
    grain_mode: GrainMode,
    is_initial: bool,
}

impl<F: Fn(u64) + Sync> RangeTask<F> {
    /// The first task of a parallel-for call, responsible for the whole data
    /// range and the whole lane range.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn initial(
        pool: Handle,
        node: Arc<TaskNode>,
        from: u64,
        to: u64,
        body: BodyRef<F>,
        grain: u64,
        balance: Balance,
        grain_mode: GrainMode,
        threads: Span,
    ) -> Self {
        Self {
            pool,
            node,
            cur: from,
            end: to,
            body,
            split: SplitData {
                threads,
                grain,
                depth: 0,
            },
            balance,
            grain_mode,
            is_initial: true,
        }
    }

    pub(super) fn run(mut self) {
        let _frame = StackFrame::push();

        if self.is_initial {
            self.distribute_work();
        }

        if self.balance == Balance::Delayed {
            // Work head iterations for the warm-up budget before considering
            // any subdivision; a loop that drains in time never splits.
            let start = Instant::now();
            while self.cur < self.end {
                self.execute_one();
                if start.elapsed() > INIT_TIME {
                    break;
                }
                if self.grain_mode == GrainMode::Auto {
                    self.split.grain += 1;
                }
            }
        }

        if self.balance != Balance::Off {
            while self.cur < self.end && self.is_divisible() {
                // Shed the upper half as a stealable task, keep the lower.
                let mid = self.cur + (self.end - self.cur) / 2;
                let child = RangeTask {
                    pool: self.pool.clone(),
                    node: TaskNode::child_of(&self.node),
                    cur: mid,
                    end: self.end,
                    body: self.body,
                    split: SplitData {
                        threads: Span::new(0, 1),
                        grain: self.split.grain,
                        depth: self.split.depth + 1,
                    },
                    balance: Balance::Simple,
                    grain_mode: GrainMode::Default,
                    is_initial: false,
                };
                self.node.spawn_child(1);
                tracing::trace!(from = mid, to = self.end, "range split");
                self.pool.schedule(child.into_job());
                self.end = mid;
            }
        }

        while self.cur < self.end {
            self.execute_one();
        }

        // Release this task's handle on the completion tree; may free
        // ancestors up to (but never including) the pinned root.
        drop(self.node);
    }

    pub(super) fn into_job(self) -> Job {
        let job: Box<dyn FnOnce() + Send + '_> = Box::new(move || {
            self.node.on_stolen();
            self.run();
        });
        // Safety: every submitted task holds a node handle, and the
        // parallel-for frame spins until the root count returns to 1.
        unsafe { erase_job(job) }
    }

    #[inline(always)]
    fn execute_one(&mut self) {
        // Safety: see `BodyRef`.
        unsafe { self.body.call(self.cur) };
        self.cur += 1;
    }

    fn is_divisible(&self) -> bool {
        self.cur
            .checked_add(self.split.grain)
            .is_some_and(|limit| limit < self.end)
            && !stack::is_saturated()
    }

    /// Geometric distribution of the initial range: keep `1/threads` of the
    /// data for this lane and hand the rest out as `K_SPLIT` pinned chunks,
    /// each carrying its share of the remaining lanes. Each chunk repeats
    /// the procedure on arrival, so slabs reach every lane after `O(log n)`
    /// submissions while this lane starts executing immediately.
    fn distribute_work(&mut self) {
        if self.split.threads.size() == 1 || !self.is_divisible() {
            return;
        }

        let self_share = (self.end - self.cur).div_ceil(self.split.threads.size());
        let mut other_data = Span::new(self.cur + self_share, self.end);
        if other_data
            .from
            .checked_add(self.split.grain)
            .is_none_or(|limit| limit >= other_data.to)
        {
            return;
        }
        self.end = other_data.from;

        let mut other_threads = Span::new(self.split.threads.from + 1, self.split.threads.to);
        let parts = SplitData::K_SPLIT
            .min(other_threads.size())
            .min(other_data.size());

        let thread_step = other_threads.size() / parts;
        let threads_mod = other_threads.size() % parts;
        let data_step = other_data.size() / parts;
        let data_mod = other_data.size() % parts;

        for i in 0..parts {
            let thread_split = other_threads
                .to
                .min(other_threads.from + thread_step + u64::from(parts - 1 - i < threads_mod));
            // When the lanes divide evenly the leftover data goes to the
            // first chunks, otherwise to the chunks with the extra lane.
            let data_extra = if threads_mod == 0 { i } else { parts - 1 - i };
            let data_split = other_data
                .to
                .min(other_data.from + data_step + u64::from(data_extra < data_mod));
            debug_assert!(other_data.from < data_split);
            debug_assert!(other_threads.from < thread_split);

            let child = RangeTask {
                pool: self.pool.clone(),
                node: TaskNode::child_of(&self.node),
                cur: other_data.from,
                end: data_split,
                body: self.body,
                split: SplitData {
                    threads: Span::new(other_threads.from, thread_split),
                    grain: self.split.grain,
                    depth: 0,
                },
                balance: self.balance,
                grain_mode: self.grain_mode,
                is_initial: true,
            };
            self.node.spawn_child(1);
            self.pool
                .run_on_thread(child.into_job(), other_threads.from as usize);

            other_threads.from = thread_split;
            other_data.from = data_split;
        }
        // Balanced integer division is exact: every chunk boundary lands.
        debug_assert!(other_data.from == other_data.to);
        debug_assert!(other_threads.from == other_threads.to);
    }
}

/// Broadcast form of one parallel-for call: `invoke(part, total_parts)` runs
/// the body over the `part`-th slice of the balanced partition of
/// `[from, to)`. Dropped (and its node with it) once every lane is done.
pub(super) struct RapidRangeTask<F> {
    from: u64,
    to: u64,
    body: BodyRef<F>,
    #[allow(dead_code)] // held for release-on-drop
    node: Arc<TaskNode>,
}

impl<F: Fn(u64) + Sync> RapidRangeTask<F> {
    pub(super) fn new(from: u64, to: u64, body: BodyRef<F>, node: Arc<TaskNode>) -> Self {
        Self {
            from,
            to,
            body,
            node,
        }
    }
}

impl<F: Fn(u64) + Sync> RapidTask for RapidRangeTask<F> {
    fn invoke(&self, part: usize, total_parts: usize) {
        let range = self.to - self.from;
        let step = range / total_parts as u64;
        let remainder = range % total_parts as u64;

        let part = part as u64;
        let from = self.from + part * step + remainder.min(part);
        let to = self.from + (part + 1) * step + remainder.min(part + 1);
        if from == to {
            return;
        }

        // A part counts as parallel work: a nested call from inside the body
        // must observe a non-empty task stack.
        let _frame = StackFrame::push();
        for index in from..to {
            // Safety: see `BodyRef`.
            unsafe { self.body.call(index) };
        }
    }
}
