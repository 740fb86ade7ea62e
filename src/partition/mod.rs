use crate::pool::Handle;
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};
use std::thread;

mod node;
use node::TaskNode;

mod stack;
use stack::StackFrame;

mod task;
use task::{BodyRef, RangeTask, RapidRangeTask, Span, TakeRef};


/// When a range task is willing to shed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balance {
    /// Never subdivide; the task executes its whole range sequentially.
    Off,
    /// Subdivide greedily from the start.
    Simple,
    /// Execute sequentially for the warm-up budget, then subdivide what is
    /// left. The default: imbalance is corrected only when it shows up.
    Delayed,
}

/// How the grain size evolves during a DELAYED warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrainMode {
    /// Grain size stays as passed in.
    Default,
    /// Grain size grows by one per warm-up iteration, so a task that proved
    /// its iterations cheap splits off proportionally larger pieces.
    Auto,
}

/// Runs `body(i)` for every `i` in `[from, to)` on the global pool, in
/// unspecified order across the workers.
///
/// The call returns only after every iteration has executed; the body is
/// borrowed by all derived tasks for exactly that long. Iterations must be
/// independent and must not panic. `grain` is the sub-range size below which
/// further subdivision is pointless; values below 1 are clamped.
pub fn parallel_for<F>(from: u64, to: u64, body: F, grain: i64, balance: Balance, grain_mode: GrainMode)
where
    F: Fn(u64) + Sync,
{
    parallel_for_in(&crate::config::global(), from, to, body, grain, balance, grain_mode);
}

/// [`parallel_for`] against an explicit pool handle.
pub fn parallel_for_in<F>(
    pool: &Handle,
    from: u64,
    to: u64,
    body: F,
    grain: i64,
    balance: Balance,
    grain_mode: GrainMode,
) where
    F: Fn(u64) + Sync,
{
    if from >= to {
        return;
    }
    let grain = grain.max(1) as u64;

    // Pinned root: one handle here plus one inside whichever task starts the
    // call keeps the count above 1 until every descendant has released.
    let root = TaskNode::root();
    let body = BodyRef::new(&body);

    // Calls arriving on an idle pool broadcast the whole range in one go
    // instead of queueing a task that would spawn more tasks. Indivisible
    // ranges skip the attempt: they run sequentially right here.
    let mut rapid_accepted = false;
    if stack::is_empty() && to - from > grain {
        let rapid: Box<dyn crate::pool::RapidTask + '_> =
            Box::new(RapidRangeTask::new(from, to, body, Arc::clone(&root)));
        // Safety: the completion spin below outlives every borrow the task
        // carries, whether the pool accepts it or hands it back.
        let rapid = unsafe { task::erase_rapid(rapid) };
        rapid_accepted = pool.try_run_rapid(rapid).is_none();
    }

    if !rapid_accepted {
        let threads = Span::new(0, pool.thread_count() as u64);
        RangeTask::initial(
            pool.clone(),
            Arc::clone(&root),
            from,
            to,
            body,
            grain,
            balance,
            grain_mode,
            threads,
        )
        .run();
    }

    while Arc::strong_count(&root) != 1 {
        if !pool.try_execute_one() {
            thread::yield_now();
        }
    }
    // Pairs with the release decrement of the last task's node handle.
    fence(Ordering::Acquire);
}

/// Runs `left` and `right` potentially in parallel: `left` is offered to the
/// pool, `right` runs on the calling thread, and the call returns once both
/// have finished. Either side may itself call into the scheduler.
pub fn par_do<L, R>(left: L, right: R)
where
    L: FnOnce() + Send,
    R: FnOnce(),
{
    par_do_in(&crate::config::global(), left, right);
}

/// [`par_do`] against an explicit pool handle.
pub fn par_do_in<L, R>(pool: &Handle, left: L, right: R)
where
    L: FnOnce() + Send,
    R: FnOnce(),
{
    let root = TaskNode::root();

    let mut left_slot = Some(left);
    let left_ref = TakeRef::new(&mut left_slot);
    let node = Arc::clone(&root);
    let job: Box<dyn FnOnce() + Send + '_> = Box::new(move || {
        // Own frame, so a nested call inside `left` sees parallel work.
        let _frame = StackFrame::push();
        // Safety: the slot lives on this frame until the spin below ends,
        // and the job runs at most once.
        let left = unsafe { left_ref.take() }.expect("left closure already taken");
        left();
        drop(node);
    });
    // Safety: the completion spin below outlives the borrows in the job.
    pool.schedule(unsafe { task::erase_job(job) });

    {
        let _frame = StackFrame::push();
        right();
    }

    while Arc::strong_count(&root) != 1 {
        if !pool.try_execute_one() {
            thread::yield_now();
        }
    }
    // Pairs with the release decrement of the left job's node handle.
    fence(Ordering::Acquire);
}

/// Greedy subdivision from the start; fixed grain.
pub fn parallel_for_simple<F>(from: u64, to: u64, body: F, grain: i64)
where
    F: Fn(u64) + Sync,
{
    parallel_for(from, to, body, grain, Balance::Simple, GrainMode::Default);
}

/// No subdivision beyond the initial distribution.
pub fn parallel_for_static<F>(from: u64, to: u64, body: F, grain: i64)
where
    F: Fn(u64) + Sync,
{
    parallel_for(from, to, body, grain, Balance::Off, GrainMode::Default);
}

/// Warm up sequentially, then subdivide the remainder; fixed grain.
pub fn parallel_for_timespan<F>(from: u64, to: u64, body: F, grain: i64)
where
    F: Fn(u64) + Sync,
{
    parallel_for(from, to, body, grain, Balance::Delayed, GrainMode::Default);
}

/// Warm up sequentially with the grain growing per iteration, then
/// subdivide the remainder.
pub fn parallel_for_timespan_auto<F>(from: u64, to: u64, body: F, grain: i64)
where
    F: Fn(u64) + Sync,
{
    parallel_for(from, to, body, grain, Balance::Delayed, GrainMode::Auto);
}
