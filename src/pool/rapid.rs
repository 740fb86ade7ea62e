use crate::pool::RapidTask;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Single-slot rapid-start broadcast.
///
/// Arming publishes the task once; every lane that services the pool then
/// claims parts with a shared counter until all `total_parts` are taken. The
/// lane that finishes the last part retires the slot. The task is dropped
/// when the last lane releases its `Arc`, which is what signals completion
/// to whoever is waiting on the task's side effects.
pub(super) struct RapidSlot {
    active: AtomicBool,
    task: Mutex<Option<Arc<dyn RapidTask>>>,
    claimed: AtomicUsize,
    finished: AtomicUsize,
}

impl RapidSlot {
    pub(super) fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            task: Mutex::new(None),
            claimed: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub(super) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claims the slot for `task`, or hands it back when a broadcast is
    /// already in flight. The caller wakes the workers after arming.
    pub(super) fn try_arm(&self, task: Box<dyn RapidTask>) -> Option<Box<dyn RapidTask>> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Some(task);
        }

        self.claimed.store(0, Ordering::Relaxed);
        self.finished.store(0, Ordering::Relaxed);
        // The mutex pairs this publish with the clone in `run_parts`.
        *self.task.lock() = Some(Arc::from(task));
        None
    }

    /// Claims and runs broadcast parts until none remain. Returns whether at
    /// least one part was executed on this thread.
    pub(super) fn run_parts(&self, total_parts: usize) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(task) = self.task.lock().clone() else {
            return false;
        };

        let mut ran = false;
        loop {
            let part = self.claimed.fetch_add(1, Ordering::Relaxed);
            if part >= total_parts {
                break;
            }
            task.invoke(part, total_parts);
            ran = true;

            if self.finished.fetch_add(1, Ordering::AcqRel) + 1 == total_parts {
                // Last part done: retire the broadcast. Late lanes may still
                // hold clones of the task; the slot itself is free again.
                *self.task.lock() = None;
                self.active.store(false, Ordering::Release);
            }
        }
        ran
    }
}
