use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Node of the completion tree behind one top-level scheduling call.
///
/// Every live task holds an `Arc` to its node, and every node holds one to
/// its parent, so dropping the last handle of a leaf releases ancestors all
/// the way up. The caller pins the root with an extra handle and spins until
/// the root's strong count returns to 1, which is exactly the point where
/// every descendant task has finished and released.
///
/// `Arc` gives the orderings this needs: relaxed increments, release
/// decrements, and an acquire on the thread that frees the node. The pinned
/// root is observed with `strong_count`, so the observer issues its own
/// acquire fence (see the completion spins in the parent module).
pub(super) struct TaskNode {
    parent: Option<Arc<TaskNode>>,

    /// Children submitted to the pool and not yet dequeued. Advisory only:
    /// relaxed on both ends, feeds no correctness decision.
    children_awaiting_steal: AtomicUsize,
}

impl TaskNode {
    pub(super) fn root() -> Arc<TaskNode> {
        Arc::new(TaskNode {
            parent: None,
            children_awaiting_steal: AtomicUsize::new(0),
        })
    }

    pub(super) fn child_of(parent: &Arc<TaskNode>) -> Arc<TaskNode> {
        Arc::new(TaskNode {
            parent: Some(Arc::clone(parent)),
            children_awaiting_steal: AtomicUsize::new(0),
        })
    }

    pub(super) fn spawn_child(&self, count: usize) {
        self.children_awaiting_steal
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Marks this task as dequeued on its parent. No-op on the root, which
    /// is never queued.
    pub(super) fn on_stolen(&self) {
        if let Some(parent) = &self.parent {
            parent.children_awaiting_steal.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Kept alongside the counter for policies that want to react to all
    /// children having been picked up; nothing gates on it today.
    #[allow(dead_code)]
    pub(super) fn all_stolen(&self) -> bool {
        self.children_awaiting_steal.load(Ordering::Relaxed) == 0
    }
}
