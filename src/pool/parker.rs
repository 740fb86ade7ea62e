use parking_lot::{Condvar, Mutex};

/// Blocks idle workers on a condvar and counts how many are parked.
///
/// `unpark_*` notify under the lock, so a worker that checked its predicate
/// under the same lock either saw the new work or is already waiting and
/// receives the notification; wakeups cannot be lost.
#[derive(Debug)]
pub(super) struct Parker {
    parked: Mutex<usize>,
    cvar: Condvar,
}

impl Parker {
    pub(super) fn new() -> Self {
        Self {
            parked: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    /// Parks the current thread if `should_park` still holds under the lock.
    /// Spurious wakeups are fine; the caller re-runs its work loop.
    pub(super) fn park_if(&self, should_park: impl FnOnce() -> bool) {
        let mut parked = self.parked.lock();
        if !should_park() {
            return;
        }
        *parked += 1;
        self.cvar.wait(&mut parked);
        *parked -= 1;
    }

    pub(super) fn unpark_one(&self) {
        let _guard = self.parked.lock();
        self.cvar.notify_one();
    }

    pub(super) fn unpark_all(&self) {
        let _guard = self.parked.lock();
        self.cvar.notify_all();
    }

    /// Whether every spawned worker is currently parked.
    pub(super) fn all_parked(&self, spawned: usize) -> bool {
        *self.parked.lock() == spawned
    }

    #[cfg(test)]
    pub(super) fn parked(&self) -> usize {
        *self.parked.lock()
    }
}
