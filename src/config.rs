use crate::pool::{Builder, Handle, ThreadPool};
use std::sync::OnceLock;

/// Number of worker lanes used by the process-global pool.
///
/// Resolved from the environment exactly once: `BENCH_NUM_THREADS` takes
/// priority, then `OMP_NUM_THREADS` and `CILK_NWORKERS` for compatibility,
/// else the hardware concurrency.
pub fn num_workers() -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    *WORKERS.get_or_init(|| resolve_worker_count(|key| std::env::var(key).ok()))
}

/// Lane index of the current thread on the global pool. 0 on any thread that
/// is not one of the pool's workers, including the application thread.
pub fn worker_id() -> usize {
    global().current_worker_index()
}

/// Handle to the process-global pool, built lazily on first use.
pub(crate) fn global() -> Handle {
    static POOL: OnceLock<ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        Builder::new()
            .worker_threads(num_workers())
            .try_build()
            .expect("failed to build global thread pool")
    })
    .handle()
}

// A value that does not parse as a positive integer falls through to the next
// source; the scheduler has no error channel for configuration.
fn resolve_worker_count(lookup: impl Fn(&str) -> Option<String>) -> usize {
    for key in ["BENCH_NUM_THREADS", "OMP_NUM_THREADS", "CILK_NWORKERS"] {
        if let Some(value) = lookup(key)
            && let Ok(threads) = value.trim().parse::<usize>()
            && threads > 0
        {
            return threads;
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn bench_threads_takes_priority() {
        let vars = [
            ("BENCH_NUM_THREADS", "3"),
            ("OMP_NUM_THREADS", "5"),
            ("CILK_NWORKERS", "7"),
        ];
        assert_eq!(resolve_worker_count(lookup(&vars)), 3);
    }

    #[test]
    fn falls_back_in_order() {
        assert_eq!(
            resolve_worker_count(lookup(&[("OMP_NUM_THREADS", "5"), ("CILK_NWORKERS", "7")])),
            5
        );
        assert_eq!(resolve_worker_count(lookup(&[("CILK_NWORKERS", "7")])), 7);
    }

    #[test]
    fn unparsable_value_falls_through() {
        let vars = [("BENCH_NUM_THREADS", "lots"), ("OMP_NUM_THREADS", "2")];
        assert_eq!(resolve_worker_count(lookup(&vars)), 2);
    }

    #[test]
    fn zero_falls_through() {
        let vars = [("BENCH_NUM_THREADS", "0"), ("CILK_NWORKERS", "4")];
        assert_eq!(resolve_worker_count(lookup(&vars)), 4);
    }

    #[test]
    fn defaults_to_hardware_concurrency() {
        assert!(resolve_worker_count(|_| None) >= 1);
    }
}
