//! Timespan-adaptive parallel-for scheduling over a fixed work-stealing pool.
//!
//! A [`parallel_for`] call carves `[from, to)` geometrically across the pool's
//! workers, lets every worker run its slab sequentially for a calibrated
//! warm-up budget, and only then sheds halves of the remainder as stealable
//! tasks until the grain size is reached. Completion is tracked through a
//! reference-counted task-node tree instead of a barrier, and calls arriving
//! on an idle pool take a broadcast fast path that skips the task queues
//! entirely.

mod config;
mod partition;
pub mod pool;

pub use config::{num_workers, worker_id};
pub use partition::{
    Balance, GrainMode, par_do, par_do_in, parallel_for, parallel_for_in, parallel_for_simple,
    parallel_for_static, parallel_for_timespan, parallel_for_timespan_auto,
};
