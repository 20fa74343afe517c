//! Job scheduler.
//!
//! The scheduler owns the global concurrency budget. Jobs are admitted into a
//! bounded FIFO queue and granted one of `max_concurrent_jobs` slots as slots
//! free up. Each running job drives its own pipeline on its own task; the
//! scheduler only sees it again when the task releases its slot.
//!
//! Finished jobs stay queryable until the retention window ends, after which
//! a background sweeper removes the record and the delivered output.

mod config;
mod runner;
mod types;

pub use config::SchedulerConfig;
pub use runner::JobScheduler;
pub use types::{SchedulerError, SchedulerStats};
