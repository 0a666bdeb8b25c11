//! Scheduler: the worker pool that drains the queue and the cron timers
//! that feed it.

pub mod cron;
pub mod processor;
pub mod worker;

pub use cron::{run_cost_report, run_lease_sweep, run_scrape_tick, start_scheduler};
pub use processor::{Outcome, Processor, ProcessorSet};
pub use worker::{spawn_pool, TypeGates};
