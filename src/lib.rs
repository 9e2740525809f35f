//! taskwheel: a multi-tenant cron task scheduler.
//!
//! Cron expressions resolve to next-fire instants (`cron`), jobs are
//! pluggable units of work (`job`), tasks bind a job to a schedule and an
//! owner (`task`), an executor chain runs jobs under a panic barrier with
//! composable middleware (`executor`), a bounded worker pool gates
//! concurrency (`pool`), and two scheduler variants (`scheduler::local`,
//! `scheduler::distributed`) drive fires from either in-process timers or a
//! shared Redis-backed sorted set.

pub mod config;
pub mod cron;
pub mod error;
pub mod executor;
pub mod job;
pub mod pool;
pub mod repo;
pub mod scheduler;
pub mod task;
#[cfg(feature = "metrics")]
pub mod telemetry;

pub use error::{Error, Result};
