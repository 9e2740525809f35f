//! Cron expression parsing and next-fire computation.

mod spec;

pub use spec::{CronSpec, CronSpecCache, Schedule};
