//! The two scheduler variants: `local` keeps the timing structure in
//! process; `distributed` externalizes it to a shared sorted set so
//! multiple processes can cooperate.
//!
//! Both share the same external contract (`add_task`, `remove_task`,
//! `list_tasks`, `start`, `stop`, `initialize_tasks`) and state machine
//! (`New -> Initialized -> Running -> Stopped`, terminal at `Stopped`).

pub mod distributed;
pub mod local;
pub mod store;

pub use distributed::DistributedScheduler;
pub use local::LocalScheduler;
pub use store::{CoordinationStore, RedisCoordinationStore};

/// `New -> Initialized -> Running -> Stopped`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    New,
    Initialized,
    Running,
    Stopped,
}
