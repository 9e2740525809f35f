//! The `Job` capability: the polymorphic unit of work a [`crate::task::Task`]
//! carries. Currently one variant, `shell`.

mod registry;
mod shell;

pub use registry::JobRegistry;
pub use shell::ShellJob;

use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Tag used when persisting and reconstructing a [`Job`] via the registry.
pub const SHELL_JOB_TYPE: &str = "shell";

/// One unit of work embedded in a [`crate::task::Task`].
///
/// Implementations own a pair of buffered channels (`output`/`err_output`,
/// capacity 100) allocated once at construction and never closed by `run`;
/// see `src/job/shell.rs` for why a persistent, never-closed buffer is
/// required to support overlapping fires of the same task.
#[async_trait]
pub trait Job: Send + Sync {
    /// The tag used to reconstruct this job variant from a payload.
    fn job_type(&self) -> &'static str;

    /// Round-trippable opaque payload used for persistence.
    fn serialize(&self) -> Result<String>;

    /// A short human-readable description, used in logs (mirrors the
    /// teacher's `Content()`/`format()` summary helpers).
    fn describe(&self) -> String;

    /// Run the job under `cancel`. Writes at most one message to exactly one
    /// of `output`/`err_output`. Never panics across the trait boundary is
    /// not guaranteed — the executor runs this inside a panic barrier.
    async fn run(&self, cancel: CancellationToken);

    /// Non-blocking receive of everything currently buffered on the success
    /// channel.
    fn drain_output(&self) -> Vec<String>;

    /// Non-blocking receive of everything currently buffered on the error
    /// channel.
    fn drain_err_output(&self) -> Vec<String>;

    /// Used by the executor's panic barrier to record a captured panic
    /// message onto the error channel after `run` has already unwound.
    fn push_err_output(&self, message: String);
}

/// Deserialize a job by its type tag and opaque payload, failing closed.
pub fn reconstruct(
    registry: &JobRegistry,
    job_type: &str,
    payload: &str,
) -> Result<std::sync::Arc<dyn Job>> {
    registry.reconstruct(job_type, payload)
}
