//! The executor chain: invokes a [`crate::task::Task`]'s job under a panic
//! barrier and wraps it with composable middleware.
//!
//! `Executor` is modeled as a boxed async closure rather than a trait —
//! this is the one seam where a closure type is more idiomatic than a
//! trait, matching `func(next Executor) Executor` in
//! `original_source/scheduler/domain/middleware.go`. It mirrors how the
//! teacher already stores and invokes `Job::run` callbacks through `Arc`.

pub mod middleware;

#[cfg(feature = "metrics")]
pub use middleware::metrics_middleware;
pub use middleware::{log_middleware, task_log_middleware};

use crate::task::{Task, TaskResult};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Invokes a task and produces its result. Boxed so it can be stored,
/// cloned cheaply via `Arc`, and composed by [`chain`].
pub type Executor = Arc<dyn Fn(CancellationToken, Task) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Wraps an `Executor`, producing a new one. Middleware must always invoke
/// the wrapped executor; a middleware that never calls `next` would starve
/// every task it wraps.
pub type Middleware = Arc<dyn Fn(Executor) -> Executor + Send + Sync>;

/// The innermost executor: runs the job under a panic barrier, then drains
/// its output channels.
///
/// 1. records `start`,
/// 2. invokes `task.job.run(cancel)` inside `catch_unwind`, recording any
///    panic as `"Panic occurred: <message>"` on the job's error channel,
/// 3. drains `output`/`err_output` non-blockingly,
/// 4. records `end` and returns the assembled [`TaskResult`].
pub fn base_executor() -> Executor {
    Arc::new(move |cancel: CancellationToken, task: Task| {
        Box::pin(async move {
            let start_time = Utc::now();

            let run = AssertUnwindSafe(task.job.run(cancel)).catch_unwind().await;
            if let Err(panic) = run {
                task.job
                    .push_err_output(format!("Panic occurred: {}", panic_message(&panic)));
            }

            let stdout = task.job.drain_output().join("");
            let stderr = task.job.drain_err_output().join("");
            let end_time = Utc::now();

            TaskResult {
                start_time,
                end_time,
                stdout,
                stderr,
            }
        })
    })
}

/// Compose `base` with `middlewares` in order: the *first* middleware in
/// the list ends up outermost, matching `Chain` in
/// `original_source/scheduler/executor.go` (which iterates its middleware
/// slice backwards when wrapping). The canonical chain is
/// `chain(base_executor(), [log_middleware(), task_log_middleware(repo)])`,
/// so `task_log_middleware` wraps the base directly (persisting the log row)
/// and `log_middleware` wraps that (so its "finish" line reflects a result
/// that's already durable).
pub fn chain(base: Executor, middlewares: impl IntoIterator<Item = Middleware>) -> Executor {
    middlewares.into_iter().rev().fold(base, |acc, mw| mw(acc))
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ShellJob;
    use std::time::Duration;

    fn echo_task(id: &str) -> Task {
        let job = Arc::new(ShellJob::new(
            true,
            Duration::from_secs(5),
            std::env::temp_dir(),
            "exec-test-owner".to_string(),
            "echo".to_string(),
            vec!["hi".to_string()],
        ));
        Task::new(id, "t", "exec-test-owner", "* * * * *", "", job)
    }

    #[tokio::test]
    async fn base_executor_captures_success() {
        let exec = base_executor();
        let result = exec(CancellationToken::new(), echo_task("t1")).await;
        assert!(result.stdout.contains("hi"));
        assert!(result.stderr.is_empty());
        assert!(result.end_time >= result.start_time);
    }

    #[tokio::test]
    async fn log_middleware_passes_result_through_unchanged() {
        let exec = chain(base_executor(), [log_middleware()]);
        let result = exec(CancellationToken::new(), echo_task("t2")).await;
        assert!(result.stdout.contains("hi"));
    }
}
