//! Built-in middleware: structured logging and result persistence.
//!
//! Modeled on the teacher's `tracing::info!(cron_id = %job.id, ...)` spans
//! in `src/cron/scheduler.rs`. A middleware must never let a failure in its
//! own logic suppress the inner executor's invocation or result; errors are
//! logged and swallowed.

use super::{Executor, Middleware};
use crate::repo::TaskLogRepo;
use crate::task::TaskLog;
use futures::FutureExt as _;
use std::sync::Arc;

/// Emits a "start" span before and a "finish" entry with duration after.
pub fn log_middleware() -> Middleware {
    Arc::new(|next: Executor| {
        Arc::new(move |cancel, task| {
            let next = next.clone();
            async move {
                let task_id = task.id.clone();
                let owner_name = task.owner_name.clone();
                tracing::info!(task_id = %task_id, owner_name = %owner_name, "task execution starting");

                let result = next(cancel, task).await;

                let duration_ms = (result.end_time - result.start_time).num_milliseconds();
                if result.stderr.is_empty() {
                    tracing::info!(task_id = %task_id, duration_ms, "task execution finished");
                } else {
                    tracing::warn!(task_id = %task_id, duration_ms, "task execution finished with error output");
                }

                result
            }
            .boxed()
        })
    })
}

/// Records the execution outcome/duration to the process's Prometheus
/// registry. No-op unless the crate is built with the `metrics` feature.
#[cfg(feature = "metrics")]
pub fn metrics_middleware() -> Middleware {
    Arc::new(|next: Executor| {
        Arc::new(move |cancel, task| {
            let next = next.clone();
            async move {
                let result = next(cancel, task).await;
                let duration = (result.end_time - result.start_time)
                    .to_std()
                    .unwrap_or_default();
                crate::telemetry::record_execution(result.stderr.is_empty(), duration);
                result
            }
            .boxed()
        })
    })
}

/// Persists a [`TaskLog`] row built from the inner result. Persistence
/// failures are logged but never propagate — a broken log sink must not
/// suppress task execution.
pub fn task_log_middleware(repo: Arc<dyn TaskLogRepo>) -> Middleware {
    Arc::new(move |next: Executor| {
        let repo = repo.clone();
        Arc::new(move |cancel, task| {
            let next = next.clone();
            let repo = repo.clone();
            async move {
                let task_for_log = task.clone();
                let result = next(cancel, task).await;

                let log = TaskLog::from_result(&task_for_log, &result);
                if let Err(error) = repo.create(log).await {
                    tracing::error!(task_id = %task_for_log.id, %error, "failed to persist task log");
                }

                result
            }
            .boxed()
        })
    })
}
