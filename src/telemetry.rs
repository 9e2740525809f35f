//! Prometheus metrics, gated behind the `metrics` feature exactly like the
//! teacher's telemetry module: a process-global [`Registry`] built once via
//! `LazyLock`, with cheap-to-clone metric handles for call sites.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;

static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// All Prometheus metric handles for the scheduler process.
pub struct Metrics {
    pub registry: Registry,

    /// Fires dropped because the worker pool was at capacity.
    pub dropped_fires_total: IntCounter,

    /// Completed job executions, labeled by outcome ("success"/"failure").
    pub executions_total: IntCounterVec,

    /// Job execution wall-clock duration.
    pub execution_duration_seconds: Histogram,

    /// Currently registered tasks (local variant: timer loops; distributed:
    /// sorted-set entries).
    pub active_tasks: IntGauge,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let dropped_fires_total = IntCounter::new(
            "scheduler_dropped_fires_total",
            "Fires dropped because the worker pool was at capacity",
        )
        .expect("hardcoded metric descriptor");

        let executions_total = IntCounterVec::new(
            Opts::new("scheduler_executions_total", "Completed job executions"),
            &["outcome"],
        )
        .expect("hardcoded metric descriptor");

        let execution_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "scheduler_execution_duration_seconds",
                "Job execution wall-clock duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        )
        .expect("hardcoded metric descriptor");

        let active_tasks = IntGauge::new("scheduler_active_tasks", "Currently registered tasks")
            .expect("hardcoded metric descriptor");

        registry
            .register(Box::new(dropped_fires_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(executions_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(execution_duration_seconds.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(active_tasks.clone()))
            .expect("hardcoded metric");

        Self {
            registry,
            dropped_fires_total,
            executions_total,
            execution_duration_seconds,
            active_tasks,
        }
    }

    pub fn global() -> &'static Self {
        &METRICS
    }
}

/// Record one fire dropped for lack of pool capacity.
pub fn record_dropped_fire() {
    Metrics::global().dropped_fires_total.inc();
}

/// Record one completed execution's outcome and duration.
pub fn record_execution(success: bool, duration: std::time::Duration) {
    let metrics = Metrics::global();
    let outcome = if success { "success" } else { "failure" };
    metrics.executions_total.with_label_values(&[outcome]).inc();
    metrics.execution_duration_seconds.observe(duration.as_secs_f64());
}

/// Adjust the active-task gauge by `delta` (negative to decrement).
pub fn adjust_active_tasks(delta: i64) {
    Metrics::global().active_tasks.add(delta);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_fire_increments_counter() {
        let before = Metrics::global().dropped_fires_total.get();
        record_dropped_fire();
        assert_eq!(Metrics::global().dropped_fires_total.get(), before + 1);
    }

    #[test]
    fn execution_outcome_increments_labeled_counter() {
        let before = Metrics::global()
            .executions_total
            .with_label_values(&["success"])
            .get();
        record_execution(true, std::time::Duration::from_millis(10));
        assert_eq!(
            Metrics::global()
                .executions_total
                .with_label_values(&["success"])
                .get(),
            before + 1
        );
    }
}
