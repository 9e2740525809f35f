//! The in-process scheduler: one `tokio` task per registered task computes
//! its own next-fire instant and resubmits itself, rather than a single
//! shared min-heap.
//!
//! Generalizes the teacher's per-job-spawn design in
//! `src/cron/scheduler.rs` (`start_timer`, one `JoinHandle` per cron job,
//! `tracing::info!`/`tracing::warn!` structured spans). This keeps the
//! "entry handle" concrete (a `CancellationToken` + `JoinHandle`) so
//! add/remove are O(1) without an auxiliary index into a heap, at the cost
//! of one task per schedule — acceptable since `maxTaskNum` is an
//! unenforced soft bound (§6).

use super::SchedulerState;
use crate::cron::CronSpecCache;
use crate::error::{Error, RepoError, Result, SchedulerError};
use crate::executor::Executor;
use crate::job::JobRegistry;
use crate::pool::WorkerPool;
use crate::repo::TaskRepo;
use crate::task::Task;
use chrono::Utc;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TaskEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Builds a [`LocalScheduler`].
pub struct LocalSchedulerBuilder {
    repo: Arc<dyn TaskRepo>,
    registry: Arc<JobRegistry>,
    executor: Executor,
    pool_size: usize,
    with_seconds: bool,
    timezone: Tz,
}

impl LocalSchedulerBuilder {
    pub fn new(repo: Arc<dyn TaskRepo>, executor: Executor) -> Self {
        Self {
            repo,
            registry: Arc::new(JobRegistry::new()),
            executor,
            pool_size: 10,
            with_seconds: false,
            timezone: Tz::UTC,
        }
    }

    pub fn registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_seconds(mut self, with_seconds: bool) -> Self {
        self.with_seconds = with_seconds;
        self
    }

    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn build(self) -> LocalScheduler {
        let (running_tx, running_rx) = watch::channel(false);
        LocalScheduler {
            mapping: AsyncMutex::new(HashMap::new()),
            cron_cache: CronSpecCache::new(crate::cron::CronSpec::new(self.with_seconds)),
            repo: self.repo,
            registry: self.registry,
            executor: self.executor,
            pool: Arc::new(WorkerPool::new(self.pool_size.max(1))),
            scheduler_ctx: CancellationToken::new(),
            timezone: self.timezone,
            state: parking_lot::Mutex::new(SchedulerState::New),
            stopped: AtomicBool::new(false),
            running_tx,
            running_rx,
        }
    }
}

/// The local (in-process) scheduler variant.
pub struct LocalScheduler {
    mapping: AsyncMutex<HashMap<String, TaskEntry>>,
    cron_cache: CronSpecCache,
    repo: Arc<dyn TaskRepo>,
    registry: Arc<JobRegistry>,
    executor: Executor,
    pool: Arc<WorkerPool>,
    scheduler_ctx: CancellationToken,
    timezone: Tz,
    state: parking_lot::Mutex<SchedulerState>,
    stopped: AtomicBool,
    running_tx: watch::Sender<bool>,
    running_rx: watch::Receiver<bool>,
}

impl LocalScheduler {
    pub fn builder(repo: Arc<dyn TaskRepo>, executor: Executor) -> LocalSchedulerBuilder {
        LocalSchedulerBuilder::new(repo, executor)
    }

    /// Register a new task: validates and persists it, then installs a
    /// timer task for it. The persistence step precedes timer installation
    /// so a successful add is always recoverable.
    pub async fn add_task(self: &Arc<Self>, task: Task) -> Result<()> {
        self.install(task, false).await
    }

    /// On startup, enumerate every durable record and install it without
    /// re-persisting. Per-record cron/job-reconstruction failures are
    /// logged and skipped; the record remains in the repo.
    pub async fn initialize_tasks(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SchedulerState::New {
                return Ok(());
            }
            *state = SchedulerState::Initialized;
        }

        let records = self.repo.list_all().await?;
        for record in records {
            let task = match Task::from_record(&record, &self.registry) {
                Ok(task) => task,
                Err(error) => {
                    tracing::warn!(task_id = %record.id, %error, "skipping unreconstructible task at startup");
                    continue;
                }
            };
            if let Err(error) = self.install(task, true).await {
                tracing::warn!(task_id = %record.id, %error, "skipping task at startup");
            }
        }
        Ok(())
    }

    /// Start firing. Idempotent: repeated calls are no-ops.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if *state == SchedulerState::Running || *state == SchedulerState::Stopped {
            return;
        }
        *state = SchedulerState::Running;
        let _ = self.running_tx.send(true);
    }

    /// Stop accepting fires, cancel every in-flight job, and drain the pool.
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = SchedulerState::Stopped;

        self.scheduler_ctx.cancel();
        self.pool.close();

        let entries: Vec<TaskEntry> = {
            let mut guard = self.mapping.lock().await;
            guard.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            let _ = entry.handle.await;
        }
    }

    /// Remove a task: deletes the repo record first, then the timing entry
    /// (spec-mandated ordering for the local variant).
    pub async fn remove_task(&self, owner_name: &str, id: &str) -> Result<()> {
        let mut guard = self.mapping.lock().await;
        if !guard.contains_key(id) {
            return Err(SchedulerError::TaskNotFound(id.to_string()).into());
        }
        self.repo.delete(owner_name, id).await?;
        if let Some(entry) = guard.remove(id) {
            entry.cancel.cancel();
            entry.handle.abort();
            #[cfg(feature = "metrics")]
            crate::telemetry::adjust_active_tasks(-1);
        }
        Ok(())
    }

    /// List tasks from the durable store (not the in-memory timing
    /// structure), reconstructing each and skipping any that fail.
    pub async fn list_tasks(&self, owner_name: &str) -> Result<Vec<Task>> {
        let records = self.repo.list_by_owner(owner_name).await?;
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            match Task::from_record(&record, &self.registry) {
                Ok(task) => tasks.push(task),
                Err(error) => {
                    tracing::warn!(task_id = %record.id, %error, "skipping task with unknown job type");
                }
            }
        }
        Ok(tasks)
    }

    async fn install(self: &Arc<Self>, task: Task, persisted_already: bool) -> Result<()> {
        if *self.state.lock() == SchedulerState::Stopped {
            return Err(SchedulerError::SchedulerClosed.into());
        }

        let mut guard = self.mapping.lock().await;
        if guard.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id.clone()).into());
        }

        let schedule = self.cron_cache.get_or_parse(&task.scheduled_time)?;

        if !persisted_already {
            let now = Utc::now();
            let record = task.to_record(now, now)?;
            if let Err(error) = self.repo.create(record).await {
                return Err(match error {
                    Error::Repo(RepoError::DuplicateKey(id)) => SchedulerError::DuplicateTask(id).into(),
                    other => other,
                });
            }
        }

        let task_cancel = self.scheduler_ctx.child_token();
        let handle = self.spawn_timer_loop(task.clone(), schedule, task_cancel.clone());
        guard.insert(
            task.id.clone(),
            TaskEntry {
                cancel: task_cancel,
                handle,
            },
        );
        #[cfg(feature = "metrics")]
        crate::telemetry::adjust_active_tasks(1);
        Ok(())
    }

    fn spawn_timer_loop(
        self: &Arc<Self>,
        task: Task,
        schedule: crate::cron::Schedule,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let pool = self.pool.clone();
        let timezone = self.timezone;
        let scheduler_ctx = self.scheduler_ctx.clone();
        let mut running_rx = self.running_rx.clone();

        tokio::spawn(async move {
            if !*running_rx.borrow() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    res = running_rx.changed() => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }

            let mut next_fire = match schedule.next(Utc::now().with_timezone(&timezone)) {
                Some(t) => t,
                None => return,
            };

            loop {
                let sleep_for = (next_fire.with_timezone(&Utc) - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(sleep_for) => {}
                }

                if cancel.is_cancelled() {
                    return;
                }

                let exec = executor.clone();
                let ctx = scheduler_ctx.clone();
                let task_for_fire = task.clone();
                let task_id = task.id.clone();
                if pool
                    .submit(async move {
                        exec(ctx, task_for_fire).await;
                    })
                    .is_err()
                {
                    tracing::warn!(task_id = %task_id, "worker pool full, dropping fire");
                    #[cfg(feature = "metrics")]
                    crate::telemetry::record_dropped_fire();
                }

                next_fire = match schedule.next(next_fire) {
                    Some(t) => t,
                    None => return,
                };
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{base_executor, chain};
    use crate::job::ShellJob;
    use crate::repo::TaskRepo;
    use std::sync::Mutex;

    struct InMemoryRepo {
        records: Mutex<HashMap<(String, String), crate::task::TaskRecord>>,
    }

    impl InMemoryRepo {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskRepo for InMemoryRepo {
        async fn create(&self, record: crate::task::TaskRecord) -> Result<()> {
            let mut guard = self.records.lock().unwrap();
            let key = (record.owner_name.clone(), record.id.clone());
            if guard.contains_key(&key) {
                return Err(RepoError::DuplicateKey(record.id).into());
            }
            guard.insert(key, record);
            Ok(())
        }

        async fn delete(&self, owner_name: &str, id: &str) -> Result<()> {
            let mut guard = self.records.lock().unwrap();
            let key = (owner_name.to_string(), id.to_string());
            if guard.remove(&key).is_none() {
                return Err(RepoError::NotFound {
                    owner: owner_name.to_string(),
                    id: id.to_string(),
                }
                .into());
            }
            Ok(())
        }

        async fn list_by_owner(&self, owner_name: &str) -> Result<Vec<crate::task::TaskRecord>> {
            let guard = self.records.lock().unwrap();
            Ok(guard
                .values()
                .filter(|r| r.owner_name == owner_name)
                .cloned()
                .collect())
        }

        async fn list_all(&self) -> Result<Vec<crate::task::TaskRecord>> {
            let guard = self.records.lock().unwrap();
            Ok(guard.values().cloned().collect())
        }
    }

    fn echo_task(id: &str, cron: &str) -> Task {
        let job = Arc::new(ShellJob::new(
            true,
            Duration::from_secs(5),
            std::env::temp_dir(),
            "owner-a".to_string(),
            "echo".to_string(),
            vec!["hi".to_string()],
        ));
        Task::new(id, "t", "owner-a", cron, "", job)
    }

    fn build_scheduler(repo: Arc<dyn TaskRepo>) -> Arc<LocalScheduler> {
        let executor = chain(base_executor(), []);
        Arc::new(
            LocalScheduler::builder(repo, executor)
                .with_seconds(true)
                .pool_size(4)
                .build(),
        )
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let repo = Arc::new(InMemoryRepo::new());
        let scheduler = build_scheduler(repo);
        scheduler.add_task(echo_task("t1", "*/1 * * * * *")).await.unwrap();
        let result = scheduler.add_task(echo_task("t1", "*/1 * * * * *")).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Scheduler(SchedulerError::DuplicateTask(ref id))) if id == "t1"
        ));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn remove_unknown_task_is_not_found() {
        let repo = Arc::new(InMemoryRepo::new());
        let scheduler = build_scheduler(repo);
        let result = scheduler.remove_task("owner-a", "missing").await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Scheduler(SchedulerError::TaskNotFound(_)))
        ));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn list_tasks_reflects_repo() {
        let repo = Arc::new(InMemoryRepo::new());
        let scheduler = build_scheduler(repo);
        scheduler.add_task(echo_task("t1", "*/1 * * * * *")).await.unwrap();
        let tasks = scheduler.list_tasks("owner-a").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let repo = Arc::new(InMemoryRepo::new());
        let scheduler = build_scheduler(repo);
        scheduler.start();
        scheduler.stop().await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn fires_do_not_start_before_start_is_called() {
        let repo = Arc::new(InMemoryRepo::new());
        let scheduler = build_scheduler(repo);
        scheduler.add_task(echo_task("t1", "* * * * * *")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        // No direct observable fire count here without a TaskLogRepo wired in;
        // this test exists to document that start() gates the timer loops.
        scheduler.start();
        scheduler.stop().await;
    }
}
