//! The distributed scheduler variant: the timing structure lives in a
//! shared [`CoordinationStore`] instead of in-process state, so multiple
//! processes can cooperate with at-most-one execution per fire.
//!
//! The main loop is a direct port of
//! `original_source/scheduler/implement/distributed.go`'s `run()`: seed
//! pre-start tasks, then loop peeking the earliest score, arming a timer,
//! and racing it against add/remove signal channels and cancellation.

use super::store::CoordinationStore;
use super::SchedulerState;
use crate::cron::CronSpecCache;
use crate::error::{Error, RepoError, Result, SchedulerError};
use crate::executor::Executor;
use crate::job::JobRegistry;
use crate::pool::WorkerPool;
use crate::repo::TaskRepo;
use crate::task::Task;
use chrono::{DateTime, TimeZone as _, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maximum entries popped from the store in one round trip (matches the
/// original's hardcoded limit of 10).
const POP_LIMIT: usize = 10;

/// The task payload encoding used to transfer tasks to and from the
/// coordination store (spec §6's "flat map").
#[derive(Debug, Serialize, Deserialize)]
struct TaskPayload {
    id: String,
    task_name: String,
    scheduled_time: String,
    owner_name: String,
    description: String,
    job_type: String,
    job: String,
}

impl TaskPayload {
    fn from_task(task: &Task) -> Result<Self> {
        Ok(Self {
            id: task.id.clone(),
            task_name: task.task_name.clone(),
            scheduled_time: task.scheduled_time.clone(),
            owner_name: task.owner_name.clone(),
            description: task.description.clone(),
            job_type: task.job.job_type().to_string(),
            job: task.job.serialize()?,
        })
    }

    fn into_task(self, registry: &JobRegistry) -> Result<Task> {
        let job = crate::job::reconstruct(registry, &self.job_type, &self.job)?;
        Ok(Task::new(
            self.id,
            self.task_name,
            self.owner_name,
            self.scheduled_time,
            self.description,
            job,
        ))
    }
}

pub struct DistributedSchedulerBuilder {
    repo: Arc<dyn TaskRepo>,
    registry: Arc<JobRegistry>,
    executor: Executor,
    store: Arc<dyn CoordinationStore>,
    pool_size: usize,
    with_seconds: bool,
    timezone: Tz,
}

impl DistributedSchedulerBuilder {
    pub fn new(repo: Arc<dyn TaskRepo>, executor: Executor, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            repo,
            registry: Arc::new(JobRegistry::new()),
            executor,
            store,
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

    pub fn build(self) -> DistributedScheduler {
        let (add_tx, add_rx) = mpsc::unbounded_channel();
        let (remove_tx, remove_rx) = mpsc::unbounded_channel();
        DistributedScheduler {
            store: self.store,
            cron_cache: CronSpecCache::new(crate::cron::CronSpec::new(self.with_seconds)),
            repo: self.repo,
            registry: self.registry,
            executor: self.executor,
            pool: Arc::new(WorkerPool::new(self.pool_size.max(1))),
            scheduler_ctx: CancellationToken::new(),
            timezone: self.timezone,
            state: parking_lot::Mutex::new(SchedulerState::New),
            stopped: AtomicBool::new(false),
            add_tx,
            add_rx: AsyncMutex::new(Some(add_rx)),
            remove_tx,
            remove_rx: AsyncMutex::new(Some(remove_rx)),
            pending_before_start: parking_lot::Mutex::new(Vec::new()),
            loop_handle: AsyncMutex::new(None),
        }
    }
}

/// The distributed scheduler variant.
pub struct DistributedScheduler {
    store: Arc<dyn CoordinationStore>,
    cron_cache: CronSpecCache,
    repo: Arc<dyn TaskRepo>,
    registry: Arc<JobRegistry>,
    executor: Executor,
    pool: Arc<WorkerPool>,
    scheduler_ctx: CancellationToken,
    timezone: Tz,
    state: parking_lot::Mutex<SchedulerState>,
    stopped: AtomicBool,
    add_tx: mpsc::UnboundedSender<Task>,
    add_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Task>>>,
    remove_tx: mpsc::UnboundedSender<String>,
    remove_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<String>>>,
    pending_before_start: parking_lot::Mutex<Vec<Task>>,
    loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl DistributedScheduler {
    pub fn builder(
        repo: Arc<dyn TaskRepo>,
        executor: Executor,
        store: Arc<dyn CoordinationStore>,
    ) -> DistributedSchedulerBuilder {
        DistributedSchedulerBuilder::new(repo, executor, store)
    }

    /// Validate, persist, and either queue for pre-start seeding or signal
    /// the running main loop to register the task immediately.
    pub async fn add_task(&self, task: Task) -> Result<()> {
        if *self.state.lock() == SchedulerState::Stopped {
            return Err(SchedulerError::SchedulerClosed.into());
        }

        self.cron_cache.validate(&task.scheduled_time)?;

        let now = Utc::now();
        let record = task.to_record(now, now)?;
        if let Err(error) = self.repo.create(record).await {
            return Err(match error {
                Error::Repo(RepoError::DuplicateKey(id)) => SchedulerError::DuplicateTask(id).into(),
                other => other,
            });
        }

        if *self.state.lock() == SchedulerState::Running {
            let _ = self.add_tx.send(task);
        } else {
            self.pending_before_start.lock().push(task);
        }
        Ok(())
    }

    /// Delete the repo record, then signal the main loop to remove the
    /// store entry (spec-mandated repo-first ordering).
    pub async fn remove_task(&self, owner_name: &str, id: &str) -> Result<()> {
        self.repo.delete(owner_name, id).await?;
        let _ = self.remove_tx.send(id.to_string());
        #[cfg(feature = "metrics")]
        crate::telemetry::adjust_active_tasks(-1);
        Ok(())
    }

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

    /// Enumerate every durable record and queue it for pre-start seeding,
    /// bypassing re-persistence (`addRedisOnly`/`persistedAlready`).
    pub async fn initialize_tasks(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SchedulerState::New {
                return Ok(());
            }
            *state = SchedulerState::Initialized;
        }

        let records = self.repo.list_all().await?;
        for record in records {
            match Task::from_record(&record, &self.registry) {
                Ok(task) => {
                    if self.cron_cache.validate(&task.scheduled_time).is_err() {
                        tracing::warn!(task_id = %record.id, "skipping task with invalid cron at startup");
                        continue;
                    }
                    self.pending_before_start.lock().push(task);
                }
                Err(error) => {
                    tracing::warn!(task_id = %record.id, %error, "skipping unreconstructible task at startup");
                }
            }
        }
        Ok(())
    }

    /// Start the main loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state == SchedulerState::Running || *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Running;
        }

        let add_rx = self.add_rx.lock().await.take().expect("start called once");
        let remove_rx = self
            .remove_rx
            .lock()
            .await
            .take()
            .expect("start called once");

        let this = self.clone();
        let handle = tokio::spawn(this.run(add_rx, remove_rx));
        *self.loop_handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = SchedulerState::Stopped;
        self.scheduler_ctx.cancel();
        self.pool.close();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn run(
        self: Arc<Self>,
        mut add_rx: mpsc::UnboundedReceiver<Task>,
        mut remove_rx: mpsc::UnboundedReceiver<String>,
    ) {
        let seed_now = Utc::now();
        let pending = std::mem::take(&mut *self.pending_before_start.lock());
        for task in pending {
            self.register_task(&task, seed_now).await;
            #[cfg(feature = "metrics")]
            crate::telemetry::adjust_active_tasks(1);
        }

        loop {
            if self.scheduler_ctx.is_cancelled() {
                return;
            }

            let earliest = match self.store.earliest_score().await {
                Ok(score) => score,
                Err(error) => {
                    tracing::error!(%error, "coordination store unreachable, backing off");
                    tokio::select! {
                        _ = self.scheduler_ctx.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            let sleep_for = match earliest {
                Some(score) => {
                    let next = Utc.timestamp_opt(score, 0).single().unwrap_or_else(Utc::now);
                    (next - Utc::now()).to_std().unwrap_or(Duration::ZERO)
                }
                None => Duration::from_secs(100_000 * 3600),
            };

            tokio::select! {
                _ = self.scheduler_ctx.cancelled() => return,
                _ = tokio::time::sleep(sleep_for) => {
                    let now = Utc::now();
                    self.fire_due(now).await;
                }
                maybe_task = add_rx.recv() => {
                    if let Some(task) = maybe_task {
                        self.register_task(&task, Utc::now()).await;
                        #[cfg(feature = "metrics")]
                        crate::telemetry::adjust_active_tasks(1);
                    }
                }
                maybe_id = remove_rx.recv() => {
                    if let Some(task_id) = maybe_id
                        && let Err(error) = self.store.remove(&task_id).await {
                            tracing::error!(task_id = %task_id, %error, "failed to remove task from coordination store");
                        }
                }
            }
        }
    }

    async fn fire_due(self: &Arc<Self>, now: DateTime<Utc>) {
        let payloads = match self.store.pop_due(now.timestamp(), POP_LIMIT).await {
            Ok(payloads) => payloads,
            Err(error) => {
                tracing::error!(%error, "failed to pop due tasks from coordination store");
                return;
            }
        };

        for payload in payloads {
            let decoded: TaskPayload = match serde_json::from_str(&payload) {
                Ok(decoded) => decoded,
                Err(error) => {
                    tracing::error!(%error, "failed to decode task payload from coordination store");
                    continue;
                }
            };
            let task = match decoded.into_task(&self.registry) {
                Ok(task) => task,
                Err(error) => {
                    tracing::error!(%error, "failed to reconstruct task from coordination store payload");
                    continue;
                }
            };

            let exec = self.executor.clone();
            let ctx = self.scheduler_ctx.clone();
            let task_for_exec = task.clone();
            if self
                .pool
                .submit(async move {
                    exec(ctx, task_for_exec).await;
                })
                .is_err()
            {
                tracing::warn!(task_id = %task.id, "worker pool full, dropping fire");
                #[cfg(feature = "metrics")]
                crate::telemetry::record_dropped_fire();
            }

            // Resubmit on the pool so a slow store round-trip never blocks
            // the main loop from observing the next timer/signal.
            let this = self.clone();
            let task_for_resubmit = task.clone();
            if self
                .pool
                .submit(async move {
                    this.register_task(&task_for_resubmit, now).await;
                })
                .is_err()
            {
                tracing::error!(task_id = %task.id, "failed to resubmit task: worker pool full");
            }
        }
    }

    async fn register_task(&self, task: &Task, now: DateTime<Utc>) {
        let schedule = match self.cron_cache.get_or_parse(&task.scheduled_time) {
            Ok(schedule) => schedule,
            Err(error) => {
                tracing::error!(task_id = %task.id, %error, "failed to parse cron schedule");
                return;
            }
        };
        let next = match schedule.next(now.with_timezone(&self.timezone)) {
            Some(next) => next,
            None => return,
        };

        let payload = match TaskPayload::from_task(task).and_then(|p| {
            serde_json::to_string(&p).map_err(|e| Error::Other(e.into()))
        }) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(task_id = %task.id, %error, "failed to encode task payload");
                return;
            }
        };

        match self
            .store
            .register(&task.id, next.with_timezone(&Utc).timestamp(), &payload)
            .await
        {
            Ok(true) => tracing::info!(task_id = %task.id, next = %next, "registered task in coordination store"),
            Ok(false) => tracing::warn!(task_id = %task.id, "task already present in coordination store"),
            Err(error) => tracing::error!(task_id = %task.id, %error, "failed to register task in coordination store"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{base_executor, chain};
    use crate::job::ShellJob;
    use crate::repo::TaskRepo;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

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

    /// An in-process stand-in for `CoordinationStore`, used so the main
    /// loop's logic can be exercised without a live Redis instance.
    struct FakeStore {
        zset: Mutex<HashMap<String, i64>>,
        hashes: Mutex<HashMap<String, String>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                zset: Mutex::new(HashMap::new()),
                hashes: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CoordinationStore for FakeStore {
        async fn register(&self, task_id: &str, next_fire_unix: i64, payload: &str) -> Result<bool> {
            let mut zset = self.zset.lock().unwrap();
            let key = super::super::store::task_hash_key(task_id);
            if zset.contains_key(&key) {
                return Ok(false);
            }
            zset.insert(key.clone(), next_fire_unix);
            self.hashes.lock().unwrap().insert(key, payload.to_string());
            Ok(true)
        }

        async fn remove(&self, task_id: &str) -> Result<bool> {
            let key = super::super::store::task_hash_key(task_id);
            let removed = self.zset.lock().unwrap().remove(&key).is_some();
            self.hashes.lock().unwrap().remove(&key);
            Ok(removed)
        }

        async fn pop_due(&self, max_score_unix: i64, limit: usize) -> Result<Vec<String>> {
            let mut zset = self.zset.lock().unwrap();
            let mut due: Vec<(String, i64)> = zset
                .iter()
                .filter(|(_, score)| **score <= max_score_unix)
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            due.sort_by_key(|(_, score)| *score);
            due.truncate(limit);

            let mut hashes = self.hashes.lock().unwrap();
            let mut out = Vec::new();
            for (key, _) in &due {
                zset.remove(key);
                if let Some(payload) = hashes.remove(key) {
                    out.push(payload);
                }
            }
            Ok(out)
        }

        async fn earliest_score(&self) -> Result<Option<i64>> {
            Ok(self.zset.lock().unwrap().values().min().copied())
        }
    }

    fn echo_task(id: &str, cron: &str) -> Task {
        let job = Arc::new(ShellJob::new(
            true,
            StdDuration::from_secs(5),
            std::env::temp_dir(),
            "owner-a".to_string(),
            "echo".to_string(),
            vec!["hi".to_string()],
        ));
        Task::new(id, "t", "owner-a", cron, "", job)
    }

    fn build_scheduler(repo: Arc<dyn TaskRepo>, store: Arc<dyn CoordinationStore>) -> Arc<DistributedScheduler> {
        let executor = chain(base_executor(), []);
        Arc::new(
            DistributedScheduler::builder(repo, executor, store)
                .with_seconds(true)
                .pool_size(4)
                .build(),
        )
    }

    #[tokio::test]
    async fn add_task_registers_in_store_once_started() {
        let repo = Arc::new(InMemoryRepo::new());
        let store = Arc::new(FakeStore::new());
        let scheduler = build_scheduler(repo, store.clone());
        scheduler.start().await;
        scheduler.add_task(echo_task("t1", "*/1 * * * * *")).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(store.zset.lock().unwrap().len(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn duplicate_add_before_start_is_rejected_at_repo_layer() {
        let repo = Arc::new(InMemoryRepo::new());
        let store = Arc::new(FakeStore::new());
        let scheduler = build_scheduler(repo, store);
        scheduler.add_task(echo_task("t1", "*/1 * * * * *")).await.unwrap();
        let result = scheduler.add_task(echo_task("t1", "*/1 * * * * *")).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Scheduler(SchedulerError::DuplicateTask(ref id))) if id == "t1"
        ));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn remove_signals_store_removal() {
        let repo = Arc::new(InMemoryRepo::new());
        let store = Arc::new(FakeStore::new());
        let scheduler = build_scheduler(repo, store.clone());
        scheduler.start().await;
        scheduler.add_task(echo_task("t1", "*/1 * * * * *")).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        scheduler.remove_task("owner-a", "t1").await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert!(store.zset.lock().unwrap().is_empty());
        scheduler.stop().await;
    }
}
