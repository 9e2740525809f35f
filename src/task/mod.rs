//! The `Task` descriptor and its persisted/executed-result shapes.

use crate::job::{self, Job, JobRegistry};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// An immutable, scheduled unit of work.
///
/// `(owner_name, id)` identifies a task uniquely. Once installed, a task's
/// `scheduled_time` and `job` payload never mutate; updates are modeled by
/// the caller as delete-then-add.
#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub task_name: String,
    pub owner_name: String,
    pub scheduled_time: String,
    pub description: String,
    pub job: Arc<dyn Job>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        task_name: impl Into<String>,
        owner_name: impl Into<String>,
        scheduled_time: impl Into<String>,
        description: impl Into<String>,
        job: Arc<dyn Job>,
    ) -> Self {
        Self {
            id: id.into(),
            task_name: task_name.into(),
            owner_name: owner_name.into(),
            scheduled_time: scheduled_time.into(),
            description: description.into(),
            job,
        }
    }

    /// Convert to the persistent form, encoding the job's type tag and
    /// opaque payload.
    pub fn to_record(&self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> crate::error::Result<TaskRecord> {
        Ok(TaskRecord {
            id: self.id.clone(),
            task_name: self.task_name.clone(),
            owner_name: self.owner_name.clone(),
            scheduled_time: self.scheduled_time.clone(),
            description: self.description.clone(),
            job_type: self.job.job_type().to_string(),
            job_payload: self.job.serialize()?,
            created_at,
            updated_at,
        })
    }

    /// Reconstruct a `Task` from its persistent form via the job registry.
    /// Fails with `UnknownJobType` for an unrecognized `job_type`.
    pub fn from_record(record: &TaskRecord, registry: &JobRegistry) -> crate::error::Result<Self> {
        let job = job::reconstruct(registry, &record.job_type, &record.job_payload)?;
        Ok(Self {
            id: record.id.clone(),
            task_name: record.task_name.clone(),
            owner_name: record.owner_name.clone(),
            scheduled_time: record.scheduled_time.clone(),
            description: record.description.clone(),
            job,
        })
    }
}

/// The durable form of a [`Task`], as stored in `task_infos`.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub task_name: String,
    pub owner_name: String,
    pub scheduled_time: String,
    pub description: String,
    pub job_type: String,
    pub job_payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The outcome of a single job invocation, always carrying both timestamps
/// even on failure.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
}

/// The durable form of one fire's outcome, as stored in `task_logs`.
#[derive(Debug, Clone)]
pub struct TaskLog {
    pub task_id: String,
    pub task_name: String,
    /// A short digest of the job's content, for audit/debugging — not a
    /// cryptographic commitment, just `Job::describe()`.
    pub job_content_digest: String,
    pub stdout: String,
    pub stderr: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TaskLog {
    pub fn from_result(task: &Task, result: &TaskResult) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.task_name.clone(),
            job_content_digest: task.job.describe(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            start_time: result.start_time,
            end_time: result.end_time,
        }
    }
}
