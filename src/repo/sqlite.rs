//! SQLite-backed `TaskRepo`/`TaskLogRepo`.
//!
//! Grounded on the teacher's `src/tasks/store.rs`: bind-parameter queries,
//! `Row::try_get` field extraction, `NaiveDateTime::and_utc()` conversions,
//! and `sqlx::Error::Database` code matching for unique-constraint
//! violations. Unlike the teacher's auto-numbered `task_number` (which
//! retries on collision), task ids here are caller-supplied, so a
//! collision is surfaced once as `RepoError::DuplicateKey` rather than
//! retried.

use super::{TaskLogRepo, TaskRepo};
use crate::error::{Error, RepoError, Result};
use crate::task::{TaskLog, TaskRecord};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{Row as _, SqlitePool};

/// SQLite unique-constraint-violation error code (matches the teacher's
/// `tasks/store.rs`).
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

#[derive(Debug, Clone)]
pub struct SqliteTaskRepo {
    pool: SqlitePool,
}

impl SqliteTaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepo for SqliteTaskRepo {
    async fn create(&self, record: TaskRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_infos (
                task_id, task_name, scheduled_time, owner_name, description,
                job_type, job, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.task_name)
        .bind(&record.scheduled_time)
        .bind(&record.owner_name)
        .bind(&record.description)
        .bind(&record.job_type)
        .bind(&record.job_payload)
        .bind(record.created_at.naive_utc())
        .bind(record.updated_at.naive_utc())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_error))
                if db_error.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) =>
            {
                Err(RepoError::DuplicateKey(record.id).into())
            }
            Err(error) => Err(Error::Sqlx(error)),
        }
    }

    async fn delete(&self, owner_name: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM task_infos WHERE owner_name = ? AND task_id = ?")
            .bind(owner_name)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound {
                owner: owner_name.to_string(),
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner_name: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT task_id, task_name, scheduled_time, owner_name, description, job_type, job, created_at, updated_at \
             FROM task_infos WHERE owner_name = ? ORDER BY task_id",
        )
        .bind(owner_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT task_id, task_name, scheduled_time, owner_name, description, job_type, job, created_at, updated_at \
             FROM task_infos ORDER BY task_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord> {
    let created_at: NaiveDateTime = row
        .try_get("created_at")
        .map_err(|e| Error::Other(e.into()))?;
    let updated_at: NaiveDateTime = row
        .try_get("updated_at")
        .map_err(|e| Error::Other(e.into()))?;

    Ok(TaskRecord {
        id: row.try_get("task_id").map_err(|e| Error::Other(e.into()))?,
        task_name: row
            .try_get("task_name")
            .map_err(|e| Error::Other(e.into()))?,
        owner_name: row
            .try_get("owner_name")
            .map_err(|e| Error::Other(e.into()))?,
        scheduled_time: row
            .try_get("scheduled_time")
            .map_err(|e| Error::Other(e.into()))?,
        description: row
            .try_get("description")
            .map_err(|e| Error::Other(e.into()))?,
        job_type: row
            .try_get("job_type")
            .map_err(|e| Error::Other(e.into()))?,
        job_payload: row.try_get("job").map_err(|e| Error::Other(e.into()))?,
        created_at: created_at.and_utc(),
        updated_at: updated_at.and_utc(),
    })
}

#[derive(Debug, Clone)]
pub struct SqliteTaskLogRepo {
    pool: SqlitePool,
}

impl SqliteTaskLogRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskLogRepo for SqliteTaskLogRepo {
    async fn create(&self, log: TaskLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_logs (task_id, name, content, output, err_output, start_time, end_time)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.task_id)
        .bind(&log.task_name)
        .bind(&log.job_content_digest)
        .bind(&log.stdout)
        .bind(&log.stderr)
        .bind(log.start_time.naive_utc())
        .bind(log.end_time.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Convenience for callers constructing fresh timestamps at call sites.
pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ShellJob;
    use crate::task::Task;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations should apply");

        pool
    }

    fn sample_task(id: &str) -> Task {
        let job = Arc::new(ShellJob::new(
            true,
            Duration::from_secs(5),
            std::env::temp_dir(),
            "owner-a".to_string(),
            "echo".to_string(),
            vec!["hi".to_string()],
        ));
        Task::new(id, "sample", "owner-a", "* * * * *", "", job)
    }

    #[tokio::test]
    async fn create_then_list_by_owner_round_trips() {
        let pool = setup_pool().await;
        let repo = SqliteTaskRepo::new(pool);
        let task = sample_task("t1");
        let now = now();
        repo.create(task.to_record(now, now).unwrap()).await.unwrap();

        let records = repo.list_by_owner("owner-a").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "t1");
    }

    #[tokio::test]
    async fn duplicate_id_surfaces_as_duplicate_key() {
        let pool = setup_pool().await;
        let repo = SqliteTaskRepo::new(pool);
        let task = sample_task("dup");
        let now = now();
        repo.create(task.to_record(now, now).unwrap()).await.unwrap();
        let result = repo.create(task.to_record(now, now).unwrap()).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Repo(RepoError::DuplicateKey(ref id))) if id == "dup"
        ));
    }

    #[tokio::test]
    async fn delete_missing_tuple_is_not_found() {
        let pool = setup_pool().await;
        let repo = SqliteTaskRepo::new(pool);
        let result = repo.delete("owner-a", "missing").await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Repo(RepoError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn task_log_repo_persists_rows() {
        let pool = setup_pool().await;
        let repo = SqliteTaskLogRepo::new(pool);
        let task = sample_task("t1");
        let now = now();
        let result = crate::task::TaskResult {
            start_time: now,
            end_time: now,
            stdout: "hi".to_string(),
            stderr: String::new(),
        };
        let log = TaskLog::from_result(&task, &result);
        repo.create(log).await.unwrap();
    }
}
