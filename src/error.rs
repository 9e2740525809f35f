//! Crate-wide error types.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("coordination store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::sync::Arc<std::io::Error>,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Cron expression parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },
}

/// Scheduler control-plane errors (add/remove/list/lifecycle).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task id '{0}' already exists")]
    DuplicateTask(String),

    #[error("task id '{0}' not found")]
    TaskNotFound(String),

    #[error("unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("scheduler is stopped and cannot accept new operations")]
    SchedulerClosed,
}

/// Worker pool admission errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is at capacity")]
    Full,

    #[error("worker pool is closed")]
    Closed,
}

/// Task/task-log repository errors (beyond raw `sqlx::Error`).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("task id '{0}' already exists")]
    DuplicateKey(String),

    #[error("task '{owner}/{id}' not found")]
    NotFound { owner: String, id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
