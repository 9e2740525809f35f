//! taskwheel CLI entry point.
//!
//! Default subcommand (`run`) starts the scheduler daemon in the
//! foreground; `add`/`remove`/`list` are a thin client against the same
//! SQLite-backed task registry, for operators and scripts.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskwheel::config::SchedulerSettings;
use taskwheel::executor::{base_executor, chain, log_middleware, task_log_middleware};
use taskwheel::job::{JobRegistry, ShellJob};
use taskwheel::repo::{SqliteTaskLogRepo, SqliteTaskRepo};
use taskwheel::scheduler::{DistributedScheduler, LocalScheduler, RedisCoordinationStore};
use taskwheel::task::Task;

#[derive(Parser)]
#[command(name = "taskwheel", version)]
#[command(about = "A multi-tenant cron task scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a TOML config file (optional; falls back to env + defaults).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon in the foreground.
    Run,
    /// Register a new shell task.
    Add {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        cron: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        use_shell: bool,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        command: String,
        args: Vec<String>,
    },
    /// Remove a task by owner and id.
    Remove { owner: String, id: String },
    /// List an owner's tasks.
    List { owner: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let settings = match &cli.config {
        Some(path) => SchedulerSettings::load_from_path(path)?,
        None => SchedulerSettings::load()?,
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Add {
            owner,
            id,
            name,
            cron,
            description,
            use_shell,
            timeout_secs,
            command,
            args,
        } => {
            let repo = sqlite_repo(&settings).await?;
            let job = Arc::new(ShellJob::new(
                use_shell,
                Duration::from_secs(timeout_secs),
                settings.work_dir.clone(),
                owner.clone(),
                command,
                args,
            ));
            let task = Task::new(id, name, owner, cron, description, job);
            let now = taskwheel::repo::sqlite::now();
            let record = task.to_record(now, now)?;
            repo.create(record)
                .await
                .context("failed to register task")?;
            println!("task registered");
            Ok(())
        }
        Command::Remove { owner, id } => {
            let repo = sqlite_repo(&settings).await?;
            repo.delete(&owner, &id).await.context("failed to remove task")?;
            println!("task removed");
            Ok(())
        }
        Command::List { owner } => {
            let repo = sqlite_repo(&settings).await?;
            let records = repo.list_by_owner(&owner).await?;
            for record in records {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id, record.task_name, record.scheduled_time, record.description
                );
            }
            Ok(())
        }
    }
}

async fn sqlite_pool(settings: &SchedulerSettings) -> anyhow::Result<sqlx::SqlitePool> {
    if let Some(parent) = settings.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let url = format!("sqlite://{}?mode=rwc", settings.database_path.display());
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .with_context(|| format!("failed to open database at {}", settings.database_path.display()))?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;
    Ok(pool)
}

async fn sqlite_repo(settings: &SchedulerSettings) -> anyhow::Result<SqliteTaskRepo> {
    Ok(SqliteTaskRepo::new(sqlite_pool(settings).await?))
}

/// Build the executor chain, build the appropriate scheduler variant
/// (local unless `redis_url` is configured), replay durable tasks, start
/// firing, and block until a shutdown signal.
async fn run(settings: SchedulerSettings) -> anyhow::Result<()> {
    let pool = sqlite_pool(&settings).await?;
    let task_repo: Arc<dyn taskwheel::repo::TaskRepo> = Arc::new(SqliteTaskRepo::new(pool.clone()));
    let task_log_repo: Arc<dyn taskwheel::repo::TaskLogRepo> =
        Arc::new(SqliteTaskLogRepo::new(pool));

    let mut middlewares = vec![log_middleware(), task_log_middleware(task_log_repo)];
    #[cfg(feature = "metrics")]
    middlewares.push(taskwheel::executor::metrics_middleware());
    let executor = chain(base_executor(), middlewares);

    let registry = Arc::new(JobRegistry::new());

    if let Some(redis_url) = &settings.redis_url {
        let redis_cfg = deadpool_redis::Config::from_url(redis_url.clone());
        let redis_pool = redis_cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .context("failed to build redis connection pool")?;
        let store = Arc::new(RedisCoordinationStore::new(redis_pool));

        let scheduler = Arc::new(
            DistributedScheduler::builder(task_repo, executor, store)
                .registry(registry)
                .pool_size(settings.goroutines_size)
                .with_seconds(settings.with_seconds)
                .timezone(settings.timezone)
                .build(),
        );
        scheduler.initialize_tasks().await?;
        scheduler.start().await;
        tracing::info!("distributed scheduler running");
        tokio::signal::ctrl_c().await?;
        scheduler.stop().await;
    } else {
        let scheduler = Arc::new(
            LocalScheduler::builder(task_repo, executor)
                .registry(registry)
                .pool_size(settings.goroutines_size)
                .with_seconds(settings.with_seconds)
                .timezone(settings.timezone)
                .build(),
        );
        scheduler.initialize_tasks().await?;
        scheduler.start();
        tracing::info!("local scheduler running");
        tokio::signal::ctrl_c().await?;
        scheduler.stop().await;
    }

    Ok(())
}
