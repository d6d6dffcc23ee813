use queue_core::jobs::{spawn_recovery_loop, AdminApi, JobsRepo, SettingsRepo};
use queue_core::registry::JobContext;
use queue_core::{config, db, handlers, pool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

mod container_runtime;
mod health;
mod project_store;
mod session_client;

use container_runtime::ShellContainerRuntime;
use health::ReqwestHealthProbe;
use project_store::PgProjectStore;
use session_client::ReqwestSessionServerClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;

    println!(
        "queueflow worker starting... worker_id={} lease_ms={} poll_ms={} heartbeat_ms={} recovery_interval_ms={} migrate_on_startup={}",
        cfg.worker_id, cfg.lease_ms, cfg.poll_ms, cfg.heartbeat_ms, cfg.recovery_interval_ms, cfg.migrate_on_startup
    );

    let db_pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&db_pool).await?;
        sqlx::migrate!("./migrations").run(&db_pool).await?;
    }

    let jobs_repo = JobsRepo::new(db_pool.clone());
    let settings_repo = SettingsRepo::new(db_pool.clone());
    let admin = AdminApi::new(jobs_repo.clone(), settings_repo.clone());

    let session_base_url =
        std::env::var("SESSION_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:4000".to_string());
    let projects_dir =
        std::env::var("PROJECTS_DIR").unwrap_or_else(|_| "/var/lib/queueflow/projects".to_string());

    let ctx = JobContext {
        worker_id: cfg.worker_id.clone(),
        jobs: jobs_repo.clone(),
        admin: admin.clone(),
        projects: Arc::new(PgProjectStore::new(db_pool.clone())),
        containers: Arc::new(ShellContainerRuntime::new(projects_dir.into())),
        sessions: Arc::new(ReqwestSessionServerClient::new(session_base_url)),
        health: Arc::new(ReqwestHealthProbe::new()),
    };

    let registry = Arc::new(handlers::build_registry());
    let worker_pool = pool::WorkerPool::new(
        pool::WorkerPoolConfig {
            worker_id: cfg.worker_id.clone(),
            lease_ms: cfg.lease_ms,
            poll_ms: cfg.poll_ms,
            heartbeat_ms: cfg.heartbeat_ms,
        },
        jobs_repo.clone(),
        settings_repo,
        registry,
        ctx,
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    let pool_handle = tokio::spawn(worker_pool.run_supervised(stop_rx.clone()));
    let recovery_handle = tokio::spawn(spawn_recovery_loop(
        cfg.worker_id.clone(),
        jobs_repo,
        Duration::from_millis(cfg.recovery_interval_ms),
        stop_rx,
    ));

    tokio::signal::ctrl_c().await?;
    println!("queueflow worker: shutdown signal received, draining in-flight jobs...");
    let _ = stop_tx.send(true);

    let _ = tokio::join!(pool_handle, recovery_handle);
    println!("queueflow worker: shutdown complete");

    Ok(())
}
