use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use counselhub_api::config::parse_log_level;
use counselhub_core::SystemClock;
use counselhub_db::{PgStore, create_pool, schema::initialize_database};
use counselhub_engine::providers::{FsEvidenceStorage, HttpMeetingRooms, LogNotifier};
use counselhub_engine::tasks::register_maintenance;
use counselhub_engine::{Engine, EngineConfig, Providers};
use counselhub_scheduler::{WorkerConfig, WorkerPool};
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// How long in-flight tasks get to finish after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Load environment variables
    dotenv().ok();

    // Initialize logging
    let level = parse_log_level(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting CounselHub worker");

    // Load configuration
    let database_url = std::env::var("DATABASE_URL")
        .wrap_err("DATABASE_URL environment variable must be set")?;
    let worker_config = WorkerConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    let db_pool = create_pool(&database_url, worker_config.concurrency as u32 + 2).await?;
    initialize_database(&db_pool).await?;

    let store = Arc::new(PgStore::new(db_pool));
    let clock = Arc::new(SystemClock);
    let providers = Providers {
        rooms: Arc::new(HttpMeetingRooms::new(
            engine_config.meeting_api_url,
            engine_config.meeting_api_key,
        )),
        evidence: Arc::new(FsEvidenceStorage::new(
            engine_config.evidence_dir,
            engine_config.evidence_public_url,
        )),
        notifier: Arc::new(LogNotifier),
    };
    let engine = Engine::new(
        store.clone(),
        clock.clone(),
        engine_config.calendar,
        engine_config.policy,
        providers,
    );

    register_maintenance(&engine.scheduler).await?;

    let pool = WorkerPool::new(
        store,
        engine.task_registry(),
        clock,
        engine_config.calendar,
        worker_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker = tokio::spawn(async move { pool.run(shutdown_rx).await });

    tokio::select! {
        joined = &mut worker => {
            // The pool only returns on its own when something went wrong
            return match joined {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
        }
        signal = tokio::signal::ctrl_c() => {
            signal.wrap_err("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received, draining in-flight tasks");
        }
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut worker).await {
        Ok(Ok(Ok(()))) => info!("Worker shut down gracefully"),
        Ok(Ok(Err(e))) => error!("Worker stopped with error: {:?}", e),
        Ok(Err(e)) => error!("Worker task panicked: {}", e),
        Err(_) => {
            warn!("Drain timed out after {:?}; leases will expire and tasks will be retried", DRAIN_TIMEOUT);
            worker.abort();
        }
    }

    Ok(())
}
