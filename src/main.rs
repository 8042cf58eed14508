use std::sync::Arc;

use color_eyre::eyre::Result;
use counselhub_api::config::ApiConfig;
use counselhub_core::SystemClock;
use counselhub_db::{PgStore, create_pool, schema::initialize_database};
use counselhub_engine::providers::{FsEvidenceStorage, HttpMeetingRooms, LogNotifier};
use counselhub_engine::{Engine, EngineConfig, Providers};
use dotenv::dotenv;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Load environment variables
    dotenv().ok();

    // Load configuration
    let config = ApiConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    // Create database connection pool
    let db_pool = create_pool(&config.database_url, config.max_connections).await?;

    // Initialize database schema
    initialize_database(&db_pool).await?;

    let providers = Providers {
        rooms: Arc::new(HttpMeetingRooms::new(
            engine_config.meeting_api_url.clone(),
            engine_config.meeting_api_key.clone(),
        )),
        evidence: Arc::new(FsEvidenceStorage::new(
            engine_config.evidence_dir.clone(),
            engine_config.evidence_public_url.clone(),
        )),
        notifier: Arc::new(LogNotifier),
    };
    let engine = Engine::new(
        Arc::new(PgStore::new(db_pool)),
        Arc::new(SystemClock),
        engine_config.calendar,
        engine_config.policy,
        providers,
    );

    // Start API server
    counselhub_api::start_server(config, engine, Some(engine_config.evidence_dir)).await?;

    Ok(())
}
