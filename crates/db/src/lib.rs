pub mod memory;
pub mod models;
pub mod repositories;
pub mod schema;

pub mod mock;

use eyre::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub use memory::MemoryStore;
pub use repositories::{
    AvailabilityRepository, BookingRepository, ConfirmationBundle, ConfirmationOutcome, DisputeOutcome,
    DisputeRepository, PgStore, SlotRebuild, SlotRepository, Store, TaskStore, TransitionOutcome,
};

pub type DbPool = Pool<Postgres>;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}
