use eyre::Result;
use sqlx::{Pool, Postgres};
use tracing::info;

pub async fn initialize_database(pool: &Pool<Postgres>) -> Result<()> {
    info!("Initializing database schema...");

    // Weekly availability templates, one row per counselor and weekday
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS availability_rules (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            counselor_id UUID NOT NULL,
            day_of_week VARCHAR(16) NOT NULL,
            is_available BOOLEAN NOT NULL DEFAULT TRUE,
            time_ranges JSONB NOT NULL DEFAULT '[]'::jsonb,
            price NUMERIC(12, 2) NOT NULL,
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            CONSTRAINT uq_availability_counselor_day UNIQUE (counselor_id, day_of_week)
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Materialized, bookable slots
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generated_slots (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            counselor_id UUID NOT NULL,
            start_time TIMESTAMP WITH TIME ZONE NOT NULL,
            end_time TIMESTAMP WITH TIME ZONE NOT NULL,
            base_price NUMERIC(12, 2) NOT NULL,
            total_price NUMERIC(12, 2) NOT NULL,
            status VARCHAR(16) NOT NULL DEFAULT 'available',
            booking_id UUID NULL,
            client_id UUID NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            CONSTRAINT valid_slot_range CHECK (end_time > start_time),
            CONSTRAINT uq_slot_counselor_interval UNIQUE (counselor_id, start_time, end_time)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookings (
            id UUID PRIMARY KEY,
            client_id UUID NOT NULL,
            counselor_id UUID NOT NULL,
            slot_id UUID NOT NULL REFERENCES generated_slots(id),
            status VARCHAR(32) NOT NULL,
            amount NUMERIC(12, 2) NOT NULL,
            payment_id VARCHAR(255) NOT NULL,
            dispute_window_open_at TIMESTAMP WITH TIME ZONE NULL,
            auto_complete_at TIMESTAMP WITH TIME ZONE NOT NULL,
            completed_at TIMESTAMP WITH TIME ZONE NULL,
            payout_amount NUMERIC(12, 2) NOT NULL,
            payout_release_on TIMESTAMP WITH TIME ZONE NOT NULL,
            payout_status VARCHAR(16) NOT NULL,
            disputed_at TIMESTAMP WITH TIME ZONE NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id UUID PRIMARY KEY,
            booking_id UUID NOT NULL UNIQUE REFERENCES bookings(id),
            room_id VARCHAR(255) NOT NULL,
            room_url TEXT NOT NULL,
            teardown_task_key VARCHAR(255) NOT NULL,
            status VARCHAR(16) NOT NULL,
            scheduled_start TIMESTAMP WITH TIME ZONE NOT NULL,
            scheduled_end TIMESTAMP WITH TIME ZONE NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS disputes (
            id UUID PRIMARY KEY,
            booking_id UUID NOT NULL UNIQUE REFERENCES bookings(id),
            client_id UUID NOT NULL,
            issue_type VARCHAR(32) NOT NULL,
            description TEXT NOT NULL,
            evidence JSONB NOT NULL DEFAULT '[]'::jsonb,
            status VARCHAR(16) NOT NULL,
            raised_at TIMESTAMP WITH TIME ZONE NOT NULL,
            activity JSONB NOT NULL DEFAULT '[]'::jsonb
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Durable delayed tasks consumed by the worker pool
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id UUID PRIMARY KEY,
            task_type VARCHAR(64) NOT NULL,
            idempotency_key VARCHAR(255) NOT NULL UNIQUE,
            payload JSONB NOT NULL,
            run_at TIMESTAMP WITH TIME ZONE NOT NULL,
            status VARCHAR(16) NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            base_delay_ms BIGINT NOT NULL,
            max_delay_ms BIGINT NOT NULL,
            recurrence JSONB NULL,
            locked_until TIMESTAMP WITH TIME ZONE NULL,
            last_error TEXT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            finished_at TIMESTAMP WITH TIME ZONE NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes, one statement each so they run over the extended protocol
    for statement in INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Database schema initialized successfully.");
    Ok(())
}

const INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_bookings_active_slot ON bookings(slot_id) WHERE status <> 'cancelled'",
    "CREATE INDEX IF NOT EXISTS idx_generated_slots_counselor_start ON generated_slots(counselor_id, start_time)",
    "CREATE INDEX IF NOT EXISTS idx_generated_slots_end_time ON generated_slots(end_time)",
    "CREATE INDEX IF NOT EXISTS idx_bookings_client_id ON bookings(client_id)",
    "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks(status, run_at)",
    "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_lease ON scheduled_tasks(status, locked_until)",
];
