use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use counselhub_core::models::task::{NewTask, RetentionPolicy, ScheduledTask, TaskSettlement};
use mockall::mock;
use uuid::Uuid;

use crate::repositories::TaskStore;

// Task store double for exercising scheduler and worker failure paths
mock! {
    pub TaskStore {}

    #[async_trait]
    impl TaskStore for TaskStore {
        async fn insert_task(&self, task: &NewTask, now: DateTime<Utc>) -> eyre::Result<bool>;

        async fn upsert_recurring(&self, task: &NewTask, now: DateTime<Utc>) -> eyre::Result<bool>;

        async fn cancel_task(&self, idempotency_key: &str, now: DateTime<Utc>) -> eyre::Result<bool>;

        async fn get_task(&self, idempotency_key: &str) -> eyre::Result<Option<ScheduledTask>>;

        async fn claim_due(
            &self,
            now: DateTime<Utc>,
            limit: u32,
            lease: Duration,
        ) -> eyre::Result<Vec<ScheduledTask>>;

        async fn settle_task(
            &self,
            task_id: Uuid,
            attempt: u32,
            settlement: TaskSettlement,
            error: Option<String>,
            now: DateTime<Utc>,
        ) -> eyre::Result<()>;

        async fn requeue_stalled(&self, now: DateTime<Utc>) -> eyre::Result<u64>;

        async fn prune_finished(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> eyre::Result<u64>;
    }
}
