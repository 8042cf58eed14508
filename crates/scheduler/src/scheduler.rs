//! # Scheduler
//!
//! Enqueue side of the task queue. Every task is addressed by an
//! idempotency key (`<task type>-<entity id>` for per-entity tasks), so
//! scheduling the same logical action twice stores it once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use counselhub_core::models::task::{NewTask, Recurrence, RetryPolicy, TaskType};
use counselhub_core::{Clock, CounselError, CounselResult, ServiceCalendar};
use counselhub_db::TaskStore;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    calendar: ServiceCalendar,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, calendar: ServiceCalendar) -> Self {
        Self {
            store,
            clock,
            calendar,
        }
    }

    /// Builds a one-shot task without storing it.
    ///
    /// Used when the task must be written in the same transaction as the
    /// entity that owns it.
    pub fn prepare_once(
        &self,
        task_type: TaskType,
        payload: impl Serialize,
        run_at: DateTime<Utc>,
        idempotency_key: impl Into<String>,
    ) -> CounselResult<NewTask> {
        let now = self.clock.now();
        if run_at <= now {
            return Err(CounselError::Validation(format!(
                "{} task must run in the future, got {} at {}",
                task_type,
                run_at.to_rfc3339(),
                now.to_rfc3339()
            )));
        }
        self.build(task_type, payload, run_at, idempotency_key.into(), None)
    }

    /// Builds a task that is due immediately, for outbox delivery
    pub fn prepare_now(
        &self,
        task_type: TaskType,
        payload: impl Serialize,
        idempotency_key: impl Into<String>,
    ) -> CounselResult<NewTask> {
        self.build(task_type, payload, self.clock.now(), idempotency_key.into(), None)
    }

    /// Stores a one-shot task; `false` if the key was already scheduled
    pub async fn schedule_once(
        &self,
        task_type: TaskType,
        payload: impl Serialize,
        run_at: DateTime<Utc>,
        idempotency_key: impl Into<String>,
    ) -> CounselResult<bool> {
        let task = self.prepare_once(task_type, payload, run_at, idempotency_key)?;
        let inserted = self.store.insert_task(&task, self.clock.now()).await?;
        if !inserted {
            debug!(key = %task.idempotency_key, "task already scheduled");
        }
        Ok(inserted)
    }

    /// Cancels a pending task. A task that already ran, or never existed,
    /// is reported with `false`.
    pub async fn cancel(&self, idempotency_key: &str) -> CounselResult<bool> {
        let cancelled = self.store.cancel_task(idempotency_key, self.clock.now()).await?;
        if !cancelled {
            info!(key = %idempotency_key, "no pending task to cancel");
        }
        Ok(cancelled)
    }

    /// Registers a recurring task, updating it in place when the key exists.
    ///
    /// Returns `true` when the task was newly created.
    pub async fn schedule_recurring(
        &self,
        task_type: TaskType,
        payload: impl Serialize,
        recurrence: Recurrence,
        idempotency_key: impl Into<String>,
    ) -> CounselResult<bool> {
        let now = self.clock.now();
        let run_at = recurrence.next_after(now, &self.calendar);
        let task = self.build(task_type, payload, run_at, idempotency_key.into(), Some(recurrence))?;

        let created = self.store.upsert_recurring(&task, now).await?;
        info!(
            key = %task.idempotency_key,
            next_run = %run_at.to_rfc3339(),
            created,
            "recurring task registered"
        );
        Ok(created)
    }

    fn build(
        &self,
        task_type: TaskType,
        payload: impl Serialize,
        run_at: DateTime<Utc>,
        idempotency_key: String,
        recurrence: Option<Recurrence>,
    ) -> CounselResult<NewTask> {
        let payload = serde_json::to_value(payload).map_err(|e| CounselError::Internal(Box::new(e)))?;
        Ok(NewTask {
            task_type,
            idempotency_key,
            payload,
            run_at,
            retry: RetryPolicy::default(),
            recurrence,
        })
    }
}
