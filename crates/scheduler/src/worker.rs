//! # Worker Pool
//!
//! Drains the task table. Each poll:
//!
//! 1. Re-queues running tasks whose lease expired (or parks them as failed
//!    when their attempts are exhausted)
//! 2. Claims as many due tasks as there are free permits, leasing each for
//!    `lock_timeout`
//! 3. Runs each claimed task on its own tokio task while holding a permit
//! 4. Settles the outcome: completed, re-armed (recurring), retried with
//!    backoff, or failed
//!
//! Retention runs on its own, slower cadence.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use counselhub_core::models::task::{ScheduledTask, TaskSettlement};
use counselhub_core::{Clock, ServiceCalendar};
use counselhub_db::TaskStore;
use eyre::Result;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::config::WorkerConfig;
use crate::handler::{HandlerRegistry, TaskError};

/// What one run of a task ended as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Rearmed,
    Retried,
    Failed,
}

/// Counters for one [`WorkerPool::run_once`] pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub requeued: u64,
    pub claimed: usize,
    pub completed: usize,
    pub rearmed: usize,
    pub retried: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Rearmed => self.rearmed += 1,
            TaskOutcome::Retried => self.retried += 1,
            TaskOutcome::Failed => self.failed += 1,
        }
    }
}

/// Everything a spawned task run needs, cheap to clone
#[derive(Clone)]
struct Executor {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    calendar: ServiceCalendar,
}

impl Executor {
    async fn execute(&self, task: ScheduledTask) -> Result<TaskOutcome> {
        debug!(key = %task.idempotency_key, attempt = task.attempts, "running task");

        let result = match self.registry.get(task.task_type) {
            Some(handler) => handler.handle(&task).await,
            None => Err(TaskError::Permanent(format!(
                "no handler registered for {}",
                task.task_type
            ))),
        };

        let now = self.clock.now();
        let (settlement, outcome, last_error) = match result {
            Ok(()) => match task.recurrence {
                Some(recurrence) => (
                    TaskSettlement::Rearmed {
                        next_run_at: recurrence.next_after(now, &self.calendar),
                    },
                    TaskOutcome::Rearmed,
                    None,
                ),
                None => (TaskSettlement::Completed, TaskOutcome::Completed, None),
            },
            Err(TaskError::Retryable(message)) if !task.attempts_exhausted() => {
                let delay = retry_delay(&task);
                warn!(
                    key = %task.idempotency_key,
                    attempt = task.attempts,
                    retry_in_ms = delay.num_milliseconds(),
                    "task failed, will retry: {}",
                    message
                );
                (
                    TaskSettlement::Retry { next_run_at: now + delay },
                    TaskOutcome::Retried,
                    Some(message),
                )
            }
            Err(err) => {
                error!(key = %task.idempotency_key, attempt = task.attempts, "task failed: {}", err);
                // A recurring task that gives up still comes back on its next occurrence
                match task.recurrence {
                    Some(recurrence) => (
                        TaskSettlement::Rearmed {
                            next_run_at: recurrence.next_after(now, &self.calendar),
                        },
                        TaskOutcome::Failed,
                        Some(err.to_string()),
                    ),
                    None => (TaskSettlement::Failed, TaskOutcome::Failed, Some(err.to_string())),
                }
            }
        };

        self.store
            .settle_task(task.id, task.attempts, settlement, last_error, now)
            .await?;
        Ok(outcome)
    }
}

fn retry_delay(task: &ScheduledTask) -> Duration {
    let delay = ExponentialBackoff::from_policy(&task.retry).jittered(task.attempts, &mut rand::thread_rng());
    Duration::from_std(delay).unwrap_or_else(|_| Duration::milliseconds(task.retry.max_delay_ms as i64))
}

pub struct WorkerPool {
    executor: Executor,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: HandlerRegistry,
        clock: Arc<dyn Clock>,
        calendar: ServiceCalendar,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            executor: Executor {
                store,
                registry: Arc::new(registry),
                clock,
                calendar,
            },
            config,
            semaphore,
        }
    }

    /// One full poll that waits for every claimed task to settle
    pub async fn run_once(&self) -> Result<TickReport> {
        let mut report = TickReport {
            requeued: self.requeue_stalled().await?,
            ..TickReport::default()
        };

        let mut in_flight = JoinSet::new();
        report.claimed = self.dispatch(&mut in_flight).await?;
        while let Some(joined) = in_flight.join_next().await {
            if let Some(outcome) = settled(joined) {
                report.record(outcome);
            }
        }
        Ok(report)
    }

    /// Polls until `shutdown` flips to `true`, then drains in-flight tasks
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size,
            "worker pool started"
        );

        let mut in_flight = JoinSet::new();
        let mut last_prune: Option<DateTime<Utc>> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.requeue_stalled().await {
                error!("failed to requeue stalled tasks: {:?}", e);
            }
            if let Err(e) = self.dispatch(&mut in_flight).await {
                error!("failed to claim due tasks: {:?}", e);
            }
            while let Some(joined) = in_flight.try_join_next() {
                settled(joined);
            }

            let now = self.executor.clock.now();
            if last_prune.is_none_or(|at| now - at >= self.config.prune_interval) {
                match self.prune().await {
                    Ok(removed) if removed > 0 => info!(removed, "pruned finished tasks"),
                    Ok(_) => {}
                    Err(e) => error!("failed to prune finished tasks: {:?}", e),
                }
                last_prune = Some(now);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "shutdown requested, draining tasks");
        let drain = async {
            while let Some(joined) = in_flight.join_next().await {
                settled(joined);
            }
        };
        if tokio::time::timeout(self.config.poll_interval * 10, drain).await.is_err() {
            warn!("drain timed out; unfinished tasks will be re-queued when their lease expires");
        }

        info!("worker pool stopped");
        Ok(())
    }

    pub async fn requeue_stalled(&self) -> Result<u64> {
        let requeued = self.executor.store.requeue_stalled(self.executor.clock.now()).await?;
        if requeued > 0 {
            warn!(requeued, "re-queued tasks with expired leases");
        }
        Ok(requeued)
    }

    pub async fn prune(&self) -> Result<u64> {
        self.executor
            .store
            .prune_finished(&self.config.retention, self.executor.clock.now())
            .await
    }

    /// Claims up to the free capacity and spawns each task with its permit
    async fn dispatch(&self, in_flight: &mut JoinSet<Result<TaskOutcome>>) -> Result<usize> {
        let free = self
            .semaphore
            .available_permits()
            .min(self.config.batch_size as usize);
        if free == 0 {
            return Ok(0);
        }

        let tasks = self
            .executor
            .store
            .claim_due(self.executor.clock.now(), free as u32, self.config.lock_timeout)
            .await?;
        let claimed = tasks.len();

        for task in tasks {
            let permit = self.semaphore.clone().acquire_owned().await?;
            let executor = self.executor.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                executor.execute(task).await
            });
        }
        Ok(claimed)
    }
}

fn settled(joined: std::result::Result<Result<TaskOutcome>, tokio::task::JoinError>) -> Option<TaskOutcome> {
    match joined {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            error!("failed to settle task: {:?}", e);
            None
        }
        Err(e) => {
            error!("task panicked: {}", e);
            None
        }
    }
}
