//! # Worker Configuration
//!
//! Loaded from the environment:
//!
//! - `WORKER_CONCURRENCY`: handlers running at once (default: 4)
//! - `WORKER_POLL_INTERVAL_MS`: pause between polls of the task table (default: 1000)
//! - `WORKER_LOCK_TIMEOUT_SECONDS`: lease on a claimed task (default: 300)
//! - `WORKER_BATCH_SIZE`: most tasks claimed per poll (default: 16)
//! - `TASK_RETENTION_HOURS`: age after which finished records are pruned (default: 24)
//! - `TASK_FAILED_KEEP`: number of failed records kept for inspection (default: 100)

use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use counselhub_core::models::task::RetentionPolicy;
use eyre::{Result, WrapErr};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: StdDuration,
    pub lock_timeout: Duration,
    pub batch_size: u32,
    pub retention: RetentionPolicy,
    /// How often retention runs
    pub prune_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: StdDuration::from_millis(1_000),
            lock_timeout: Duration::seconds(300),
            batch_size: 16,
            retention: RetentionPolicy::default(),
            prune_interval: Duration::hours(1),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let concurrency: usize = parse_var("WORKER_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            eyre::bail!("WORKER_CONCURRENCY must be at least 1");
        }

        let poll_ms: u64 = parse_var("WORKER_POLL_INTERVAL_MS", 1_000)?;
        let lock_secs: i64 = parse_var("WORKER_LOCK_TIMEOUT_SECONDS", 300)?;
        let batch_size: u32 = parse_var("WORKER_BATCH_SIZE", defaults.batch_size)?;
        let retention_hours: i64 = parse_var("TASK_RETENTION_HOURS", 24)?;
        let keep_failed: u32 = parse_var("TASK_FAILED_KEEP", defaults.retention.keep_failed)?;

        Ok(Self {
            concurrency,
            poll_interval: StdDuration::from_millis(poll_ms),
            lock_timeout: Duration::seconds(lock_secs.max(1)),
            batch_size: batch_size.max(1),
            retention: RetentionPolicy {
                finished_ttl: Duration::hours(retention_hours.max(0)),
                keep_failed,
            },
            prune_interval: defaults.prune_interval,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .wrap_err_with(|| format!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}
