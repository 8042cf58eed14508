//! # CounselHub Scheduler
//!
//! Durable delayed tasks. Request paths enqueue through [`Scheduler`];
//! `counselhub-worker` processes drain the queue through a [`WorkerPool`]
//! that routes each claimed task to the [`TaskHandler`] registered for its
//! type.
//!
//! Delivery is at least once. Handlers must tolerate running twice for the
//! same idempotency key.

pub mod backoff;
pub mod config;
pub mod handler;
pub mod scheduler;
pub mod worker;

pub use backoff::ExponentialBackoff;
pub use config::WorkerConfig;
pub use handler::{HandlerRegistry, TaskError, TaskHandler};
pub use scheduler::Scheduler;
pub use worker::{TickReport, WorkerPool};
