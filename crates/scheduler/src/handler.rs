use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use counselhub_core::models::task::{ScheduledTask, TaskType};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// How a failed task should be treated by the worker
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; the task is retried with backoff
    #[error("Retryable task failure: {0}")]
    Retryable(String),

    /// The task can never succeed; it is parked as failed immediately
    #[error("Permanent task failure: {0}")]
    Permanent(String),
}

impl TaskError {
    pub fn retryable(error: impl fmt::Display) -> Self {
        Self::Retryable(error.to_string())
    }

    pub fn permanent(error: impl fmt::Display) -> Self {
        Self::Permanent(error.to_string())
    }
}

/// Executes one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &ScheduledTask) -> Result<(), TaskError>;
}

/// Decodes a task payload; a malformed payload is never going to parse on retry
pub fn decode_payload<T: DeserializeOwned>(task: &ScheduledTask) -> Result<T, TaskError> {
    serde_json::from_value(task.payload.clone()).map_err(|e| {
        TaskError::Permanent(format!("malformed {} payload: {}", task.task_type, e))
    })
}

/// Task type to handler routing table
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `task_type`, replacing any previous one
    pub fn register(&mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(task_type, handler);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|task_type| task_type.as_str());
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
