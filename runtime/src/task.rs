//! Background dispatch of lifecycle operations.
//!
//! Every request is acknowledged with a task id right away; the operation
//! runs as its own tokio task and its outcome goes to the [`TaskReporter`].

use std::future::Future;
use std::sync::Arc;

use a3s_pod_core::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Receives the outcome of dispatched tasks.
#[async_trait]
pub trait TaskReporter: Send + Sync {
    async fn complete(&self, task_id: &str, result: serde_json::Value);

    async fn fail(&self, task_id: &str, reason: &str);
}

/// Immediate answer to a dispatched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAck {
    pub task_id: String,
    pub action: String,
    pub accepted_at: chrono::DateTime<chrono::Utc>,
}

/// A running task: the acknowledgment plus a handle to await completion.
pub struct Dispatched {
    pub ack: TaskAck,
    pub handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct TaskDispatcher {
    reporter: Arc<dyn TaskReporter>,
}

impl TaskDispatcher {
    pub fn new(reporter: Arc<dyn TaskReporter>) -> Self {
        Self { reporter }
    }

    /// Spawn `fut` and report its result under a fresh task id.
    pub fn dispatch<F, T>(&self, action: &str, fut: F) -> Dispatched
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let task_id = uuid::Uuid::new_v4().to_string();
        let ack = TaskAck {
            task_id: task_id.clone(),
            action: action.to_string(),
            accepted_at: chrono::Utc::now(),
        };

        let reporter = self.reporter.clone();
        let action = action.to_string();
        let handle = tokio::spawn(async move {
            tracing::debug!(task_id = %task_id, action = %action, "Task started");
            match fut.await {
                Ok(value) => match serde_json::to_value(value) {
                    Ok(result) => {
                        tracing::info!(task_id = %task_id, action = %action, "Task completed");
                        reporter.complete(&task_id, result).await;
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, action = %action, error = %e, "Task result not serializable");
                        reporter
                            .fail(&task_id, &format!("failed to serialize result: {}", e))
                            .await;
                    }
                },
                Err(e) => {
                    tracing::warn!(task_id = %task_id, action = %action, error = %e, "Task failed");
                    reporter.fail(&task_id, &e.to_string()).await;
                }
            }
        });

        Dispatched { ack, handle }
    }
}
