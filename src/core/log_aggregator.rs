//! Worker log collection for a completed job.
//!
//! A job either fans out to independently deployed workers, whose activation
//! ids only appear on the completion events, or runs first-party workers
//! whose ids are listed in the top-level activation's result.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::adapters::ActivationLogSource;
use crate::domain::{CompletionEvent, WorkerActivationLog};
use crate::error::DevToolError;

/// Collects worker logs through an activation log source
#[derive(Clone)]
pub struct LogAggregator {
    source: Arc<dyn ActivationLogSource>,
}

impl LogAggregator {
    pub fn new(source: Arc<dyn ActivationLogSource>) -> Self {
        Self { source }
    }

    /// Logs for every worker activation of a job, in discovery order.
    ///
    /// Never fails: a failed fetch becomes an inline error entry for that id.
    pub async fn get_worker_logs(
        &self,
        activation_id: &str,
        events: &[CompletionEvent],
    ) -> Vec<WorkerActivationLog> {
        let downstream = downstream_activation_ids(events);

        let ids = if !downstream.is_empty() {
            debug!(count = downstream.len(), "Collecting custom worker logs");
            downstream
        } else {
            match self.source.child_activation_ids(activation_id).await {
                Ok(children) => {
                    debug!(count = children.len(), "Collecting first-party worker logs");
                    children
                }
                Err(e) => {
                    warn!(%activation_id, error = %e, "Failed to read activation result");
                    return vec![failure_entry(activation_id, &e)];
                }
            }
        };

        let fetches = ids.iter().map(|id| async move {
            match self.source.activation_logs(id).await {
                Ok(lines) => WorkerActivationLog::new(id.clone(), lines.join("\n")),
                Err(e) => {
                    warn!(activation_id = %id, error = %e, "Failed to fetch activation logs");
                    failure_entry(id, &e)
                }
            }
        });

        join_all(fetches).await
    }
}

/// Downstream activation ids across all events, deduplicated in insertion order
pub fn downstream_activation_ids(events: &[CompletionEvent]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in events.iter().flat_map(|e| e.activation_ids()) {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}

/// Synthetic log entry standing in for a failed fetch
pub fn failure_entry(activation_id: &str, error: &DevToolError) -> WorkerActivationLog {
    let (status, message) = match error {
        DevToolError::LogFetch {
            status, message, ..
        } => (
            status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string()),
            message.clone(),
        ),
        other => ("unknown status".to_string(), other.to_string()),
    };

    WorkerActivationLog::new(
        activation_id,
        format!(
            "FAILED getting activation logs for activationId: {} with {} - \n {} \n",
            activation_id, status, message
        ),
    )
}
