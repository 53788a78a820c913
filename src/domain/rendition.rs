//! Display-ready outcome of a processing request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::activation::{merge_logs, WorkerActivationLog};

/// What the UI shows for one requested rendition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RenditionRecord {
    /// Produced; `url` is a presigned read reference
    Created {
        name: Option<String>,
        fmt: Option<String>,
        url: String,
    },

    #[serde(rename_all = "camelCase")]
    Failed {
        name: Option<String>,
        fmt: Option<String>,
        error_reason: Option<String>,
        error_message: Option<String>,
    },
}

impl RenditionRecord {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Created { name, .. } | Self::Failed { name, .. } => name.as_deref(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Final result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub session_id: Uuid,
    pub request_id: String,
    pub activation_id: String,

    /// One record per received event, in request order
    pub renditions: Vec<RenditionRecord>,

    /// Worker logs in discovery order; empty when retrieval failed
    pub logs: Vec<WorkerActivationLog>,
}

impl ProcessingResult {
    /// Merged log display string
    pub fn log_text(&self) -> String {
        merge_logs(&self.logs)
    }
}
