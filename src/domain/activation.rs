//! Worker activation logs.

use serde::{Deserialize, Serialize};

/// Logs of one worker activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerActivationLog {
    pub activation_id: String,
    pub logs: String,
}

impl WorkerActivationLog {
    pub fn new(activation_id: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            activation_id: activation_id.into(),
            logs: logs.into(),
        }
    }
}

/// Merge activation logs into one display string, in the given order.
pub fn merge_logs(logs: &[WorkerActivationLog]) -> String {
    logs.iter()
        .map(|log| {
            format!(
                ">>>>>>>>>>> Start of Activation Id: {id}\n{logs}\n>>>>>>>>>>> End of Activation Id: {id}\n",
                id = log.activation_id,
                logs = log.logs
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
