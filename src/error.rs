//! Error taxonomy for the submit-and-collect workflow.
//!
//! Adapters surface raw failures through these variants; the orchestrator
//! decides per step which ones are fatal and which are swallowed.

use thiserror::Error;

/// Message surfaced when the compute service rejects a job without a
/// structured reason.
pub const GENERIC_SUBMISSION_MESSAGE: &str = "Error calling processing submit";

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, DevToolError>;

/// Errors produced by the dev tool library.
///
/// Variants only carry strings so a surfaced error can be cloned into the
/// session record while also being returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DevToolError {
    /// Storage credentials are missing, incomplete, or ambiguous.
    #[error("Storage configuration error: {0}")]
    StorageConfig(String),

    /// Integration credentials for the compute service are missing or malformed.
    #[error("Credential configuration error: {0}")]
    CredentialConfig(String),

    /// Any other configuration problem (log backend, config file).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source object was expected but the name is empty.
    #[error("Invalid source file: {0:?}")]
    InvalidSource(String),

    /// A storage path cannot be turned into a URL.
    #[error("Invalid storage reference: {0:?}")]
    InvalidReference(String),

    /// The compute service rejected the job.
    #[error("{0}")]
    Submission(String),

    /// No complete event set arrived within the wait bound.
    #[error("Timed out after {waited_ms}ms waiting for events of request {request_id}")]
    ActivationTimeout { request_id: String, waited_ms: u64 },

    /// Events were requested for a request id this client never submitted.
    #[error("Unknown request id: {0}")]
    UnknownRequest(String),

    /// A list/upload/presign/commit call against the object store failed.
    #[error("Storage operation '{operation}' failed: {message}")]
    StorageOperation { operation: String, message: String },

    /// Fetching logs (or the result) of one activation failed.
    #[error("Failed to fetch logs for activation {activation_id}: {message}")]
    LogFetch {
        activation_id: String,
        status: Option<u16>,
        message: String,
    },

    /// Transport-level failure talking to a remote service.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The dev tool token presented by a caller did not match.
    #[error("Unauthorized")]
    Unauthorized,

    /// The run was aborted by the user.
    #[error("Processing has been aborted")]
    Aborted,
}

impl DevToolError {
    /// Builds a `StorageOperation` error.
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for the configuration family (never retried automatically).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::StorageConfig(_) | Self::CredentialConfig(_) | Self::Config(_)
        )
    }

    /// True for a user-initiated abort, which is not reported as a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<reqwest::Error> for DevToolError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_family() {
        assert!(DevToolError::StorageConfig("x".into()).is_config());
        assert!(DevToolError::CredentialConfig("x".into()).is_config());
        assert!(!DevToolError::Aborted.is_config());
        assert!(DevToolError::Aborted.is_aborted());
    }

    #[test]
    fn test_display_messages() {
        let err = DevToolError::ActivationTimeout {
            request_id: "r1".into(),
            waited_ms: 500,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 500ms waiting for events of request r1"
        );
        assert_eq!(
            DevToolError::Submission(GENERIC_SUBMISSION_MESSAGE.into()).to_string(),
            "Error calling processing submit"
        );
    }
}
