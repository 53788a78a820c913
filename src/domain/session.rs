//! Per-invocation session record.
//!
//! A session is created for every orchestrator invocation. Its id scopes the
//! storage paths of that invocation, and it records the state machine
//! position, the compute identifiers, and the single surfaced error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::DevToolError;

/// State of one processing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Presigning source and targets
    Staging,

    /// Job handed to the compute service
    Submitted,

    /// Waiting on the event journal
    AwaitingEvents,

    /// Committing uploads and building rendition records
    Reconciling,

    /// Collecting worker logs
    Logging,

    /// Finished with a result
    Done,

    /// Abandoned by the user
    Aborted,

    /// Stopped by a fatal error
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Failed)
    }
}

/// State carried through one orchestrator invocation
#[derive(Debug, Clone)]
pub struct ProcessingSession {
    /// Fresh id; part of every storage path of this invocation
    pub id: Uuid,

    /// Current state
    pub state: SessionState,

    /// Id used to poll for completion events
    pub request_id: Option<String>,

    /// Top-level activation id used to fetch logs
    pub activation_id: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    error: Option<DevToolError>,
    cancel: CancellationToken,
}

impl Default for ProcessingSession {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl ProcessingSession {
    /// Start a session observing the given abort token
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Staging,
            request_id: None,
            activation_id: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            cancel,
        }
    }

    /// Token that aborts this session
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once an abort has been signaled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Move to a new state. Terminal states are sticky.
    pub fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            debug!(session_id = %self.id, from = ?self.state, to = ?next, "Ignoring transition out of terminal state");
            return;
        }
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Record a fatal error and return the one that is surfaced.
    ///
    /// The first recorded error wins; later ones are dropped.
    pub fn fail(&mut self, error: DevToolError) -> DevToolError {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.transition(SessionState::Failed);
        self.error.clone().unwrap_or(DevToolError::Aborted)
    }

    /// Mark the session aborted
    pub fn abort(&mut self) -> DevToolError {
        self.transition(SessionState::Aborted);
        DevToolError::Aborted
    }

    /// The error surfaced to the user, if any
    pub fn surfaced_error(&self) -> Option<&DevToolError> {
        self.error.as_ref()
    }
}
