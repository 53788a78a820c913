//! Domain types for the dev tool.
//!
//! This module contains the core data structures:
//! - Request: What the user asked for and its presigned form
//! - Events: Completion notifications from the compute service
//! - Rendition: Display-ready outcome of one artifact
//! - Session: Per-invocation state machine record
//! - Activation: Worker execution logs

pub mod activation;
pub mod events;
pub mod rendition;
pub mod request;
pub mod session;

// Re-export commonly used types
pub use activation::{merge_logs, WorkerActivationLog};
pub use events::{CompletionEvent, EventRendition, RenditionCreated, RenditionFailed};
pub use rendition::{ProcessingResult, RenditionRecord};
pub use request::{
    rendition_path, ArtifactSpec, PresignedArtifact, PresignedSource, PresignedTarget,
    ProcessingRequest, RenditionUserData, SubmitResponse, DEFAULT_RENDITION_NAME,
    SOURCELESS_PATH_SEGMENT,
};
pub use session::{ProcessingSession, SessionState};
