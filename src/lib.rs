//! asset-devtool - submit-and-collect workflow for asset-processing workers
//!
//! A developer tool that stages a source file in cloud storage, submits a
//! processing request to a remote compute service, waits for per-rendition
//! completion events, reconciles the written renditions, and collects the
//! worker logs.
//!
//! # Architecture
//!
//! Every request runs through an explicit state machine:
//! - Staging presigns the source and one writable target per rendition
//! - The compute service reports completion through an event journal
//! - Successful uploads are committed where the storage backend needs it
//! - Worker logs are gathered from the job-execution backend
//!
//! # Modules
//!
//! - `adapters`: Object store (Azure, S3), compute client, activation logs
//! - `core`: Orchestrator, LogAggregator, CachedHandle
//! - `domain`: Requests, events, rendition records, sessions
//! - `service`: Facade used by the CLI and other boundary layers
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Upload a source file
//! asset-devtool upload ./photo.png
//!
//! # Process it
//! echo '{"renditions":[{"name":"out.png","fmt":"png","wid":48,"hei":48}]}' \
//!     | asset-devtool process --source photo.png
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod service;

// Re-export main types at crate root for convenience
pub use core::Orchestrator;
pub use domain::{
    ArtifactSpec, CompletionEvent, ProcessingRequest, ProcessingResult, ProcessingSession,
    RenditionRecord, SessionState, WorkerActivationLog,
};
pub use error::{DevToolError, Result};
pub use service::DevTool;
