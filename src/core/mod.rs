//! Core orchestration logic.
//!
//! This module contains:
//! - Orchestrator: the per-request state machine
//! - LogAggregator: worker log collection for a finished job
//! - CachedHandle: expiring single-flight cache for client handles

pub mod handle;
pub mod log_aggregator;
pub mod orchestrator;

// Re-export commonly used types
pub use handle::CachedHandle;
pub use log_aggregator::{downstream_activation_ids, failure_entry, LogAggregator};
pub use orchestrator::{Orchestrator, UNTRACEABLE_REASON};
