//! Adapter interfaces for external systems.
//!
//! Adapters provide a uniform interface over the services the orchestrator
//! depends on: the object store holding sources and renditions, the remote
//! compute service, and the job-execution backend that keeps worker logs.

pub mod asset_compute;
pub mod azure;
pub mod blob;
pub mod credentials;
pub mod journal;
pub mod openwhisk;
pub mod s3;
pub mod storage;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    CompletionEvent, PresignedArtifact, PresignedSource, PresignedTarget, SubmitResponse,
};
use crate::error::{DevToolError, Result};

pub use asset_compute::AssetComputeClient;
pub use azure::AzureBlobStore;
pub use credentials::{resolve_integration, IntegrationCredential};
pub use openwhisk::OpenWhiskLogs;
pub use s3::S3Store;
pub use storage::connect_storage;

/// One object in the storage container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Full path of the object
    pub name: String,

    /// Size in bytes (if reported)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Uniform operations over a path-addressed blob container
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// List every object in the container (empty container yields empty vec)
    async fn list_objects(&self) -> Result<Vec<ObjectEntry>>;

    /// Store a local file at `remote_path`, overwriting any existing object
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Time-limited readable URL for `path`
    async fn presign_get(&self, path: &str, ttl: Duration) -> Result<String>;

    /// Time-limited writable target for `path`.
    ///
    /// `estimated_size` is an over-estimate used to size multi-part targets,
    /// not a limit.
    async fn presign_put(
        &self,
        path: &str,
        ttl: Duration,
        estimated_size: u64,
        part_count: u32,
    ) -> Result<PresignedTarget>;

    /// Whether writes to presigned targets must be finalized by `commit_put`
    fn supports_commit(&self) -> bool {
        false
    }

    /// Finalize a multi-part upload written through a presigned target
    async fn commit_put(&self, path: &str) -> Result<()> {
        Err(DevToolError::storage(
            "commit_put",
            format!("{} completes uploads on write; {} needs no commit", self.name(), path),
        ))
    }

    /// Cheap connectivity/credential check
    async fn validate(&self) -> Result<()>;
}

/// Remote asset-processing service
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Human-readable client name
    fn name(&self) -> &str;

    /// Submit a job. Completion is reported through the event journal.
    async fn process(
        &self,
        source: Option<&PresignedSource>,
        renditions: &[PresignedArtifact],
        user_data: Option<&Value>,
    ) -> Result<SubmitResponse>;

    /// Wait until events for every rendition of `request_id` have arrived.
    ///
    /// Fails with `ActivationTimeout` after `timeout`; partial events are
    /// discarded.
    async fn wait_activation(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Vec<CompletionEvent>>;

    /// Non-blocking readiness check of the event journal
    async fn is_event_journal_ready(&self) -> Result<bool>;

    /// URL of the registered event journal, if any
    fn journal_url(&self) -> Option<&str> {
        None
    }
}

/// Job-execution backend holding activation results and logs
#[async_trait]
pub trait ActivationLogSource: Send + Sync {
    /// Log lines of one activation
    async fn activation_logs(&self, activation_id: &str) -> Result<Vec<String>>;

    /// Child activation ids listed in an activation's result
    async fn child_activation_ids(&self, activation_id: &str) -> Result<Vec<String>>;
}
