//! In-memory fakes for the storage, compute, and activation log adapters.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use asset_devtool::adapters::{ActivationLogSource, ComputeClient, ObjectEntry, ObjectStore};
use asset_devtool::domain::{
    CompletionEvent, PresignedArtifact, PresignedSource, PresignedTarget, SubmitResponse,
};
use asset_devtool::error::{DevToolError, Result};
use asset_devtool::service::BackendFactory;

// Object store

#[derive(Default)]
pub struct FakeStore {
    pub commit: bool,
    pub fail_commits: bool,
    /// Presigning a write target fails for paths containing this text
    pub fail_put_containing: Option<String>,
    pub objects: Mutex<Vec<ObjectEntry>>,
    pub put_paths: Mutex<Vec<String>>,
    pub committed: Mutex<Vec<String>>,
    pub commit_attempts: AtomicUsize,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeStore {
    pub fn azure_like() -> Self {
        Self {
            commit: true,
            ..Default::default()
        }
    }

    pub fn with_objects(names: &[&str]) -> Self {
        Self {
            objects: Mutex::new(
                names
                    .iter()
                    .map(|name| ObjectEntry {
                        name: name.to_string(),
                        size: None,
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }

    pub fn put_paths(&self) -> Vec<String> {
        self.put_paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_objects(&self) -> Result<Vec<ObjectEntry>> {
        Ok(self.objects.lock().unwrap().clone())
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let bytes = std::fs::read(local_path)
            .map_err(|e| DevToolError::storage("upload", e.to_string()))?;
        self.uploads
            .lock()
            .unwrap()
            .push((remote_path.to_string(), bytes));
        self.objects.lock().unwrap().push(ObjectEntry {
            name: remote_path.to_string(),
            size: None,
        });
        Ok(())
    }

    async fn presign_get(&self, path: &str, ttl: Duration) -> Result<String> {
        if path.is_empty() {
            return Err(DevToolError::InvalidReference(path.to_string()));
        }
        Ok(format!("https://store.test/{}?op=get&ttl={}", path, ttl.as_secs()))
    }

    async fn presign_put(
        &self,
        path: &str,
        _ttl: Duration,
        _estimated_size: u64,
        _part_count: u32,
    ) -> Result<PresignedTarget> {
        if let Some(ref needle) = self.fail_put_containing {
            if path.contains(needle.as_str()) {
                return Err(DevToolError::storage("presign_put", "denied"));
            }
        }
        self.put_paths.lock().unwrap().push(path.to_string());
        Ok(PresignedTarget::Single(format!(
            "https://store.test/{}?op=put",
            path
        )))
    }

    fn supports_commit(&self) -> bool {
        self.commit
    }

    async fn commit_put(&self, path: &str) -> Result<()> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits {
            return Err(DevToolError::storage("commit_put", "no blocks"));
        }
        self.committed.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn validate(&self) -> Result<()> {
        Ok(())
    }
}

// Compute client

/// How the fake service answers for one rendition
#[derive(Debug, Clone)]
pub enum Outcome {
    Created,
    Failed { reason: String, message: String },
    CreatedWithActivations(Vec<String>),
}

pub struct FakeCompute {
    pub response: std::result::Result<SubmitResponse, DevToolError>,
    pub outcomes: Vec<Outcome>,
    /// Deliver events in reverse request order
    pub reverse: bool,
    /// Wait returns only once this token is cancelled
    pub gate: Option<CancellationToken>,
    pub wait_error: Option<DevToolError>,
    pub submitted: Mutex<Vec<(Option<PresignedSource>, Vec<PresignedArtifact>)>>,
    pub wait_calls: AtomicUsize,
}

impl FakeCompute {
    pub fn new(request_id: &str, activation_id: &str, outcomes: Vec<Outcome>) -> Self {
        Self {
            response: Ok(SubmitResponse {
                request_id: request_id.to_string(),
                activation_id: activation_id.to_string(),
            }),
            outcomes,
            reverse: false,
            gate: None,
            wait_error: None,
            submitted: Mutex::new(Vec::new()),
            wait_calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting(error: DevToolError) -> Self {
        Self {
            response: Err(error),
            ..Self::new("", "", Vec::new())
        }
    }

    pub fn submitted_artifacts(&self) -> Vec<PresignedArtifact> {
        self.submitted
            .lock()
            .unwrap()
            .last()
            .map(|(_, artifacts)| artifacts.clone())
            .unwrap_or_default()
    }

    fn events_for(&self, request_id: &str) -> Vec<CompletionEvent> {
        let artifacts = self.submitted_artifacts();
        let mut events: Vec<CompletionEvent> = artifacts
            .iter()
            .zip(self.outcomes.iter())
            .map(|(artifact, outcome)| {
                let rendition = json!({
                    "name": artifact.spec.name,
                    "fmt": artifact.spec.fmt,
                    "userData": {"path": artifact.target_path()},
                });
                let value: Value = match outcome {
                    Outcome::Created => json!({
                        "type": "rendition_created",
                        "requestId": request_id,
                        "rendition": rendition,
                    }),
                    Outcome::CreatedWithActivations(ids) => json!({
                        "type": "rendition_created",
                        "requestId": request_id,
                        "rendition": rendition,
                        "activationIds": ids,
                    }),
                    Outcome::Failed { reason, message } => json!({
                        "type": "rendition_failed",
                        "requestId": request_id,
                        "rendition": rendition,
                        "errorReason": reason,
                        "errorMessage": message,
                    }),
                };
                serde_json::from_value(value).unwrap()
            })
            .collect();
        if self.reverse {
            events.reverse();
        }
        events
    }
}

#[async_trait]
impl ComputeClient for FakeCompute {
    fn name(&self) -> &str {
        "fake-compute"
    }

    async fn process(
        &self,
        source: Option<&PresignedSource>,
        renditions: &[PresignedArtifact],
        _user_data: Option<&Value>,
    ) -> Result<SubmitResponse> {
        self.submitted
            .lock()
            .unwrap()
            .push((source.cloned(), renditions.to_vec()));
        self.response.clone()
    }

    async fn wait_activation(
        &self,
        request_id: &str,
        _timeout: Duration,
    ) -> Result<Vec<CompletionEvent>> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.gate {
            gate.cancelled().await;
        }
        if let Some(ref error) = self.wait_error {
            return Err(error.clone());
        }
        Ok(self.events_for(request_id))
    }

    async fn is_event_journal_ready(&self) -> Result<bool> {
        Ok(true)
    }

    fn journal_url(&self) -> Option<&str> {
        Some("https://journal.test/events")
    }
}

// Activation logs

#[derive(Default)]
pub struct FakeLogs {
    pub logs: HashMap<String, Vec<String>>,
    pub children: HashMap<String, Vec<String>>,
    pub fetched: Mutex<Vec<String>>,
    pub result_reads: Mutex<Vec<String>>,
}

impl FakeLogs {
    pub fn with_logs(entries: &[(&str, &[&str])]) -> Self {
        Self {
            logs: entries
                .iter()
                .map(|(id, lines)| {
                    (
                        id.to_string(),
                        lines.iter().map(|l| l.to_string()).collect(),
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn children_of(mut self, parent: &str, ids: &[&str]) -> Self {
        self.children.insert(
            parent.to_string(),
            ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        let mut fetched = self.fetched.lock().unwrap().clone();
        fetched.sort();
        fetched
    }
}

#[async_trait]
impl ActivationLogSource for FakeLogs {
    async fn activation_logs(&self, activation_id: &str) -> Result<Vec<String>> {
        self.fetched.lock().unwrap().push(activation_id.to_string());
        self.logs
            .get(activation_id)
            .cloned()
            .ok_or_else(|| DevToolError::LogFetch {
                activation_id: activation_id.to_string(),
                status: Some(404),
                message: "The requested resource does not exist.".to_string(),
            })
    }

    async fn child_activation_ids(&self, activation_id: &str) -> Result<Vec<String>> {
        self.result_reads
            .lock()
            .unwrap()
            .push(activation_id.to_string());
        self.children
            .get(activation_id)
            .cloned()
            .ok_or_else(|| DevToolError::LogFetch {
                activation_id: activation_id.to_string(),
                status: Some(502),
                message: "result unavailable".to_string(),
            })
    }
}

// Backend factory

pub struct FakeBackends {
    pub store: Arc<FakeStore>,
    pub compute: Arc<FakeCompute>,
    pub logs: Option<Arc<FakeLogs>>,
    pub storage_builds: AtomicUsize,
    pub compute_builds: AtomicUsize,
}

impl FakeBackends {
    pub fn new(store: FakeStore, compute: FakeCompute, logs: Option<FakeLogs>) -> Self {
        Self {
            store: Arc::new(store),
            compute: Arc::new(compute),
            logs: logs.map(Arc::new),
            storage_builds: AtomicUsize::new(0),
            compute_builds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BackendFactory for FakeBackends {
    async fn storage(&self) -> Result<Arc<dyn ObjectStore>> {
        self.storage_builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(self.store.clone())
    }

    async fn compute(&self) -> Result<Arc<dyn ComputeClient>> {
        self.compute_builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.compute.clone())
    }

    fn activation_logs(&self) -> Result<Arc<dyn ActivationLogSource>> {
        match self.logs {
            Some(ref logs) => Ok(logs.clone()),
            None => Err(DevToolError::Config("no runtime credentials".to_string())),
        }
    }
}
