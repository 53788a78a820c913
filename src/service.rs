//! Dev tool facade.
//!
//! Owns the cached storage and compute handles and exposes the operations a
//! boundary layer (CLI, HTTP routes) needs. At most one full run is active:
//! starting a run aborts the previous one.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{
    connect_storage, ActivationLogSource, AssetComputeClient, ComputeClient, ObjectStore,
    OpenWhiskLogs,
};
use crate::config::ResolvedConfig;
use crate::core::{failure_entry, CachedHandle, LogAggregator, Orchestrator};
use crate::domain::{
    ArtifactSpec, CompletionEvent, ProcessingRequest, ProcessingResult, ProcessingSession,
    SubmitResponse, WorkerActivationLog,
};
use crate::error::{DevToolError, Result};

/// Builds the external clients the facade works with
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn storage(&self) -> Result<Arc<dyn ObjectStore>>;
    async fn compute(&self) -> Result<Arc<dyn ComputeClient>>;
    fn activation_logs(&self) -> Result<Arc<dyn ActivationLogSource>>;
}

/// Clients configured from the environment
pub struct EnvBackends {
    config: ResolvedConfig,
}

impl EnvBackends {
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendFactory for EnvBackends {
    async fn storage(&self) -> Result<Arc<dyn ObjectStore>> {
        connect_storage(&self.config).await
    }

    async fn compute(&self) -> Result<Arc<dyn ComputeClient>> {
        let client = AssetComputeClient::connect(&self.config).await?;
        Ok(Arc::new(client))
    }

    fn activation_logs(&self) -> Result<Arc<dyn ActivationLogSource>> {
        let credentials = self.config.runtime_credentials()?;
        Ok(Arc::new(OpenWhiskLogs::new(&credentials)))
    }
}

/// Entry point for every dev tool operation
pub struct DevTool {
    config: ResolvedConfig,
    backends: Arc<dyn BackendFactory>,
    storage: CachedHandle<dyn ObjectStore>,
    compute: CachedHandle<dyn ComputeClient>,
    current_run: Mutex<Option<(Uuid, CancellationToken)>>,
    dev_token: String,
}

impl DevTool {
    /// Facade backed by environment-configured clients
    pub fn new(config: ResolvedConfig) -> Self {
        let backends = Arc::new(EnvBackends::new(config.clone()));
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: ResolvedConfig, backends: Arc<dyn BackendFactory>) -> Self {
        let ttl = config.processing.handle_ttl;
        Self {
            config,
            backends,
            storage: CachedHandle::new("storage", ttl),
            compute: CachedHandle::new("compute", ttl),
            current_run: Mutex::new(None),
            dev_token: generate_dev_token(),
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    async fn storage(&self) -> Result<Arc<dyn ObjectStore>> {
        self.storage.get_or_init(|| self.backends.storage()).await
    }

    async fn compute(&self) -> Result<Arc<dyn ComputeClient>> {
        self.compute.get_or_init(|| self.backends.compute()).await
    }

    async fn orchestrator(&self) -> Result<Orchestrator> {
        let storage = self.storage().await?;
        let compute = self.compute().await?;
        let orchestrator = Orchestrator::new(storage, compute, self.config.processing.clone());

        Ok(match self.backends.activation_logs() {
            Ok(source) => orchestrator.with_log_aggregator(LogAggregator::new(source)),
            Err(e) => {
                warn!(error = %e, "Worker logs unavailable");
                orchestrator
            }
        })
    }

    /// Stage and submit a request without waiting for it
    pub async fn submit(
        &self,
        source: Option<String>,
        specs: Vec<ArtifactSpec>,
    ) -> Result<SubmitResponse> {
        let orchestrator = self.orchestrator().await?;
        let request = ProcessingRequest::new(source, specs);
        let session = ProcessingSession::default();

        let (source, artifacts) = orchestrator.stage(session.id, &request).await?;
        orchestrator.submit(source.as_ref(), &artifacts, None).await
    }

    /// Wait for the events of a submitted request and commit its uploads
    pub async fn await_completion(&self, request_id: &str) -> Result<Vec<CompletionEvent>> {
        let orchestrator = self.orchestrator().await?;
        let events = orchestrator.await_events(request_id).await?;
        orchestrator.commit_renditions(&events).await;
        Ok(events)
    }

    /// Worker logs of a job. Never fails; errors become inline entries.
    pub async fn fetch_logs(
        &self,
        activation_id: &str,
        events: &[CompletionEvent],
    ) -> Vec<WorkerActivationLog> {
        match self.backends.activation_logs() {
            Ok(source) => {
                LogAggregator::new(source)
                    .get_worker_logs(activation_id, events)
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Worker logs unavailable");
                vec![failure_entry(activation_id, &e)]
            }
        }
    }

    /// Run a request through the full workflow, aborting any previous run
    pub async fn run(&self, request: ProcessingRequest) -> Result<ProcessingResult> {
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.replace_current_run(Some((run_id, token.clone()))) {
            info!("Superseding previous run");
            previous.cancel();
        }

        let result = match self.orchestrator().await {
            Ok(orchestrator) => {
                let mut session = ProcessingSession::new(token);
                orchestrator.run(&mut session, &request).await
            }
            Err(e) => Err(e),
        };

        // A newer run may have taken the slot meanwhile
        if let Ok(mut current) = self.current_run.lock() {
            if matches!(current.as_ref(), Some((id, _)) if *id == run_id) {
                *current = None;
            }
        }
        result
    }

    /// Abort the active run. Returns false when nothing was running.
    pub fn abort(&self) -> bool {
        match self.replace_current_run(None) {
            Some((_, token)) => {
                token.cancel();
                info!("Processing aborted");
                true
            }
            None => false,
        }
    }

    fn replace_current_run(
        &self,
        next: Option<(Uuid, CancellationToken)>,
    ) -> Option<(Uuid, CancellationToken)> {
        match self.current_run.lock() {
            Ok(mut current) => std::mem::replace(&mut *current, next),
            Err(_) => None,
        }
    }

    /// Names of the files in the source folder
    pub async fn list_sources(&self) -> Result<Vec<String>> {
        let storage = self.storage().await?;
        let prefix = format!("{}/", self.config.processing.source_prefix);
        let names = storage
            .list_objects()
            .await?
            .into_iter()
            .filter_map(|entry| entry.name.strip_prefix(&prefix).map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect();
        Ok(names)
    }

    /// Store uploaded bytes as a source file and return the updated listing
    pub async fn upload_source(&self, bytes: &[u8], name: &str) -> Result<Vec<String>> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(DevToolError::InvalidSource(name.to_string()));
        }

        let staged = tempfile::NamedTempFile::new()
            .map_err(|e| DevToolError::storage("upload", e.to_string()))?;
        tokio::fs::write(staged.path(), bytes)
            .await
            .map_err(|e| DevToolError::storage("upload", e.to_string()))?;

        self.upload_path(staged.path(), name).await
    }

    /// Upload a local file as a source, keeping its file name
    pub async fn upload_source_file(&self, path: &Path) -> Result<Vec<String>> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DevToolError::InvalidSource(path.display().to_string()))?
            .to_string();
        self.upload_path(path, &name).await
    }

    async fn upload_path(&self, local: &Path, name: &str) -> Result<Vec<String>> {
        let storage = self.storage().await?;
        let remote = format!("{}/{}", self.config.processing.source_prefix, name);
        storage.upload(local, &remote).await?;
        info!(file = %name, "Uploaded source file");
        self.list_sources().await
    }

    /// Long-lived download link for any stored object
    pub async fn presign_download(&self, key: &str) -> Result<String> {
        let storage = self.storage().await?;
        storage
            .presign_get(key, self.config.processing.download_ttl)
            .await
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub async fn journal_url(&self) -> Result<Option<String>> {
        let compute = self.compute().await?;
        Ok(compute.journal_url().map(str::to_string))
    }

    pub async fn is_journal_ready(&self) -> Result<bool> {
        self.compute().await?.is_event_journal_ready().await
    }

    /// Web action URLs of the app in the working directory
    pub fn action_urls(&self) -> BTreeMap<String, String> {
        match (std::env::current_dir(), self.config.runtime_namespace.as_deref()) {
            (Ok(dir), Some(namespace)) => action_urls_in(&dir, namespace),
            _ => BTreeMap::new(),
        }
    }

    /// Token callers must present unless running in development mode
    pub fn dev_token(&self) -> &str {
        &self.dev_token
    }

    pub fn authorize(&self, token: Option<&str>) -> Result<()> {
        if self.config.development {
            return Ok(());
        }
        match token {
            Some(token) if token == self.dev_token => Ok(()),
            _ => Err(DevToolError::Unauthorized),
        }
    }
}

/// 64 hex characters of randomness
fn generate_dev_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    name: String,
    version: String,
}

/// Action URLs from `manifest.yml` and `package.json` in `dir`.
///
/// Outside an app (missing or malformed files) the map is empty.
pub fn action_urls_in(dir: &Path, namespace: &str) -> BTreeMap<String, String> {
    let read = || -> Option<BTreeMap<String, String>> {
        let manifest: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("manifest.yml")).ok()?).ok()?;
        let package: PackageJson =
            serde_json::from_str(&std::fs::read_to_string(dir.join("package.json")).ok()?).ok()?;

        let actions = manifest
            .get("packages")?
            .get("__APP_PACKAGE__")?
            .get("actions")?
            .as_mapping()?;

        Some(
            actions
                .keys()
                .filter_map(|key| key.as_str())
                .map(|action| {
                    (
                        action.to_string(),
                        format!(
                            "https://{}.adobeioruntime.net/api/v1/web/{}-{}/{}",
                            namespace, package.name, package.version, action
                        ),
                    )
                })
                .collect(),
        )
    };
    read().unwrap_or_default()
}
