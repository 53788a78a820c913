//! Submit-and-collect orchestration.
//!
//! Drives one processing request through staging, submission, the event
//! wait, storage reconciliation, and log collection. The orchestrator is the
//! single place deciding which failures end a request:
//! - presign and submit failures are fatal
//! - the event wait timing out is fatal
//! - commit failures are logged per artifact and swallowed
//! - log failures are swallowed for the whole request
//!
//! Aborts are cooperative. The session's token is checked at every state
//! boundary and raced against the event wait; a short call already in flight
//! is allowed to finish but its result is discarded. Once an abort is
//! signaled nothing but `Aborted` is surfaced.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{ComputeClient, ObjectStore};
use crate::config::ProcessingSettings;
use crate::domain::{
    rendition_path, ArtifactSpec, CompletionEvent, PresignedArtifact, PresignedSource,
    ProcessingRequest, ProcessingResult, ProcessingSession, RenditionRecord, RenditionUserData,
    SessionState, SubmitResponse, WorkerActivationLog,
};
use crate::error::{DevToolError, Result, GENERIC_SUBMISSION_MESSAGE};

use super::log_aggregator::LogAggregator;

/// Failure reason of a success event with no storage path to read from
pub const UNTRACEABLE_REASON: &str = "RenditionUntraceable";

/// Main request orchestrator
pub struct Orchestrator {
    storage: Arc<dyn ObjectStore>,
    compute: Arc<dyn ComputeClient>,
    logs: Option<LogAggregator>,
    settings: ProcessingSettings,
}

impl Orchestrator {
    /// Create an orchestrator without a log backend
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        compute: Arc<dyn ComputeClient>,
        settings: ProcessingSettings,
    ) -> Self {
        Self {
            storage,
            compute,
            logs: None,
            settings,
        }
    }

    /// Attach a log aggregator for the logging step
    pub fn with_log_aggregator(mut self, logs: LogAggregator) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn settings(&self) -> &ProcessingSettings {
        &self.settings
    }

    /// Run a request to completion.
    ///
    /// The session records the final state and the surfaced error. An abort
    /// returns `DevToolError::Aborted` and surfaces nothing else.
    #[instrument(skip(self, session, request), fields(session_id = %session.id, renditions = request.renditions.len()))]
    pub async fn run(
        &self,
        session: &mut ProcessingSession,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResult> {
        info!(source = ?request.source, "Starting processing request");

        match self.run_steps(session, request).await {
            Ok(result) => {
                session.transition(SessionState::Done);
                info!(
                    renditions = result.renditions.len(),
                    logs = result.logs.len(),
                    "Processing request completed"
                );
                Ok(result)
            }
            Err(e) if e.is_aborted() || session.is_cancelled() => {
                info!(error = %e, "Processing request aborted");
                Err(session.abort())
            }
            Err(e) => {
                error!(state = ?session.state, error = %e, "Processing request failed");
                Err(session.fail(e))
            }
        }
    }

    async fn run_steps(
        &self,
        session: &mut ProcessingSession,
        request: &ProcessingRequest,
    ) -> Result<ProcessingResult> {
        checkpoint(session)?;
        let (source, artifacts) = self.stage(session.id, request).await?;

        checkpoint(session)?;
        session.transition(SessionState::Submitted);
        let submitted = self.submit(source.as_ref(), &artifacts, None).await?;
        session.request_id = Some(submitted.request_id.clone());
        session.activation_id = Some(submitted.activation_id.clone());

        checkpoint(session)?;
        session.transition(SessionState::AwaitingEvents);
        let cancel = session.cancel_token().clone();
        let events = tokio::select! {
            events = self.await_events(&submitted.request_id) => events?,
            _ = cancel.cancelled() => return Err(DevToolError::Aborted),
        };

        // Events retrieved after an abort are discarded here
        checkpoint(session)?;
        session.transition(SessionState::Reconciling);
        self.commit_renditions(&events).await;

        checkpoint(session)?;
        let renditions = self.rendition_records(&artifacts, &events).await?;

        checkpoint(session)?;
        session.transition(SessionState::Logging);
        let logs = self.collect_logs(&submitted.activation_id, &events).await;

        checkpoint(session)?;
        Ok(ProcessingResult {
            session_id: session.id,
            request_id: submitted.request_id,
            activation_id: submitted.activation_id,
            renditions,
            logs,
        })
    }

    /// Presign the source and every rendition target, in request order.
    ///
    /// Any single presign failure fails the whole request before anything is
    /// submitted.
    pub async fn stage(
        &self,
        session_id: Uuid,
        request: &ProcessingRequest,
    ) -> Result<(Option<PresignedSource>, Vec<PresignedArtifact>)> {
        let source = match request.source.as_deref() {
            None => None,
            Some(name) => Some(self.presign_source(name).await?),
        };

        let mut artifacts = Vec::with_capacity(request.renditions.len());
        for (idx, spec) in request.renditions.iter().enumerate() {
            artifacts.push(
                self.presign_rendition(request.source.as_deref(), &session_id, idx, spec)
                    .await?,
            );
        }

        debug!(count = artifacts.len(), "Staged renditions");
        Ok((source, artifacts))
    }

    /// Readable reference to a source in the source folder
    pub async fn presign_source(&self, name: &str) -> Result<PresignedSource> {
        if name.trim().is_empty() {
            return Err(DevToolError::InvalidSource(name.to_string()));
        }
        let url = self
            .storage
            .presign_get(
                &format!("{}/{}", self.settings.source_prefix, name),
                self.settings.presign_ttl,
            )
            .await?;
        Ok(PresignedSource {
            url,
            name: name.to_string(),
        })
    }

    /// Writable target for the rendition at `index`
    pub async fn presign_rendition(
        &self,
        source: Option<&str>,
        session_id: &Uuid,
        index: usize,
        spec: &ArtifactSpec,
    ) -> Result<PresignedArtifact> {
        let path = rendition_path(source, session_id, index, spec.name.as_deref());
        let target = self
            .storage
            .presign_put(
                &path,
                self.settings.presign_ttl,
                self.settings.rendition_estimated_bytes,
                self.settings.rendition_part_count,
            )
            .await?;

        Ok(PresignedArtifact {
            spec: spec.clone(),
            target,
            user_data: RenditionUserData { path },
        })
    }

    /// Hand the staged job to the compute service
    pub async fn submit(
        &self,
        source: Option<&PresignedSource>,
        artifacts: &[PresignedArtifact],
        user_data: Option<&Value>,
    ) -> Result<SubmitResponse> {
        match self.compute.process(source, artifacts, user_data).await {
            Ok(submitted) => {
                info!(
                    request_id = %submitted.request_id,
                    activation_id = %submitted.activation_id,
                    "Submitted processing request"
                );
                Ok(submitted)
            }
            Err(e @ DevToolError::Submission(_)) => Err(e),
            Err(other) => {
                warn!(error = %other, "Submission failed");
                Err(DevToolError::Submission(
                    GENERIC_SUBMISSION_MESSAGE.to_string(),
                ))
            }
        }
    }

    /// Wait for the complete event set of a request
    pub async fn await_events(&self, request_id: &str) -> Result<Vec<CompletionEvent>> {
        let events = self
            .compute
            .wait_activation(request_id, self.settings.activation_wait)
            .await?;
        debug!(request_id, count = events.len(), "Received completion events");
        Ok(events)
    }

    /// Finalize uploads of every successful rendition.
    ///
    /// Skipped for stores that complete uploads on write. Failures are
    /// logged and swallowed; returns the number of successful commits.
    pub async fn commit_renditions(&self, events: &[CompletionEvent]) -> usize {
        if !self.storage.supports_commit() {
            debug!(backend = self.storage.name(), "Store needs no commit");
            return 0;
        }

        let paths: Vec<&str> = events
            .iter()
            .filter(|e| e.is_success())
            .filter_map(|e| e.correlation_path())
            .collect();

        let results = join_all(paths.iter().map(|path| async move {
            let result = self.storage.commit_put(path).await;
            if let Err(ref e) = result {
                warn!(%path, error = %e, "Commit failed");
            }
            result
        }))
        .await;

        results.iter().filter(|r| r.is_ok()).count()
    }

    /// Display records for every event, in request order.
    ///
    /// A success event that cannot be traced to a storage path becomes a
    /// failed record; the other records are unaffected.
    pub async fn rendition_records(
        &self,
        artifacts: &[PresignedArtifact],
        events: &[CompletionEvent],
    ) -> Result<Vec<RenditionRecord>> {
        let mut indexed = Vec::with_capacity(events.len());

        for event in events {
            let index = request_index(artifacts, event);
            let spec = index.and_then(|idx| artifacts.get(idx)).map(|a| &a.spec);
            let rendition = event.rendition();
            let name = rendition
                .name
                .clone()
                .or_else(|| spec.and_then(|s| s.name.clone()));
            let fmt = rendition
                .fmt
                .clone()
                .or_else(|| spec.and_then(|s| s.fmt.clone()));

            let record = match event {
                CompletionEvent::RenditionCreated(_) => {
                    let path = event
                        .correlation_path()
                        .or_else(|| index.and_then(|idx| artifacts.get(idx)).map(|a| a.target_path()))
                        .filter(|path| !path.is_empty());
                    match path {
                        Some(path) => {
                            let url = self
                                .storage
                                .presign_get(path, self.settings.presign_ttl)
                                .await?;
                            RenditionRecord::Created { name, fmt, url }
                        }
                        None => {
                            warn!(rendition = ?name, "Rendition created without a storage path");
                            RenditionRecord::Failed {
                                name,
                                fmt,
                                error_reason: Some(UNTRACEABLE_REASON.to_string()),
                                error_message: Some(
                                    "rendition reported without a storage path".to_string(),
                                ),
                            }
                        }
                    }
                }
                CompletionEvent::RenditionFailed(failed) => RenditionRecord::Failed {
                    name,
                    fmt,
                    error_reason: failed.error_reason.clone(),
                    error_message: failed.error_message.clone(),
                },
            };
            indexed.push((index.unwrap_or(usize::MAX), record));
        }

        // Stable sort keeps arrival order among unmatched events
        indexed.sort_by_key(|(idx, _)| *idx);
        Ok(indexed.into_iter().map(|(_, record)| record).collect())
    }

    /// Worker logs for a job; empty when no log backend is configured
    pub async fn collect_logs(
        &self,
        activation_id: &str,
        events: &[CompletionEvent],
    ) -> Vec<WorkerActivationLog> {
        match self.logs {
            Some(ref logs) => logs.get_worker_logs(activation_id, events).await,
            None => {
                debug!("No activation log backend configured");
                Vec::new()
            }
        }
    }
}

/// Fail with `Aborted` once the session's token is cancelled
fn checkpoint(session: &ProcessingSession) -> Result<()> {
    if session.is_cancelled() {
        debug!(state = ?session.state, "Abort observed");
        return Err(DevToolError::Aborted);
    }
    Ok(())
}

/// Position in the request of the artifact an event reports on.
///
/// Correlates by the echoed storage path, then by rendition name.
fn request_index(artifacts: &[PresignedArtifact], event: &CompletionEvent) -> Option<usize> {
    if let Some(path) = event.correlation_path() {
        if let Some(idx) = artifacts.iter().position(|a| a.target_path() == path) {
            return Some(idx);
        }
    }
    let name = event.rendition().name.as_deref()?;
    artifacts
        .iter()
        .position(|a| a.spec.name.as_deref() == Some(name))
}
