//! HTTP client for the asset compute service.
//!
//! Connecting resolves the integration credential, obtains an IMS access
//! token and registers the client's event journal. Jobs go to `/process`;
//! completion events are read back from the journal.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::credentials::{resolve_integration, IntegrationCredential};
use super::journal::{next_link, JournalPage, JournalState};
use super::ComputeClient;
use crate::config::ResolvedConfig;
use crate::domain::{CompletionEvent, PresignedArtifact, PresignedSource, SubmitResponse};
use crate::error::{DevToolError, Result, GENERIC_SUBMISSION_MESSAGE};

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    journal: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Compute service client bound to one registered journal
pub struct AssetComputeClient {
    endpoint: String,
    api_key: String,
    org_id: String,
    access_token: String,
    journal_url: String,
    poll_interval: Duration,
    client: reqwest::Client,
    /// Submitted request ids and their rendition counts
    pending: Mutex<HashMap<String, usize>>,
    journal: tokio::sync::Mutex<JournalState>,
}

impl AssetComputeClient {
    /// Authenticate and register a journal
    #[instrument(skip(config), fields(endpoint = %config.endpoint))]
    pub async fn connect(config: &ResolvedConfig) -> Result<Self> {
        let credential = resolve_integration(config)?;
        let client = reqwest::Client::new();
        let access_token = credential.access_token(&client).await?;
        let api_key = config
            .api_key
            .clone()
            .unwrap_or_else(|| credential.client_id().to_string());

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let journal_url = register(&client, &endpoint, &access_token, &api_key, &credential).await?;
        info!(journal = %journal_url, "Registered event journal");

        Ok(Self::with_journal(
            endpoint,
            api_key,
            credential.org_id().to_string(),
            access_token,
            journal_url,
            config.processing.journal_poll_interval,
        ))
    }

    /// Build a client for an already registered journal
    pub fn with_journal(
        endpoint: String,
        api_key: String,
        org_id: String,
        access_token: String,
        journal_url: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            endpoint,
            api_key,
            org_id,
            access_token,
            journal: tokio::sync::Mutex::new(JournalState::new(journal_url.clone())),
            journal_url,
            poll_interval,
            client: reqwest::Client::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.access_token)
            .header("x-api-key", &self.api_key)
            .header("x-gw-ims-org-id", &self.org_id)
    }

    fn pending_snapshot(&self) -> HashMap<String, usize> {
        self.pending
            .lock()
            .map(|pending| pending.clone())
            .unwrap_or_default()
    }

    fn expected_count(&self, request_id: &str) -> Option<usize> {
        self.pending
            .lock()
            .ok()
            .and_then(|pending| pending.get(request_id).copied())
    }

    fn forget(&self, request_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(request_id);
        }
    }

    /// Poll the journal once; returns whether any entries arrived
    async fn poll_journal(&self, state: &mut JournalState) -> Result<bool> {
        let response = self
            .authorized(self.client.get(&state.next_url))
            .send()
            .await?;
        let status = response.status();

        let next = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);
        if let Some(next) = next {
            state.next_url = resolve_link(&state.next_url, &next);
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(false);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DevToolError::Http(format!(
                "journal poll returned {}: {}",
                status, text
            )));
        }

        let page: JournalPage = response.json().await?;
        if page.events.is_empty() {
            return Ok(false);
        }
        let kept = state.ingest(page, &self.pending_snapshot());
        debug!(kept, "Journal page ingested");
        Ok(true)
    }
}

/// Drops a request from the pending set when its wait ends, including when
/// the wait future itself is dropped
struct PendingGuard<'a> {
    client: &'a AssetComputeClient,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.client.forget(self.request_id);
        // Busy journal: the next ingest prunes ids that are no longer pending
        if let Ok(mut state) = self.client.journal.try_lock() {
            state.discard(self.request_id);
        }
    }
}

async fn register(
    client: &reqwest::Client,
    endpoint: &str,
    access_token: &str,
    api_key: &str,
    credential: &IntegrationCredential,
) -> Result<String> {
    let response = client
        .post(format!("{}/register", endpoint))
        .bearer_auth(access_token)
        .header("x-api-key", api_key)
        .header("x-gw-ims-org-id", credential.org_id())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(DevToolError::Http(format!(
            "register returned {}: {}",
            status, text
        )));
    }
    let body: RegisterResponse = response.json().await?;
    Ok(body.journal)
}

/// Resolve a possibly relative `Link` target against the current URL
fn resolve_link(current: &str, link: &str) -> String {
    reqwest::Url::parse(current)
        .and_then(|base| base.join(link))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| link.to_string())
}

/// Request body of `/process`
pub fn process_body(
    source: Option<&PresignedSource>,
    renditions: &[PresignedArtifact],
    user_data: Option<&Value>,
) -> Value {
    let mut body = json!({ "renditions": renditions });
    if let Some(source) = source {
        body["source"] = json!(source);
    }
    if let Some(user_data) = user_data {
        body["userData"] = user_data.clone();
    }
    body
}

/// Error surfaced for a rejected submission.
///
/// A structured `message` from the service is passed through verbatim.
pub fn submission_error(body: &str) -> DevToolError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty());
    DevToolError::Submission(message.unwrap_or_else(|| GENERIC_SUBMISSION_MESSAGE.to_string()))
}

#[async_trait]
impl ComputeClient for AssetComputeClient {
    fn name(&self) -> &str {
        "asset-compute"
    }

    #[instrument(skip_all, fields(renditions = renditions.len()))]
    async fn process(
        &self,
        source: Option<&PresignedSource>,
        renditions: &[PresignedArtifact],
        user_data: Option<&Value>,
    ) -> Result<SubmitResponse> {
        let body = process_body(source, renditions, user_data);
        let response = self
            .authorized(self.client.post(format!("{}/process", self.endpoint)))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Submission transport failure");
                DevToolError::Submission(GENERIC_SUBMISSION_MESSAGE.to_string())
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(submission_error(&text));
        }
        let submitted: SubmitResponse =
            serde_json::from_str(&text).map_err(|_| submission_error(&text))?;

        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(submitted.request_id.clone(), renditions.len());
        }
        info!(request_id = %submitted.request_id, activation_id = %submitted.activation_id, "Job submitted");
        Ok(submitted)
    }

    #[instrument(skip(self, timeout))]
    async fn wait_activation(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Vec<CompletionEvent>> {
        let expected = self
            .expected_count(request_id)
            .ok_or_else(|| DevToolError::UnknownRequest(request_id.to_string()))?;
        let _pending = PendingGuard {
            client: self,
            request_id,
        };
        let started = Instant::now();

        let wait = async {
            loop {
                let arrived = {
                    let mut state = self.journal.lock().await;
                    if let Some(events) = state.take_complete(request_id, expected) {
                        return events;
                    }
                    match self.poll_journal(&mut state).await {
                        Ok(arrived) => arrived,
                        Err(e) => {
                            warn!(error = %e, "Journal poll failed, retrying");
                            false
                        }
                    }
                };
                if !arrived {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(events) => Ok(events),
            Err(_) => {
                let mut state = self.journal.lock().await;
                warn!(
                    expected,
                    received = state.buffered_count(request_id),
                    "Activation timed out, discarding partial events"
                );
                state.discard(request_id);
                Err(DevToolError::ActivationTimeout {
                    request_id: request_id.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    async fn is_event_journal_ready(&self) -> Result<bool> {
        let response = self
            .authorized(self.client.get(&self.journal_url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    fn journal_url(&self) -> Option<&str> {
        Some(&self.journal_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactSpec, PresignedTarget, RenditionUserData};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_structured_message_passes_through() {
        let err = submission_error(r#"{"message": "Invalid rendition fmt: xyz"}"#);
        assert_eq!(err, DevToolError::Submission("Invalid rendition fmt: xyz".into()));
    }

    #[test]
    fn test_unstructured_failure_is_generic() {
        for body in ["<html>bad gateway</html>", "", r#"{"error": 1}"#] {
            assert_eq!(
                submission_error(body).to_string(),
                GENERIC_SUBMISSION_MESSAGE
            );
        }
    }

    #[test]
    fn test_process_body_shape() {
        let artifact = PresignedArtifact {
            spec: ArtifactSpec::new("out.png", "png"),
            target: PresignedTarget::Single("https://put".into()),
            user_data: RenditionUserData {
                path: "rendition/a.png/s/0/out.png".into(),
            },
        };
        let source = PresignedSource {
            url: "https://get".into(),
            name: "a.png".into(),
        };

        let body = process_body(Some(&source), &[artifact.clone()], None);
        assert_eq!(body["source"]["url"], "https://get");
        assert_eq!(body["renditions"][0]["fmt"], "png");
        assert_eq!(body["renditions"][0]["target"], "https://put");
        assert!(body.get("userData").is_none());

        let sourceless = process_body(None, &[artifact], Some(&json!({"k": 1})));
        assert!(sourceless.get("source").is_none());
        assert_eq!(sourceless["userData"]["k"], 1);
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("https://j.example/events/abc", "/events/abc?since=1"),
            "https://j.example/events/abc?since=1"
        );
        assert_eq!(
            resolve_link("https://j.example/a", "https://other.example/b"),
            "https://other.example/b"
        );
    }

    /// Serve canned HTTP responses in order, repeating the last one
    async fn journal_stub(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/events", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let hit = counter.fetch_add(1, Ordering::SeqCst);
                let response = &responses[hit.min(responses.len() - 1)];
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    fn created_page(request_id: &str, names: &[&str]) -> String {
        let events: Vec<Value> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                json!({
                    "position": i.to_string(),
                    "event": {"type": "rendition_created", "requestId": request_id, "rendition": {"name": name}}
                })
            })
            .collect();
        http_response("200 OK", &json!({ "events": events }).to_string())
    }

    fn client_for(journal_url: String) -> AssetComputeClient {
        AssetComputeClient::with_journal(
            "https://compute.invalid".into(),
            "key".into(),
            "org".into(),
            "token".into(),
            journal_url,
            Duration::from_millis(10),
        )
    }

    fn expect(client: &AssetComputeClient, request_id: &str, renditions: usize) {
        client
            .pending
            .lock()
            .unwrap()
            .insert(request_id.to_string(), renditions);
    }

    #[tokio::test]
    async fn test_partial_events_then_timeout() {
        let (url, hits) = journal_stub(vec![
            http_response("500 Internal Server Error", "oops"),
            created_page("r1", &["a"]),
            "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string(),
        ])
        .await;
        let client = client_for(url);
        expect(&client, "r1", 2);

        let err = client
            .wait_activation("r1", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, DevToolError::ActivationTimeout { ref request_id, .. } if request_id == "r1"));
        assert_eq!(client.journal.lock().await.buffered_count("r1"), 0);
        assert!(hits.load(Ordering::SeqCst) > 2);

        let again = client
            .wait_activation("r1", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(again, DevToolError::UnknownRequest("r1".into()));
    }

    #[tokio::test]
    async fn test_poll_failure_is_retried() {
        let (url, _) = journal_stub(vec![
            http_response("503 Service Unavailable", ""),
            created_page("r1", &["a", "b"]),
        ])
        .await;
        let client = client_for(url);
        expect(&client, "r1", 2);

        let events = client
            .wait_activation("r1", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(client.expected_count("r1"), None);
    }

    #[tokio::test]
    async fn test_dropped_wait_forgets_request() {
        let (url, _) = journal_stub(vec![created_page("r1", &["a"])]).await;
        let client = client_for(url);
        expect(&client, "r1", 3);

        let outer = tokio::time::timeout(
            Duration::from_millis(100),
            client.wait_activation("r1", Duration::from_secs(30)),
        )
        .await;
        assert!(outer.is_err());
        assert_eq!(client.expected_count("r1"), None);
    }

    #[tokio::test]
    async fn test_wait_on_unknown_request() {
        let client = AssetComputeClient::with_journal(
            "https://compute.invalid".into(),
            "key".into(),
            "org".into(),
            "token".into(),
            "https://journal.invalid".into(),
            Duration::from_millis(10),
        );
        let err = client
            .wait_activation("never-submitted", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, DevToolError::UnknownRequest("never-submitted".into()));
        assert_eq!(client.journal_url(), Some("https://journal.invalid"));
    }
}
