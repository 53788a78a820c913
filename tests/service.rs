//! Facade Integration Tests
//!
//! Tests for source management, handle caching, and run supersession.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use asset_devtool::config::ResolvedConfig;
use asset_devtool::domain::{ArtifactSpec, ProcessingRequest};
use asset_devtool::error::DevToolError;
use asset_devtool::service::DevTool;

use common::{FakeBackends, FakeCompute, FakeLogs, FakeStore, Outcome};

fn config() -> ResolvedConfig {
    ResolvedConfig::from_lookup(|_| None, None)
}

fn tool(backends: &Arc<FakeBackends>) -> DevTool {
    DevTool::with_backends(config(), backends.clone())
}

#[tokio::test]
async fn test_list_sources_strips_folder() {
    let backends = Arc::new(FakeBackends::new(
        FakeStore::with_objects(&[
            "source/a.png",
            "source/",
            "source/nested/b.jpg",
            "rendition/a.png/x/0/out.png",
        ]),
        FakeCompute::new("r1", "act1", Vec::new()),
        None,
    ));

    let sources = tool(&backends).list_sources().await.unwrap();
    assert_eq!(sources, vec!["a.png", "nested/b.jpg"]);
}

#[tokio::test]
async fn test_upload_source_returns_updated_listing() {
    let backends = Arc::new(FakeBackends::new(
        FakeStore::default(),
        FakeCompute::new("r1", "act1", Vec::new()),
        None,
    ));
    let tool = tool(&backends);

    let sources = tool.upload_source(b"PNGDATA", "photo.png").await.unwrap();
    assert_eq!(sources, vec!["photo.png"]);

    let uploads = backends.store.uploads.lock().unwrap().clone();
    assert_eq!(uploads, vec![("source/photo.png".to_string(), b"PNGDATA".to_vec())]);

    assert!(matches!(
        tool.upload_source(b"x", "").await,
        Err(DevToolError::InvalidSource(_))
    ));
}

#[tokio::test]
async fn test_presign_download_uses_long_ttl() {
    let backends = Arc::new(FakeBackends::new(
        FakeStore::default(),
        FakeCompute::new("r1", "act1", Vec::new()),
        None,
    ));
    let url = tool(&backends)
        .presign_download("rendition/a.png/x/0/out.png")
        .await
        .unwrap();
    assert!(url.ends_with("ttl=3600"));
}

#[tokio::test]
async fn test_concurrent_first_use_builds_storage_once() {
    let backends = Arc::new(FakeBackends::new(
        FakeStore::with_objects(&["source/a.png"]),
        FakeCompute::new("r1", "act1", Vec::new()),
        None,
    ));
    let tool = Arc::new(tool(&backends));

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let tool = tool.clone();
            tokio::spawn(async move { tool.list_sources().await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), vec!["a.png"]);
    }

    assert_eq!(backends.storage_builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_split_submit_and_await() {
    let backends = Arc::new(FakeBackends::new(
        FakeStore::azure_like(),
        FakeCompute::new("r1", "act1", vec![Outcome::Created]),
        Some(FakeLogs::default().children_of("act1", &[])),
    ));
    let tool = tool(&backends);

    let submitted = tool
        .submit(Some("a.png".to_string()), vec![ArtifactSpec::new("out.png", "png")])
        .await
        .unwrap();
    assert_eq!(submitted.request_id, "r1");
    assert_eq!(submitted.activation_id, "act1");

    let events = tool.await_completion("r1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(backends.store.committed().len(), 1);

    let logs = tool.fetch_logs("act1", &events).await;
    assert!(logs.is_empty());
    assert_eq!(backends.compute_builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_logs_without_runtime_credentials() {
    let backends = Arc::new(FakeBackends::new(
        FakeStore::default(),
        FakeCompute::new("r1", "act1", Vec::new()),
        None,
    ));
    let logs = tool(&backends).fetch_logs("act1", &[]).await;

    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].activation_id, "act1");
    assert!(logs[0].logs.starts_with("FAILED getting activation logs"));
}

#[tokio::test]
async fn test_new_run_supersedes_previous() {
    let gate = CancellationToken::new();
    let backends = Arc::new(FakeBackends::new(
        FakeStore::default(),
        FakeCompute {
            gate: Some(gate.clone()),
            ..FakeCompute::new("r1", "act1", vec![Outcome::Created])
        },
        None,
    ));
    let tool = Arc::new(tool(&backends));
    let request = ProcessingRequest::new(
        Some("a.png".to_string()),
        vec![ArtifactSpec::new("out.png", "png")],
    );

    let first = {
        let tool = tool.clone();
        let request = request.clone();
        tokio::spawn(async move { tool.run(request).await })
    };
    while backends.compute.wait_calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = {
        let tool = tool.clone();
        tokio::spawn(async move { tool.run(request).await })
    };
    while backends.compute.wait_calls.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    gate.cancel();

    assert_eq!(first.await.unwrap(), Err(DevToolError::Aborted));
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.renditions.len(), 1);
    assert!(!tool.abort());
}

#[tokio::test]
async fn test_abort_active_run() {
    let gate = CancellationToken::new();
    let backends = Arc::new(FakeBackends::new(
        FakeStore::default(),
        FakeCompute {
            gate: Some(gate.clone()),
            ..FakeCompute::new("r1", "act1", vec![Outcome::Created])
        },
        None,
    ));
    let tool = Arc::new(tool(&backends));

    let run = {
        let tool = tool.clone();
        tokio::spawn(async move {
            tool.run(ProcessingRequest::new(
                Some("a.png".to_string()),
                vec![ArtifactSpec::new("out.png", "png")],
            ))
            .await
        })
    };
    while backends.compute.wait_calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(tool.abort());
    gate.cancel();
    assert_eq!(run.await.unwrap(), Err(DevToolError::Aborted));
}

#[test]
fn test_journal_and_endpoint() {
    let backends = Arc::new(FakeBackends::new(
        FakeStore::default(),
        FakeCompute::new("r1", "act1", Vec::new()),
        None,
    ));
    let tool = tool(&backends);
    assert_eq!(tool.endpoint(), "https://asset-compute.adobe.io");

    tokio_test::block_on(async {
        assert_eq!(
            tool.journal_url().await.unwrap().as_deref(),
            Some("https://journal.test/events")
        );
        assert!(tool.is_journal_ready().await.unwrap());
    });
}
