//! Shared plumbing for the stores built on `object_store`.

use std::path::Path;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use http::Method;
use object_store::path::Path as StorePath;
use object_store::signer::Signer;
use object_store::{ObjectMeta, ObjectStore as RemoteStore, PutPayload};
use url::Url;

use super::ObjectEntry;
use crate::error::{DevToolError, Result};

/// Location of a non-empty object path
pub fn store_path(path: &str) -> Result<StorePath> {
    if path.trim().is_empty() {
        return Err(DevToolError::InvalidReference(path.to_string()));
    }
    Ok(StorePath::from(path))
}

fn operation_error(operation: &'static str) -> impl Fn(object_store::Error) -> DevToolError {
    move |e| DevToolError::storage(operation, e.to_string())
}

/// Presigned URL for `method` on `path`
pub async fn signed_url<S>(signer: &S, method: Method, path: &str, ttl: Duration) -> Result<Url>
where
    S: Signer + ?Sized,
{
    let location = store_path(path)?;
    signer
        .signed_url(method, &location, ttl)
        .await
        .map_err(operation_error("presign"))
}

/// Every object in the store
pub async fn list_entries<S>(store: &S) -> Result<Vec<ObjectEntry>>
where
    S: RemoteStore + ?Sized,
{
    let metas: Vec<ObjectMeta> = store
        .list(None)
        .try_collect()
        .await
        .map_err(operation_error("list_objects"))?;

    Ok(metas
        .into_iter()
        .map(|meta| ObjectEntry {
            name: meta.location.to_string(),
            size: Some(meta.size as u64),
        })
        .collect())
}

/// Write a local file to `remote`, replacing any existing object
pub async fn put_file<S>(store: &S, local: &Path, remote: &str) -> Result<()>
where
    S: RemoteStore + ?Sized,
{
    let location = store_path(remote)?;
    let bytes = tokio::fs::read(local).await.map_err(|e| {
        DevToolError::storage(
            "upload",
            format!("failed to read {}: {}", local.display(), e),
        )
    })?;

    store
        .put(&location, PutPayload::from(bytes))
        .await
        .map_err(operation_error("upload"))?;
    Ok(())
}

/// Read the first listing page; credential or container problems surface as
/// `StorageConfig`
pub async fn check_access<S>(store: &S, label: &str) -> Result<()>
where
    S: RemoteStore + ?Sized,
{
    match store.list(None).next().await {
        Some(Err(e)) => Err(DevToolError::StorageConfig(format!(
            "{} is not accessible: {}",
            label, e
        ))),
        _ => Ok(()),
    }
}
