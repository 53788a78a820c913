//! Storage backend selection.

use std::sync::Arc;

use tracing::info;

use super::{AzureBlobStore, ObjectStore, S3Store};
use crate::config::{ResolvedConfig, StorageBackendConfig};
use crate::error::Result;

/// Build the object store selected by the environment.
///
/// Configuration errors surface before any network call; the adapter is then
/// validated against its container.
pub async fn connect_storage(config: &ResolvedConfig) -> Result<Arc<dyn ObjectStore>> {
    let store = build_storage(config)?;
    store.validate().await?;
    info!(backend = store.name(), "Connected to storage");
    Ok(store)
}

/// Build the object store without touching the network
pub fn build_storage(config: &ResolvedConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.storage_backend()? {
        StorageBackendConfig::Azure(credentials) => Arc::new(AzureBlobStore::new(&credentials)?),
        StorageBackendConfig::S3(credentials) => Arc::new(S3Store::new(&credentials)?),
    };
    Ok(store)
}
