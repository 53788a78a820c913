//! Amazon S3 backend.
//!
//! Presigned PUT targets are single URLs, so uploads complete on write and
//! there is nothing to commit.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use tracing::{debug, instrument};

use super::blob::{list_entries, check_access, put_file, signed_url};
use super::{ObjectEntry, ObjectStore};
use crate::config::S3Credentials;
use crate::domain::PresignedTarget;
use crate::error::{DevToolError, Result};

/// Longest expiry S3 accepts for presigned URLs
const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// S3 bucket adapter
pub struct S3Store {
    bucket: String,
    inner: AmazonS3,
}

impl S3Store {
    pub fn new(credentials: &S3Credentials) -> Result<Self> {
        let inner = AmazonS3Builder::new()
            .with_bucket_name(&credentials.bucket)
            .with_region(&credentials.region)
            .with_access_key_id(&credentials.access_key_id)
            .with_secret_access_key(&credentials.secret_access_key)
            .build()
            .map_err(|e| DevToolError::StorageConfig(format!("invalid S3 settings: {}", e)))?;

        Ok(Self {
            bucket: credentials.bucket.clone(),
            inner,
        })
    }

    async fn presign(&self, method: Method, key: &str, ttl: Duration) -> Result<String> {
        let url = signed_url(&self.inner, method, key, ttl.min(MAX_PRESIGN_TTL)).await?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_objects(&self) -> Result<Vec<ObjectEntry>> {
        let entries = list_entries(&self.inner).await?;
        debug!(count = entries.len(), "Listed bucket");
        Ok(entries)
    }

    #[instrument(skip(self, local_path), fields(local = %local_path.display()))]
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        put_file(&self.inner, local_path, remote_path).await
    }

    async fn presign_get(&self, path: &str, ttl: Duration) -> Result<String> {
        self.presign(Method::GET, path, ttl).await
    }

    async fn presign_put(
        &self,
        path: &str,
        ttl: Duration,
        _estimated_size: u64,
        _part_count: u32,
    ) -> Result<PresignedTarget> {
        Ok(PresignedTarget::Single(
            self.presign(Method::PUT, path, ttl).await?,
        ))
    }

    async fn validate(&self) -> Result<()> {
        check_access(&self.inner, &format!("S3 bucket '{}'", self.bucket)).await
    }
}
