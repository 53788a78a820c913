//! Azure Blob Storage backend.
//!
//! Listing, uploads and SAS presigning go through `object_store`. Rendition
//! targets are block blobs: the worker uploads one block per presigned URL and
//! the blob only becomes visible after `commit_put` writes the block list.
//! Get/Put Block List are issued directly against SAS URLs since
//! `object_store` has no call for them.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::Method;
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::blob::{list_entries, check_access, put_file, signed_url};
use super::{ObjectEntry, ObjectStore};
use crate::config::AzureCredentials;
use crate::domain::PresignedTarget;
use crate::error::{DevToolError, Result};

/// Validity of SAS URLs the adapter signs for its own calls
const INTERNAL_SAS_TTL: Duration = Duration::from_secs(300);

/// Azure container adapter
pub struct AzureBlobStore {
    container: String,
    inner: MicrosoftAzure,
    client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockListResponse {
    #[serde(default)]
    uncommitted_blocks: BlockGroup,
}

#[derive(Debug, Default, Deserialize)]
struct BlockGroup {
    #[serde(rename = "Block", default)]
    blocks: Vec<BlockEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockEntry {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "BlockList")]
struct BlockListRequest<'a> {
    #[serde(rename = "Latest")]
    latest: &'a [String],
}

impl AzureBlobStore {
    /// Create an adapter from credentials. The account key is base64.
    pub fn new(credentials: &AzureCredentials) -> Result<Self> {
        let inner = MicrosoftAzureBuilder::new()
            .with_account(&credentials.account)
            .with_access_key(&credentials.key)
            .with_container_name(&credentials.container)
            .build()
            .map_err(|e| {
                DevToolError::StorageConfig(format!("invalid Azure storage settings: {}", e))
            })?;

        Ok(Self {
            container: credentials.container.clone(),
            inner,
            client: reqwest::Client::new(),
        })
    }

    async fn uncommitted_blocks(&self, path: &str) -> Result<Vec<String>> {
        let mut url = signed_url(&self.inner, Method::GET, path, INTERNAL_SAS_TTL).await?;
        url.query_pairs_mut()
            .append_pair("comp", "blocklist")
            .append_pair("blocklisttype", "uncommitted");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DevToolError::storage("commit_put", e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DevToolError::storage("commit_put", e.to_string()))?;
        if !status.is_success() {
            return Err(DevToolError::storage(
                "commit_put",
                format!("listing blocks of {} returned {}: {}", path, status, body),
            ));
        }

        parse_uncommitted(&body)
    }
}

/// Block id of part `index`
pub fn block_id(index: u32) -> String {
    STANDARD.encode(format!("{:06}", index))
}

/// Part index encoded in a block id, if it is one of ours
pub fn block_index(id: &str) -> Option<u32> {
    let raw = STANDARD.decode(id).ok()?;
    std::str::from_utf8(&raw).ok()?.parse().ok()
}

/// Order block ids by part index. Foreign ids go last.
pub fn upload_order(mut ids: Vec<String>) -> Vec<String> {
    ids.sort_by(|a, b| {
        let a_key = (block_index(a).unwrap_or(u32::MAX), a);
        let b_key = (block_index(b).unwrap_or(u32::MAX), b);
        a_key.cmp(&b_key)
    });
    ids.dedup();
    ids
}

/// Uncommitted block ids of a Get Block List response
pub fn parse_uncommitted(xml: &str) -> Result<Vec<String>> {
    let parsed: BlockListResponse = quick_xml::de::from_str(xml.trim_start_matches('\u{feff}'))
        .map_err(|e| DevToolError::storage("commit_put", format!("unreadable block list: {}", e)))?;
    Ok(parsed
        .uncommitted_blocks
        .blocks
        .into_iter()
        .map(|block| block.name)
        .collect())
}

/// Size bounds of one part of a multi-part target
pub fn part_sizes(estimated_size: u64, part_count: u32) -> (u64, u64) {
    let parts = u64::from(part_count.max(1));
    let max_part = estimated_size.div_ceil(parts).max(1);
    (1, max_part)
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    fn name(&self) -> &str {
        "azure"
    }

    #[instrument(skip(self), fields(container = %self.container))]
    async fn list_objects(&self) -> Result<Vec<ObjectEntry>> {
        let entries = list_entries(&self.inner).await?;
        debug!(count = entries.len(), "Listed container");
        Ok(entries)
    }

    #[instrument(skip(self, local_path), fields(local = %local_path.display()))]
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        put_file(&self.inner, local_path, remote_path).await
    }

    async fn presign_get(&self, path: &str, ttl: Duration) -> Result<String> {
        Ok(signed_url(&self.inner, Method::GET, path, ttl).await?.to_string())
    }

    async fn presign_put(
        &self,
        path: &str,
        ttl: Duration,
        estimated_size: u64,
        part_count: u32,
    ) -> Result<PresignedTarget> {
        let base = signed_url(&self.inner, Method::PUT, path, ttl).await?;
        let urls = (0..part_count.max(1))
            .map(|idx| {
                let mut url = base.clone();
                url.query_pairs_mut()
                    .append_pair("comp", "block")
                    .append_pair("blockid", &block_id(idx));
                url.to_string()
            })
            .collect();
        let (min_part_size, max_part_size) = part_sizes(estimated_size, part_count);

        Ok(PresignedTarget::Multipart {
            urls,
            min_part_size,
            max_part_size,
        })
    }

    fn supports_commit(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn commit_put(&self, path: &str) -> Result<()> {
        let blocks = upload_order(self.uncommitted_blocks(path).await?);
        if blocks.is_empty() {
            return Err(DevToolError::storage(
                "commit_put",
                format!("no uncommitted blocks for {}", path),
            ));
        }

        let body = quick_xml::se::to_string(&BlockListRequest { latest: &blocks })
            .map_err(|e| DevToolError::storage("commit_put", e.to_string()))?;
        let mut url = signed_url(&self.inner, Method::PUT, path, INTERNAL_SAS_TTL).await?;
        url.query_pairs_mut().append_pair("comp", "blocklist");

        let response = self
            .client
            .put(url.as_str())
            .body(body)
            .send()
            .await
            .map_err(|e| DevToolError::storage("commit_put", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DevToolError::storage(
                "commit_put",
                format!("{} returned {}: {}", path, status, text),
            ));
        }

        debug!(blocks = blocks.len(), "Committed block list");
        Ok(())
    }

    async fn validate(&self) -> Result<()> {
        check_access(&self.inner, &format!("Azure container '{}'", self.container)).await
    }
}
