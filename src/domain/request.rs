//! Processing requests and their presigned form.
//!
//! A request names an optional source object and an ordered list of
//! artifact specs. Before submission every artifact gets a writable storage
//! target whose path is echoed back through `userData` so completion events
//! can be correlated with it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Fallback file name when an artifact spec has no name
pub const DEFAULT_RENDITION_NAME: &str = "rendition";

/// Path segment used in place of the source name for source-less requests
pub const SOURCELESS_PATH_SEGMENT: &str = "nosource";

/// A request as authored in the editor: `{"renditions": [...]}` plus the
/// selected source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    /// Name of the source object under the source prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Artifacts to produce, in display order
    #[serde(default)]
    pub renditions: Vec<ArtifactSpec>,
}

impl ProcessingRequest {
    /// Create a request for a source
    pub fn new(source: Option<String>, renditions: Vec<ArtifactSpec>) -> Self {
        Self { source, renditions }
    }

    /// Parse the editor JSON document and attach the selected source
    pub fn from_json(source: Option<String>, json: &str) -> serde_json::Result<Self> {
        let mut request: ProcessingRequest = serde_json::from_str(json)?;
        if source.is_some() {
            request.source = source;
        }
        Ok(request)
    }
}

/// One requested output artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// File name of the rendition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Output format (e.g. "png", "txt", "xmp")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmt: Option<String>,

    /// Width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wid: Option<u32>,

    /// Height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hei: Option<u32>,

    /// URL of a custom worker to route this rendition to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Any other worker parameters, passed through verbatim
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ArtifactSpec {
    /// Create a spec with a name and format
    pub fn new(name: impl Into<String>, fmt: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            fmt: Some(fmt.into()),
            ..Default::default()
        }
    }

    /// Set output dimensions
    pub fn with_size(mut self, wid: u32, hei: u32) -> Self {
        self.wid = Some(wid);
        self.hei = Some(hei);
        self
    }
}

/// Compute the storage path for the rendition at `index` of a request.
///
/// Format: `rendition/{source}/{session_id}/{index}/{name|"rendition"}`.
pub fn rendition_path(
    source: Option<&str>,
    session_id: &Uuid,
    index: usize,
    name: Option<&str>,
) -> String {
    let source = source.unwrap_or(SOURCELESS_PATH_SEGMENT);
    let name = match name {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_RENDITION_NAME,
    };
    format!("rendition/{}/{}/{}/{}", source, session_id, index, name)
}

/// Time-limited readable reference to the source object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedSource {
    pub url: String,
    pub name: String,
}

/// Writable target for a rendition.
///
/// Backends that need multi-part uploads hand out one URL per part plus the
/// part size bounds; the others hand out a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresignedTarget {
    Multipart {
        urls: Vec<String>,
        #[serde(rename = "minPartSize")]
        min_part_size: u64,
        #[serde(rename = "maxPartSize")]
        max_part_size: u64,
    },
    Single(String),
}

/// Data round-tripped through the compute service with a rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionUserData {
    pub path: String,
}

/// An artifact spec with its storage target attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedArtifact {
    #[serde(flatten)]
    pub spec: ArtifactSpec,

    pub target: PresignedTarget,

    #[serde(rename = "userData")]
    pub user_data: RenditionUserData,
}

impl PresignedArtifact {
    /// Storage path the worker will write to
    pub fn target_path(&self) -> &str {
        &self.user_data.path
    }
}

/// Identifiers returned by the compute service for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub request_id: String,
    pub activation_id: String,
}
