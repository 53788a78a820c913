//! Completion events delivered by the compute service's event journal.
//!
//! One event arrives per requested rendition. Custom workers additionally
//! report the activation ids they ran under, which is the only way to find
//! their logs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::request::RenditionUserData;

/// A per-rendition completion notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// The rendition was written to its target
    RenditionCreated(RenditionCreated),

    /// The worker could not produce the rendition
    RenditionFailed(RenditionFailed),
}

/// Payload of a `rendition_created` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenditionCreated {
    #[serde(default)]
    pub request_id: String,

    pub rendition: EventRendition,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activation_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Payload of a `rendition_failed` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenditionFailed {
    #[serde(default)]
    pub request_id: String,

    pub rendition: EventRendition,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activation_ids: Vec<String>,
}

/// The rendition instructions echoed back in an event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventRendition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmt: Option<String>,

    #[serde(rename = "userData", default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<RenditionUserData>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CompletionEvent {
    /// Request the event belongs to
    pub fn request_id(&self) -> &str {
        match self {
            Self::RenditionCreated(e) => &e.request_id,
            Self::RenditionFailed(e) => &e.request_id,
        }
    }

    /// Rendition the event reports on
    pub fn rendition(&self) -> &EventRendition {
        match self {
            Self::RenditionCreated(e) => &e.rendition,
            Self::RenditionFailed(e) => &e.rendition,
        }
    }

    /// Downstream activation ids reported by custom workers
    pub fn activation_ids(&self) -> &[String] {
        match self {
            Self::RenditionCreated(e) => &e.activation_ids,
            Self::RenditionFailed(e) => &e.activation_ids,
        }
    }

    /// Storage path echoed through `userData`, if any
    pub fn correlation_path(&self) -> Option<&str> {
        self.rendition()
            .user_data
            .as_ref()
            .map(|data| data.path.as_str())
    }

    /// True for `rendition_created`
    pub fn is_success(&self) -> bool {
        matches!(self, Self::RenditionCreated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_created_event() {
        let json = r#"{
            "type": "rendition_created",
            "requestId": "r1",
            "rendition": {"name": "out.png", "fmt": "png", "userData": {"path": "rendition/a.png/s/0/out.png"}},
            "metadata": {"tiff:imageWidth": 48}
        }"#;

        let event: CompletionEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_success());
        assert_eq!(event.request_id(), "r1");
        assert_eq!(event.correlation_path(), Some("rendition/a.png/s/0/out.png"));
        assert!(event.activation_ids().is_empty());
    }

    #[test]
    fn test_parse_failed_event_with_activation_ids() {
        let json = r#"{
            "type": "rendition_failed",
            "requestId": "r1",
            "errorReason": "SourceUnsupported",
            "errorMessage": "cannot read source",
            "activationIds": ["a", "b"],
            "rendition": {"name": "out.png", "fmt": "png"}
        }"#;

        let event: CompletionEvent = serde_json::from_str(json).unwrap();
        assert!(!event.is_success());
        assert_eq!(event.activation_ids(), ["a".to_string(), "b".to_string()]);
        assert_eq!(event.correlation_path(), None);
        match event {
            CompletionEvent::RenditionFailed(failed) => {
                assert_eq!(failed.error_reason.as_deref(), Some("SourceUnsupported"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"type": "error", "requestId": "r1"}"#;
        assert!(serde_json::from_str::<CompletionEvent>(json).is_err());
    }
}
