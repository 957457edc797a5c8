//! JSON bodies exchanged between the HTTP remote store and the server.
//!
//! Field names are camelCase, matching the persisted record layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document as returned by `GET /documents/{collection}/{key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentBody {
    pub key: String,
    pub value: Value,
    pub revision: u64,
}

/// Request body for `PUT /documents/{collection}/{key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBody {
    pub value: Value,
}

/// Acknowledgement of a whole-document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckBody {
    pub revision: u64,
}

/// A live-update notification for one document.
///
/// `value` is `None` when the document does not exist (never written, or
/// deleted). `revision` is the revision the change produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEvent {
    pub key: String,
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_without_revision() {
        let event: DocumentEvent =
            serde_json::from_str(r#"{"key":"roster","value":null}"#).unwrap();
        assert_eq!(event.value, None);
        assert_eq!(event.revision, None);

        let json = serde_json::to_string(&DocumentEvent {
            key: "roster".into(),
            value: Some(json!([])),
            revision: Some(3),
        })
        .unwrap();
        assert_eq!(json, r#"{"key":"roster","value":[],"revision":3}"#);
    }
}
