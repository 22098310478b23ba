//! Wire protocol between the orchestrator and a module, per §6.
//!
//! The source system expressed worker result frames as a loosely-typed
//! object with several fallback keys (`execution_id` top-level or nested
//! under `meta`, `error`/`message`/`error_message` for the failure text).
//! Rather than threading that ad-hoc lookup through the dispatch logic,
//! [`ResultFrame`] re-expresses it as a single parse-boundary type: once
//! deserialized, every downstream caller sees the same small, typed surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sent on fire: `{"type":"execute","meta":{...},"args":{...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Execute {
        meta: ExecuteMeta,
        args: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteMeta {
    pub execution_id: Uuid,
    /// Naive-local ISO8601, e.g. `2026-07-28T09:30:00`.
    pub execution_time: String,
    pub workflow_id: String,
    pub workflow_name: String,
}

/// Recognized failure statuses on a result frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    Failure,
    Failed,
    Error,
    Fail,
}

impl FailureStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "failure" => Some(Self::Failure),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ResultMetaRaw {
    #[serde(default)]
    execution_id: Option<String>,
}

/// Loosely-typed worker result frame, tolerant of the field-shape variance
/// documented in §6 and §9: `type="result"` OR any object carrying `status`;
/// `execution_id` may sit top-level or nested under `meta`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResultFrame {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    meta: Option<ResultMetaRaw>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ResultFrame {
    /// `execution_id` from the top level, falling back to `meta.execution_id`.
    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id
            .as_deref()
            .or_else(|| self.meta.as_ref().and_then(|m| m.execution_id.as_deref()))
    }

    /// True when this frame should be routed to the result handler at all:
    /// `type == "result"` or any `status` field present.
    pub fn is_result_like(&self) -> bool {
        self.kind.as_deref() == Some("result") || self.status.is_some()
    }

    /// Parses `status` into a recognized failure kind, if any.
    pub fn failure_status(&self) -> Option<FailureStatus> {
        self.status.as_deref().and_then(FailureStatus::parse)
    }

    /// Error text, preferring `error`, then `message`, then `error_message`.
    pub fn error_text(&self) -> Option<String> {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error_message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_id_top_level() {
        let frame: ResultFrame = serde_json::from_str(r#"{"execution_id":"abc","status":"success"}"#).unwrap();
        assert_eq!(frame.execution_id(), Some("abc"));
    }

    #[test]
    fn execution_id_nested_in_meta() {
        let frame: ResultFrame =
            serde_json::from_str(r#"{"type":"result","meta":{"execution_id":"xyz"}}"#).unwrap();
        assert_eq!(frame.execution_id(), Some("xyz"));
    }

    #[test]
    fn is_result_like_by_type() {
        let frame: ResultFrame = serde_json::from_str(r#"{"type":"result"}"#).unwrap();
        assert!(frame.is_result_like());
    }

    #[test]
    fn is_result_like_by_status() {
        let frame: ResultFrame = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(frame.is_result_like());
    }

    #[test]
    fn unrelated_object_is_not_result_like() {
        let frame: ResultFrame = serde_json::from_str(r#"{"foo":"bar"}"#).unwrap();
        assert!(!frame.is_result_like());
    }

    #[test]
    fn recognizes_all_failure_statuses() {
        for s in ["failure", "failed", "error", "fail", "FAILURE", "Fail"] {
            let frame: ResultFrame =
                serde_json::from_str(&format!(r#"{{"status":"{s}"}}"#)).unwrap();
            assert!(frame.failure_status().is_some(), "expected failure for {s}");
        }
    }

    #[test]
    fn success_status_is_not_a_failure() {
        let frame: ResultFrame = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(frame.failure_status().is_none());
    }

    #[test]
    fn error_text_prefers_error_then_message_then_error_message() {
        let frame: ResultFrame =
            serde_json::from_str(r#"{"status":"error","message":"m","error_message":"e"}"#).unwrap();
        assert_eq!(frame.error_text(), Some("m".to_string()));

        let frame: ResultFrame = serde_json::from_str(r#"{"status":"error","error_message":"e"}"#).unwrap();
        assert_eq!(frame.error_text(), Some("e".to_string()));
    }

    #[test]
    fn outbound_execute_serializes_with_tagged_type() {
        let msg = OutboundMessage::Execute {
            meta: ExecuteMeta {
                execution_id: Uuid::nil(),
                execution_time: "2026-07-28T09:30:00".into(),
                workflow_id: "1".into(),
                workflow_name: "W".into(),
            },
            args: serde_json::json!({"a": 1}),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "execute");
        assert_eq!(v["meta"]["workflow_name"], "W");
        assert_eq!(v["args"]["a"], 1);
    }
}
