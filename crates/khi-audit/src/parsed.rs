//! The normalized view of one audit log

use crate::operation::KubernetesOperation;
use chrono::{DateTime, Utc};
use khi_log::{Log, LogId};
use serde_json::Value;
use std::sync::Arc;

/// Classification of a request or response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyType {
    /// Payload absent or unclassifiable
    #[default]
    Unknown,
    /// Full or partial resource manifest
    Manifest,
    /// Patch to merge into the previous manifest
    Patch,
    /// `DeleteOptions` payload, no body content
    DeleteOptions,
    /// Generic `Status` response
    Status,
}

/// One audit log after field extraction
#[derive(Debug, Clone)]
pub struct ParsedAuditLog {
    /// The ingested log this record was extracted from
    pub log: Arc<Log>,
    /// Stable id assigned at ingestion
    pub log_id: LogId,
    /// Log timestamp
    pub timestamp: DateTime<Utc>,
    /// Principal that issued the request
    pub requestor: String,
    /// The extracted operation
    pub operation: KubernetesOperation,
    /// Response code; 0 when absent
    pub response_error_code: i64,
    /// Response status message; empty when absent
    pub response_error_message: String,
    /// Captured request payload
    pub request: Option<Value>,
    /// Captured response payload
    pub response: Option<Value>,
    /// Classification of the request payload
    pub request_type: BodyType,
    /// Classification of the response payload
    pub response_type: BodyType,
    /// Response indicated an error
    pub is_error_response: bool,
    /// Entry synthesized by delete-collection fan-out
    pub generated_from_delete_collection: bool,
}

impl ParsedAuditLog {
    /// `apiVersion`/`kind` of a payload, when stated
    #[must_use]
    pub fn payload_kind(payload: Option<&Value>) -> Option<(String, String)> {
        let payload = payload?;
        let kind = payload.get("kind")?.as_str()?;
        let api_version = payload
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or("");
        Some((api_version.to_string(), kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_kind_reads_api_version_and_kind() {
        let payload = json!({"apiVersion": "v1", "kind": "Binding"});
        assert_eq!(
            ParsedAuditLog::payload_kind(Some(&payload)),
            Some(("v1".to_string(), "Binding".to_string()))
        );
        assert_eq!(ParsedAuditLog::payload_kind(None), None);
        assert_eq!(
            ParsedAuditLog::payload_kind(Some(&json!({"apiVersion": "v1"}))),
            None
        );
    }
}
