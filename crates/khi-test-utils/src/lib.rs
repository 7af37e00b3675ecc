//! Testing utilities for the KHI workspace
//!
//! Builders for Kubernetes audit log fixtures shaped like upstream audit
//! events, plus small manifest helpers.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use khi_log::{CommonFieldSet, Log, Severity};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Builder for one audit log fixture
///
/// Produces the upstream audit event shape the default extractor reads:
/// `verb`, `user.username`, `objectRef.*`, `responseStatus.*`,
/// `requestObject`, `responseObject`. The common field set is attached with
/// the configured timestamp.
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    verb: String,
    resource: String,
    api_group: String,
    api_version: String,
    namespace: String,
    name: String,
    subresource: String,
    principal: String,
    timestamp: String,
    status_code: i64,
    status_message: String,
    audit_id: String,
    request: Option<Value>,
    response: Option<Value>,
}

impl AuditLogBuilder {
    /// Audit entry for `verb` on `resource` (plural) `namespace/name`
    ///
    /// Pass an empty namespace for cluster-scoped resources.
    #[must_use]
    pub fn new(verb: &str, resource: &str, namespace: &str, name: &str) -> Self {
        Self {
            verb: verb.to_string(),
            resource: resource.to_string(),
            api_group: String::new(),
            api_version: "v1".to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            subresource: String::new(),
            principal: "system:admin".to_string(),
            timestamp: "2024-04-01T00:00:00Z".to_string(),
            status_code: 200,
            status_message: String::new(),
            audit_id: format!("audit-{verb}-{name}"),
            request: None,
            response: None,
        }
    }

    /// RFC 3339 timestamp of the entry
    #[must_use]
    pub fn at(mut self, rfc3339: &str) -> Self {
        self.timestamp = rfc3339.to_string();
        self
    }

    /// API group (`apps`); empty means the core group
    #[must_use]
    pub fn api_group(mut self, group: &str) -> Self {
        self.api_group = group.to_string();
        self
    }

    /// API version inside the group (`v1`)
    #[must_use]
    pub fn api_version(mut self, version: &str) -> Self {
        self.api_version = version.to_string();
        self
    }

    /// Subresource the operation targets (`binding`, `status`)
    #[must_use]
    pub fn subresource(mut self, subresource: &str) -> Self {
        self.subresource = subresource.to_string();
        self
    }

    /// Authenticated principal
    #[must_use]
    pub fn principal(mut self, principal: &str) -> Self {
        self.principal = principal.to_string();
        self
    }

    /// Response status code and message
    #[must_use]
    pub fn status(mut self, code: i64, message: &str) -> Self {
        self.status_code = code;
        self.status_message = message.to_string();
        self
    }

    /// Stable audit id
    #[must_use]
    pub fn audit_id(mut self, id: &str) -> Self {
        self.audit_id = id.to_string();
        self
    }

    /// Captured request payload
    #[must_use]
    pub fn request(mut self, payload: Value) -> Self {
        self.request = Some(payload);
        self
    }

    /// Captured response payload
    #[must_use]
    pub fn response(mut self, payload: Value) -> Self {
        self.response = Some(payload);
        self
    }

    /// Build the log and attach its common field set
    #[must_use]
    pub fn build(self) -> Log {
        let mut object_ref = Map::new();
        object_ref.insert("resource".to_string(), json!(self.resource));
        object_ref.insert("apiVersion".to_string(), json!(self.api_version));
        if !self.api_group.is_empty() {
            object_ref.insert("apiGroup".to_string(), json!(self.api_group));
        }
        if !self.namespace.is_empty() {
            object_ref.insert("namespace".to_string(), json!(self.namespace));
        }
        if !self.name.is_empty() {
            object_ref.insert("name".to_string(), json!(self.name));
        }
        if !self.subresource.is_empty() {
            object_ref.insert("subresource".to_string(), json!(self.subresource));
        }

        let mut body = Map::new();
        body.insert("verb".to_string(), json!(self.verb));
        body.insert("auditID".to_string(), json!(self.audit_id));
        body.insert("stage".to_string(), json!("ResponseComplete"));
        body.insert("stageTimestamp".to_string(), json!(self.timestamp));
        body.insert("user".to_string(), json!({"username": self.principal}));
        body.insert("objectRef".to_string(), Value::Object(object_ref));
        let mut status = Map::new();
        status.insert("code".to_string(), json!(self.status_code));
        if !self.status_message.is_empty() {
            status.insert("message".to_string(), json!(self.status_message));
            status.insert("status".to_string(), json!("Failure"));
        }
        body.insert("responseStatus".to_string(), Value::Object(status));
        if let Some(request) = self.request {
            body.insert("requestObject".to_string(), request);
        }
        if let Some(response) = self.response {
            body.insert("responseObject".to_string(), response);
        }

        let timestamp: DateTime<Utc> = self
            .timestamp
            .parse()
            .unwrap_or_else(|_| panic!("fixture timestamp '{}' is not RFC 3339", self.timestamp));

        let log = Log::new(Value::Object(body)).expect("fixture body is an object");
        log.set_field_set(Arc::new(CommonFieldSet {
            timestamp,
            severity: if self.status_code >= 400 {
                Severity::Error
            } else {
                Severity::Info
            },
            display_id: self.audit_id,
        }));
        log
    }

    /// Build wrapped in an `Arc`
    #[must_use]
    pub fn build_arc(self) -> Arc<Log> {
        Arc::new(self.build())
    }
}

/// Minimal manifest payload with `apiVersion`, `kind` and metadata
#[must_use]
pub fn manifest(api_version: &str, kind: &str, namespace: &str, name: &str, uid: &str) -> Value {
    let mut metadata = Map::new();
    metadata.insert("name".to_string(), json!(name));
    if !namespace.is_empty() {
        metadata.insert("namespace".to_string(), json!(namespace));
    }
    if !uid.is_empty() {
        metadata.insert("uid".to_string(), json!(uid));
    }
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": Value::Object(metadata),
    })
}
