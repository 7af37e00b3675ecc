//! Cloud Logging audit extractor
//!
//! Cloud Logging wraps Kubernetes audit entries in an `AuditLog` proto:
//! the operation lives in `protoPayload.methodName`
//! (`io.k8s.core.v1.pods.binding.create`) and `protoPayload.resourceName`
//! (`core/v1/namespaces/default/pods/foo/binding`), the principal in
//! `protoPayload.authenticationInfo.principalEmail`, and the outcome in a
//! gRPC-style `protoPayload.status`. Payloads carry `@type` markers
//! instead of a `kind`.

use crate::extract::{classify_payload, AuditLogExtractor};
use crate::operation::KubernetesOperation;
use crate::parsed::ParsedAuditLog;
use crate::AuditError;
use chrono::{DateTime, Utc};
use khi_history::{RevisionVerb, CLUSTER_SCOPE};
use khi_log::{CommonFieldSet, K8sAuditFieldSet, Log, LogId, Severity};
use serde_json::Value;
use std::sync::Arc;

/// Extractor for Cloud Logging `k8s.io` audit entries
#[derive(Debug, Default, Clone, Copy)]
pub struct GcpAuditExtractor;

/// Parsed `protoPayload.methodName`
///
/// Shape: `io.k8s.<group>.<version>.<plural>[.<subresource>].<verb>`, with
/// `core` standing in for the empty group.
struct MethodName {
    api_version: String,
    plural: String,
    subresource: String,
    verb: RevisionVerb,
}

fn parse_method_name(method: &str) -> Option<MethodName> {
    let segments: Vec<&str> = method.split('.').collect();
    // io, k8s, group, version, plural, [subresource], verb
    if segments.len() < 6 || segments[0] != "io" || segments[1] != "k8s" {
        return None;
    }
    let group = segments[2];
    let version = segments[3];
    let plural = segments[4];
    let (subresource, verb) = match segments.len() {
        6 => ("", segments[5]),
        7 => (segments[5], segments[6]),
        _ => return None,
    };
    Some(MethodName {
        api_version: format!("{group}/{version}"),
        plural: plural.to_string(),
        subresource: subresource.to_string(),
        verb: RevisionVerb::parse(verb),
    })
}

/// Parsed `protoPayload.resourceName`
///
/// `core/v1/namespaces/default/pods/foo[/binding]` for namespaced
/// resources, `core/v1/nodes/node-1` for cluster-scoped ones. Collection
/// operations stop at the plural segment.
fn parse_resource_name(resource_name: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = resource_name.split('/').collect();
    if segments.len() < 3 {
        return None;
    }
    // segments[0..2] repeat group/version; the interesting part follows.
    if segments[2] == "namespaces" && segments.len() >= 4 {
        let namespace = segments[3].to_string();
        let name = segments.get(5).unwrap_or(&"").to_string();
        Some((namespace, name))
    } else {
        let name = segments.get(3).unwrap_or(&"").to_string();
        Some((CLUSTER_SCOPE.to_string(), name))
    }
}

impl GcpAuditExtractor {
    fn timestamp(log: &Log) -> Result<DateTime<Utc>, AuditError> {
        if let Ok(t) = log.timestamp() {
            return Ok(t);
        }
        let raw = log.read_str_or("timestamp", "");
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| AuditError::Extract("entry carries no timestamp".to_string()))
    }
}

impl AuditLogExtractor for GcpAuditExtractor {
    fn extract(&self, log_id: LogId, log: &Arc<Log>) -> Result<ParsedAuditLog, AuditError> {
        let reader = log.reader();
        let method = log.read_str_or("protoPayload.methodName", "");
        let parsed_method = parse_method_name(method).ok_or_else(|| {
            AuditError::Extract(format!("unrecognized methodName '{method}'"))
        })?;

        let resource_name = log.read_str_or("protoPayload.resourceName", "");
        let (namespace, name) = parse_resource_name(resource_name).ok_or_else(|| {
            AuditError::Extract(format!("unrecognized resourceName '{resource_name}'"))
        })?;

        let operation = KubernetesOperation {
            api_version: parsed_method.api_version.clone(),
            singular_kind: KubernetesOperation::singularize(&parsed_method.plural),
            plural_kind: parsed_method.plural,
            namespace,
            name,
            subresource: parsed_method.subresource,
            verb: parsed_method.verb,
        };

        let timestamp = Self::timestamp(log)?;
        let requestor = log
            .read_str_or("protoPayload.authenticationInfo.principalEmail", "")
            .to_string();

        // gRPC status: zero or absent means success.
        let status_code = reader.read_i64("protoPayload.status.code").unwrap_or(0);
        let status_message = log
            .read_str_or("protoPayload.status.message", "")
            .to_string();
        let is_error = status_code != 0;

        let request = reader.value("protoPayload.request").cloned();
        let response = reader.value("protoPayload.response").cloned();
        let request_type =
            classify_payload(request.as_ref(), operation.verb == RevisionVerb::Patch);
        let response_type = classify_payload(response.as_ref(), false);

        let operation_id = log.read_str_or("operation.id", "").to_string();
        log.set_field_set(Arc::new(K8sAuditFieldSet {
            operation_id,
            is_first: reader.read_bool("operation.first").unwrap_or(true),
            is_last: reader.read_bool("operation.last").unwrap_or(true),
            principal: requestor.clone(),
            status_code,
            status_message: status_message.clone(),
            is_error,
            request: reader.reader("protoPayload.request"),
            response: reader.reader("protoPayload.response"),
        }));
        if log.field_set::<CommonFieldSet>().is_none() {
            log.set_field_set(Arc::new(CommonFieldSet {
                timestamp,
                severity: Severity::parse(log.read_str_or("severity", "")),
                display_id: log.read_str_or("insertId", "").to_string(),
            }));
        }

        Ok(ParsedAuditLog {
            log: Arc::clone(log),
            log_id,
            timestamp,
            requestor,
            operation,
            response_error_code: status_code,
            response_error_message: status_message,
            request,
            response,
            request_type,
            response_type,
            is_error_response: is_error,
            generated_from_delete_collection: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::TimelineGrouper;
    use crate::parsed::BodyType;
    use khi_history::ResourcePath;
    use serde_json::json;

    fn gcp_log(method: &str, resource_name: &str, extra: Value) -> Arc<Log> {
        let mut body = json!({
            "insertId": "ins-1",
            "timestamp": "2024-04-01T10:00:00Z",
            "severity": "NOTICE",
            "protoPayload": {
                "@type": "type.googleapis.com/google.cloud.audit.AuditLog",
                "methodName": method,
                "resourceName": resource_name,
                "authenticationInfo": {"principalEmail": "admin@example.com"},
            },
        });
        if let Value::Object(extra_fields) = extra {
            let payload = body["protoPayload"].as_object_mut().unwrap();
            for (k, v) in extra_fields {
                payload.insert(k, v);
            }
        }
        Arc::new(Log::new(body).unwrap())
    }

    #[test]
    fn method_name_with_subresource() {
        let m = parse_method_name("io.k8s.core.v1.pods.binding.create").unwrap();
        assert_eq!(m.api_version, "core/v1");
        assert_eq!(m.plural, "pods");
        assert_eq!(m.subresource, "binding");
        assert_eq!(m.verb, RevisionVerb::Create);
    }

    #[test]
    fn method_name_without_subresource() {
        let m = parse_method_name("io.k8s.apps.v1.deployments.update").unwrap();
        assert_eq!(m.api_version, "apps/v1");
        assert_eq!(m.subresource, "");
        assert!(parse_method_name("compute.instances.insert").is_none());
    }

    #[test]
    fn resource_name_variants() {
        assert_eq!(
            parse_resource_name("core/v1/namespaces/default/pods/foo").unwrap(),
            ("default".to_string(), "foo".to_string())
        );
        assert_eq!(
            parse_resource_name("core/v1/namespaces/default/pods").unwrap(),
            ("default".to_string(), String::new())
        );
        assert_eq!(
            parse_resource_name("core/v1/nodes/node-1").unwrap(),
            (CLUSTER_SCOPE.to_string(), "node-1".to_string())
        );
    }

    #[test]
    fn extracts_full_operation() {
        let log = gcp_log(
            "io.k8s.core.v1.pods.create",
            "core/v1/namespaces/default/pods/foo",
            json!({"response": {"@type": "core.k8s.io/v1.Pod", "apiVersion": "v1", "kind": "Pod"}}),
        );
        let parsed = GcpAuditExtractor.extract(LogId(0), &log).unwrap();
        assert_eq!(parsed.operation.api_version, "core/v1");
        assert_eq!(parsed.operation.singular_kind, "pod");
        assert_eq!(parsed.requestor, "admin@example.com");
        assert_eq!(parsed.response_type, BodyType::Manifest);
        assert!(!parsed.is_error_response);
        assert_eq!(parsed.log.display_id(), "ins-1");
    }

    #[test]
    fn grpc_status_marks_errors() {
        let log = gcp_log(
            "io.k8s.core.v1.pods.delete",
            "core/v1/namespaces/default/pods/gone",
            json!({"status": {"code": 5, "message": "not found"}}),
        );
        let parsed = GcpAuditExtractor.extract(LogId(0), &log).unwrap();
        assert!(parsed.is_error_response);
        assert_eq!(parsed.response_error_message, "not found");
    }

    #[test]
    fn binding_groups_at_subresource() {
        let log = gcp_log(
            "io.k8s.core.v1.pods.binding.create",
            "core/v1/namespaces/default/pods/foo/binding",
            json!({"response": {"apiVersion": "v1", "kind": "Binding"}}),
        );
        let parsed = GcpAuditExtractor.extract(LogId(0), &log).unwrap();
        let grouped = TimelineGrouper::new().group(vec![parsed]);
        assert!(grouped
            .groups
            .contains_key(&ResourcePath::from("core/v1#pod#default#foo#binding")));
    }

    #[test]
    fn delete_options_payload_classified() {
        let log = gcp_log(
            "io.k8s.core.v1.pods.delete",
            "core/v1/namespaces/default/pods/foo",
            json!({"request": {"@type": "k8s.io/v1.DeleteOptions"}}),
        );
        let parsed = GcpAuditExtractor.extract(LogId(0), &log).unwrap();
        assert_eq!(parsed.request_type, BodyType::DeleteOptions);
    }
}
