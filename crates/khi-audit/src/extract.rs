//! Stage 1: field extraction
//!
//! A provider-specific extractor turns each ingested log into a
//! [`ParsedAuditLog`]. Extraction is data-parallel with a bounded worker
//! count; logs that fail to extract are dropped with a warning and the
//! dropped count is surfaced to the caller.

use crate::operation::KubernetesOperation;
use crate::parsed::{BodyType, ParsedAuditLog};
use crate::AuditError;
use chrono::{DateTime, Utc};
use khi_history::{RevisionVerb, CLUSTER_SCOPE};
use khi_log::{CommonFieldSet, K8sAuditFieldSet, Log, LogId, Severity};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default worker bound for extraction
pub const DEFAULT_EXTRACT_WORKERS: usize = 16;

/// Provider contract: one log in, one parsed record out
///
/// Implementations must also attach the [`K8sAuditFieldSet`] so later
/// consumers can probe payloads without re-parsing.
pub trait AuditLogExtractor: Send + Sync + 'static {
    /// Extract one log
    ///
    /// # Errors
    /// Any failure drops the log from the pipeline (with a warning); it
    /// never aborts the stage.
    fn extract(&self, log_id: LogId, log: &Arc<Log>) -> Result<ParsedAuditLog, AuditError>;
}

/// Result of the extraction stage
#[derive(Debug)]
pub struct ExtractOutcome {
    /// Parsed logs in input order
    pub parsed: Vec<ParsedAuditLog>,
    /// Number of logs dropped by extraction failures
    pub dropped: usize,
}

/// Extractor for logs shaped like upstream Kubernetes audit events
///
/// Reads `verb`, `user.username`, `objectRef.*`, `responseStatus.*`,
/// `requestObject` and `responseObject`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonAuditExtractor;

/// Classify a request or response payload
pub(crate) fn classify_payload(payload: Option<&Value>, is_patch_request: bool) -> BodyType {
    let Some(payload) = payload else {
        return BodyType::Unknown;
    };
    if is_patch_request {
        return BodyType::Patch;
    }
    match payload.get("kind").and_then(Value::as_str) {
        Some("DeleteOptions") => BodyType::DeleteOptions,
        Some("Status") => BodyType::Status,
        Some(_) => BodyType::Manifest,
        None => {
            // protobuf-JSON payloads mark their type instead of a kind
            match payload.get("@type").and_then(Value::as_str) {
                Some(t) if t.ends_with("DeleteOptions") => BodyType::DeleteOptions,
                Some(t) if t.ends_with("Status") => BodyType::Status,
                _ if payload.as_object().is_some_and(|o| !o.is_empty()) => BodyType::Manifest,
                _ => BodyType::Unknown,
            }
        }
    }
}

impl JsonAuditExtractor {
    fn timestamp(log: &Log) -> Result<DateTime<Utc>, AuditError> {
        if let Ok(t) = log.timestamp() {
            return Ok(t);
        }
        for field in ["stageTimestamp", "requestReceivedTimestamp", "timestamp"] {
            let raw = log.read_str_or(field, "");
            if !raw.is_empty() {
                if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
                    return Ok(t.with_timezone(&Utc));
                }
            }
        }
        Err(AuditError::Extract("log carries no timestamp".to_string()))
    }
}

impl AuditLogExtractor for JsonAuditExtractor {
    fn extract(&self, log_id: LogId, log: &Arc<Log>) -> Result<ParsedAuditLog, AuditError> {
        let reader = log.reader();
        let verb_str = log.read_str_or("verb", "");
        if verb_str.is_empty() {
            return Err(AuditError::Extract("missing verb".to_string()));
        }
        let verb = RevisionVerb::parse(verb_str);

        let resource = log.read_str_or("objectRef.resource", "");
        if resource.is_empty() {
            return Err(AuditError::Extract("missing objectRef.resource".to_string()));
        }
        let api_group = log.read_str_or("objectRef.apiGroup", "");
        let api_version_raw = log.read_str_or("objectRef.apiVersion", "v1");
        let namespace = {
            let ns = log.read_str_or("objectRef.namespace", "");
            if ns.is_empty() {
                CLUSTER_SCOPE.to_string()
            } else {
                ns.to_string()
            }
        };

        let operation = KubernetesOperation {
            api_version: KubernetesOperation::qualified_api_version(api_group, api_version_raw),
            plural_kind: resource.to_string(),
            singular_kind: KubernetesOperation::singularize(resource),
            namespace,
            name: log.read_str_or("objectRef.name", "").to_string(),
            subresource: log.read_str_or("objectRef.subresource", "").to_string(),
            verb,
        };

        let timestamp = Self::timestamp(log)?;
        let requestor = log.read_str_or("user.username", "").to_string();

        let status_code = reader.read_i64("responseStatus.code").unwrap_or(0);
        let status_message = log.read_str_or("responseStatus.message", "").to_string();
        let status_failure = log.read_str_or("responseStatus.status", "") == "Failure";
        let is_error = status_code >= 400 || status_failure;

        let request = reader.value("requestObject").cloned();
        let response = reader.value("responseObject").cloned();
        let request_type = classify_payload(request.as_ref(), verb == RevisionVerb::Patch);
        let response_type = classify_payload(response.as_ref(), false);

        let stage = log.read_str_or("stage", "");
        let operation_id = log.read_str_or("auditID", "").to_string();
        log.set_field_set(Arc::new(K8sAuditFieldSet {
            operation_id,
            is_first: stage == "RequestReceived",
            is_last: stage.is_empty() || stage == "ResponseComplete" || stage == "Panic",
            principal: requestor.clone(),
            status_code,
            status_message: status_message.clone(),
            is_error,
            request: reader.reader("requestObject"),
            response: reader.reader("responseObject"),
        }));
        if log.field_set::<CommonFieldSet>().is_none() {
            log.set_field_set(Arc::new(CommonFieldSet {
                timestamp,
                severity: if is_error {
                    Severity::Error
                } else {
                    Severity::Info
                },
                display_id: log.read_str_or("auditID", "").to_string(),
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

/// Run the extraction stage over `logs`
///
/// Parallel across a bounded worker count; output preserves input order.
///
/// # Errors
/// Only [`AuditError::Cancelled`] and worker-level failures abort the
/// stage; per-log failures are dropped and counted.
pub async fn extract_audit_logs(
    logs: Vec<(LogId, Arc<Log>)>,
    extractor: Arc<dyn AuditLogExtractor>,
    worker_count: usize,
    cancel: &CancellationToken,
    on_item: impl Fn() + Send + Sync + 'static,
) -> Result<ExtractOutcome, AuditError> {
    let semaphore = Arc::new(Semaphore::new(worker_count.max(1)));
    let on_item = Arc::new(on_item);
    let mut workers: JoinSet<(usize, Option<ParsedAuditLog>)> = JoinSet::new();

    for (index, (log_id, log)) in logs.into_iter().enumerate() {
        if cancel.is_cancelled() {
            workers.abort_all();
            return Err(AuditError::Cancelled);
        }
        let extractor = Arc::clone(&extractor);
        let semaphore = Arc::clone(&semaphore);
        let on_item = Arc::clone(&on_item);
        workers.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, None);
            };
            let parsed = match extractor.extract(log_id, &log) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(%log_id, %err, "dropping unparseable audit log");
                    None
                }
            };
            on_item();
            (index, parsed)
        });
    }

    let mut slots: Vec<Option<ParsedAuditLog>> = Vec::new();
    let mut dropped = 0usize;
    while let Some(joined) = workers.join_next().await {
        let (index, parsed) = joined.map_err(|e| AuditError::Worker(e.to_string()))?;
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        if parsed.is_none() {
            dropped += 1;
        }
        slots[index] = parsed;
    }

    let parsed: Vec<ParsedAuditLog> = slots.into_iter().flatten().collect();
    if dropped > 0 {
        warn!(dropped, "audit logs dropped during extraction");
    }
    debug!(parsed = parsed.len(), dropped, "extraction stage finished");
    Ok(ExtractOutcome { parsed, dropped })
}
