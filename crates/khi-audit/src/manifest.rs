//! Stage 3: manifest reconstruction
//!
//! Per timeline, logs are walked in order and each gets the resource body
//! as it stood after that operation: full manifests replace the baseline,
//! patches merge into it, error responses and synthesized deletes inherit
//! it verbatim. A `metadata.uid` change resets the baseline, since the
//! resource was recreated under the same name.

use crate::group::GroupedLogs;
use crate::merge::{strip_type_marker, MergeConfigRegistry};
use crate::parsed::{BodyType, ParsedAuditLog};
use crate::AuditError;
use khi_history::ResourcePath;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default worker bound for reconstruction (one worker per timeline)
pub const DEFAULT_REBUILD_WORKERS: usize = 16;

/// Body emitted for metadata-level audit logs that carry no payload
pub const BODY_PLACEHOLDER: &str =
    "# The resource body was not recorded on this audit log.\n";

/// One log of a timeline with its reconstructed body
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    /// The parsed log
    pub parsed: ParsedAuditLog,
    /// YAML rendering of the body as of this log
    pub body_yaml: String,
    /// Structured body, when one is known
    pub body: Option<Value>,
    /// `metadata.uid` as of this log; empty when never observed
    pub resource_uid: String,
}

/// One timeline with reconstructed bodies
#[derive(Debug, Clone)]
pub struct ManifestTimeline {
    pub path: ResourcePath,
    pub entries: Vec<TimelineEntry>,
}

/// Stage output: every timeline, in grouping order
#[derive(Debug, Default)]
pub struct ManifestTimelines {
    pub timelines: Vec<ManifestTimeline>,
}

impl ManifestTimelines {
    /// Timeline by path
    #[must_use]
    pub fn get(&self, path: &ResourcePath) -> Option<&ManifestTimeline> {
        self.timelines.iter().find(|t| t.path == *path)
    }
}

fn payload_uid(payload: &Value) -> Option<&str> {
    payload.get("metadata")?.get("uid")?.as_str()
}

fn to_yaml(value: &Value) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|_| BODY_PLACEHOLDER.to_string())
}

/// Rebuild one timeline sequentially
///
/// Sequential because every patch merge depends on the body produced by
/// the previous log.
#[must_use]
pub fn rebuild_timeline(
    path: ResourcePath,
    logs: Vec<ParsedAuditLog>,
    merge_config: &MergeConfigRegistry,
) -> ManifestTimeline {
    let kind = logs
        .first()
        .map(|l| l.operation.singular_kind.clone())
        .unwrap_or_default();

    let mut entries = Vec::with_capacity(logs.len());
    let mut baseline = Value::Null;
    let mut baseline_yaml = String::new();
    let mut uid = String::new();

    for parsed in logs {
        if parsed.is_error_response || parsed.generated_from_delete_collection {
            // Inherit the previous body verbatim.
            entries.push(TimelineEntry {
                parsed,
                body_yaml: if baseline_yaml.is_empty() {
                    BODY_PLACEHOLDER.to_string()
                } else {
                    baseline_yaml.clone()
                },
                body: (!baseline.is_null()).then(|| baseline.clone()),
                resource_uid: uid.clone(),
            });
            continue;
        }

        let (payload, payload_type) = match (&parsed.response, parsed.response_type) {
            (Some(response), BodyType::Manifest | BodyType::DeleteOptions) => {
                (Some(response.clone()), parsed.response_type)
            }
            _ => (parsed.request.clone(), parsed.request_type),
        };

        let Some(payload) = payload else {
            // Metadata-level audit: nothing to advance the baseline with.
            entries.push(TimelineEntry {
                parsed,
                body_yaml: BODY_PLACEHOLDER.to_string(),
                body: None,
                resource_uid: uid.clone(),
            });
            continue;
        };
        let payload = strip_type_marker(&payload);

        if let Some(new_uid) = payload_uid(&payload) {
            if !uid.is_empty() && new_uid != uid {
                // Same name, different uid: the resource was recreated and
                // the old body must not leak into the new one.
                baseline = Value::Null;
                baseline_yaml.clear();
            }
            uid = new_uid.to_string();
        }

        match payload_type {
            BodyType::Patch => {
                baseline = merge_config.strategic_merge(&baseline, &payload, &kind);
                baseline_yaml = to_yaml(&baseline);
            }
            BodyType::DeleteOptions => {
                // DeleteOptions carries no body; keep the previous one.
            }
            BodyType::Manifest => {
                baseline = payload;
                baseline_yaml = to_yaml(&baseline);
            }
            BodyType::Status | BodyType::Unknown => {
                entries.push(TimelineEntry {
                    parsed,
                    body_yaml: BODY_PLACEHOLDER.to_string(),
                    body: None,
                    resource_uid: uid.clone(),
                });
                continue;
            }
        }

        entries.push(TimelineEntry {
            parsed,
            body_yaml: if baseline_yaml.is_empty() {
                BODY_PLACEHOLDER.to_string()
            } else {
                baseline_yaml.clone()
            },
            body: (!baseline.is_null()).then(|| baseline.clone()),
            resource_uid: uid.clone(),
        });
    }

    ManifestTimeline { path, entries }
}

/// Run the reconstruction stage: one bounded worker per timeline
///
/// # Errors
/// [`AuditError::Cancelled`] between timelines; worker failures otherwise.
pub async fn rebuild_manifests(
    grouped: GroupedLogs,
    merge_config: Arc<MergeConfigRegistry>,
    worker_count: usize,
    cancel: &CancellationToken,
    on_timeline: impl Fn() + Send + Sync + 'static,
) -> Result<ManifestTimelines, AuditError> {
    let semaphore = Arc::new(Semaphore::new(worker_count.max(1)));
    let on_timeline = Arc::new(on_timeline);
    let mut workers: JoinSet<(usize, ManifestTimeline)> = JoinSet::new();

    for (index, (path, logs)) in grouped.groups.into_iter().enumerate() {
        if cancel.is_cancelled() {
            workers.abort_all();
            return Err(AuditError::Cancelled);
        }
        let merge_config = Arc::clone(&merge_config);
        let semaphore = Arc::clone(&semaphore);
        let on_timeline = Arc::clone(&on_timeline);
        workers.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let timeline = rebuild_timeline(path, logs, &merge_config);
            on_timeline();
            (index, timeline)
        });
    }

    let mut slots: Vec<Option<ManifestTimeline>> = Vec::new();
    while let Some(joined) = workers.join_next().await {
        let (index, timeline) = joined.map_err(|e| AuditError::Worker(e.to_string()))?;
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        slots[index] = Some(timeline);
    }

    let timelines: Vec<ManifestTimeline> = slots.into_iter().flatten().collect();
    debug!(timelines = timelines.len(), "reconstruction stage finished");
    Ok(ManifestTimelines { timelines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{AuditLogExtractor, JsonAuditExtractor};
    use crate::group::TimelineGrouper;
    use khi_log::LogId;
    use khi_test_utils::{manifest, AuditLogBuilder};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse_all(builders: Vec<AuditLogBuilder>) -> Vec<ParsedAuditLog> {
        builders
            .into_iter()
            .enumerate()
            .map(|(i, b)| {
                JsonAuditExtractor
                    .extract(LogId(i), &b.build_arc())
                    .unwrap()
            })
            .collect()
    }

    fn rebuild(builders: Vec<AuditLogBuilder>) -> ManifestTimelines {
        let grouped = TimelineGrouper::new().group(parse_all(builders));
        let mut timelines = Vec::new();
        for (path, logs) in grouped.groups {
            timelines.push(rebuild_timeline(path, logs, &MergeConfigRegistry::new()));
        }
        ManifestTimelines { timelines }
    }

    #[test]
    fn full_manifest_becomes_body() {
        let pod = manifest("v1", "Pod", "default", "a", "uid-1");
        let result = rebuild(vec![AuditLogBuilder::new("create", "pods", "default", "a")
            .at("2024-04-01T10:00:00Z")
            .response(pod.clone())]);
        let entry = &result.timelines[0].entries[0];
        assert_eq!(entry.body.as_ref().unwrap(), &pod);
        assert!(entry.body_yaml.contains("kind: Pod"));
        assert_eq!(entry.resource_uid, "uid-1");
    }

    #[test]
    fn patch_merges_into_previous_body() {
        let mut pod = manifest("v1", "Pod", "default", "a", "uid-1");
        pod["metadata"]["labels"] = json!({"app": "web"});
        let result = rebuild(vec![
            AuditLogBuilder::new("create", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .response(pod),
            AuditLogBuilder::new("patch", "pods", "default", "a")
                .at("2024-04-01T10:01:00Z")
                .request(json!({"metadata": {"labels": {"tier": "front"}}})),
        ]);
        let entry = &result.timelines[0].entries[1];
        let labels = &entry.body.as_ref().unwrap()["metadata"]["labels"];
        assert_eq!(labels["app"], "web");
        assert_eq!(labels["tier"], "front");
    }

    #[test]
    fn uid_change_resets_merge_baseline() {
        let result = rebuild(vec![
            AuditLogBuilder::new("patch", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .request(json!({
                    "metadata": {"uid": "uid-1", "labels": {"from-first": "yes"}},
                })),
            AuditLogBuilder::new("patch", "pods", "default", "a")
                .at("2024-04-01T10:05:00Z")
                .request(json!({
                    "metadata": {"uid": "uid-2", "labels": {"from-second": "yes"}},
                })),
        ]);
        let entries = &result.timelines[0].entries;
        assert_eq!(
            entries[0].body.as_ref().unwrap()["metadata"]["labels"]["from-first"],
            "yes"
        );
        // The recreated resource must not inherit labels from the old uid.
        let second_labels = &entries[1].body.as_ref().unwrap()["metadata"]["labels"];
        assert!(second_labels.get("from-first").is_none());
        assert_eq!(second_labels["from-second"], "yes");
        assert_eq!(entries[1].resource_uid, "uid-2");
    }

    #[test]
    fn error_responses_inherit_previous_body() {
        let pod = manifest("v1", "Pod", "default", "a", "uid-1");
        let result = rebuild(vec![
            AuditLogBuilder::new("create", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .response(pod.clone()),
            AuditLogBuilder::new("update", "pods", "default", "a")
                .at("2024-04-01T10:01:00Z")
                .status(409, "conflict"),
        ]);
        let entries = &result.timelines[0].entries;
        assert_eq!(entries[1].body.as_ref().unwrap(), &pod);
        assert_eq!(entries[1].body_yaml, entries[0].body_yaml);
    }

    #[test]
    fn delete_options_inherits_previous_body() {
        let pod = manifest("v1", "Pod", "default", "a", "uid-1");
        let result = rebuild(vec![
            AuditLogBuilder::new("create", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .response(pod.clone()),
            AuditLogBuilder::new("delete", "pods", "default", "a")
                .at("2024-04-01T10:02:00Z")
                .request(json!({"apiVersion": "v1", "kind": "DeleteOptions"})),
        ]);
        let entries = &result.timelines[0].entries;
        assert_eq!(entries[1].body.as_ref().unwrap(), &pod);
    }

    #[test]
    fn metadata_level_audit_gets_placeholder() {
        let result = rebuild(vec![AuditLogBuilder::new("create", "pods", "default", "a")
            .at("2024-04-01T10:00:00Z")]);
        let entry = &result.timelines[0].entries[0];
        assert_eq!(entry.body_yaml, BODY_PLACEHOLDER);
        assert!(entry.body.is_none());
    }

    #[test]
    fn type_marker_stripped_from_bodies() {
        let result = rebuild(vec![AuditLogBuilder::new("create", "pods", "default", "a")
            .at("2024-04-01T10:00:00Z")
            .response(json!({
                "@type": "type.googleapis.com/core.v1.Pod",
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "a"},
            }))]);
        let entry = &result.timelines[0].entries[0];
        assert!(!entry.body_yaml.contains("@type"));
        assert!(entry.body.as_ref().unwrap().get("@type").is_none());
    }

    #[tokio::test]
    async fn parallel_rebuild_preserves_group_order() {
        let grouped = TimelineGrouper::new().group(parse_all(vec![
            AuditLogBuilder::new("create", "pods", "default", "a").at("2024-04-01T10:00:00Z"),
            AuditLogBuilder::new("create", "pods", "default", "b").at("2024-04-01T10:00:01Z"),
        ]));
        let order: Vec<ResourcePath> = grouped.groups.keys().cloned().collect();
        let rebuilt = rebuild_manifests(
            grouped,
            Arc::new(MergeConfigRegistry::new()),
            4,
            &CancellationToken::new(),
            || {},
        )
        .await
        .unwrap();
        let rebuilt_order: Vec<ResourcePath> =
            rebuilt.timelines.iter().map(|t| t.path.clone()).collect();
        assert_eq!(order, rebuilt_order);
    }
}
