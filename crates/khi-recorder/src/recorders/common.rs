//! The resource recorder
//!
//! Visits every resource-layer timeline and records one revision per
//! mutation log: summary, severity, terminal state, and the inferred
//! creation revision when the first observed log is well after
//! `metadata.creationTimestamp`.

use super::{metadata_timestamp, RESOURCE_LAYER_DEPTH};
use crate::recorder::{RecordRequest, Recorder, RecorderError, RecorderState};
use chrono::Duration;
use khi_audit::{BodyType, TimelineEntry};
use khi_history::{ChangeSet, ResourcePath, RevisionState, RevisionVerb, StagedRevision};
use khi_log::Severity;

/// Body of an inferred creation revision
pub const INFERRED_CREATE_BODY: &str =
    "# Existence inferred from metadata.creationTimestamp; the manifest at creation was not captured.\n";

/// Gap between creation timestamp and first log that triggers inference
const INFERRED_CREATE_GAP_SECONDS: i64 = 10;

/// The resource recorder
#[must_use]
pub fn resource_recorder() -> Recorder {
    Recorder::new("resource", handle).with_group_filter(|path: &ResourcePath| {
        path.depth() == RESOURCE_LAYER_DEPTH
    })
}

fn terminal_state(entry: &TimelineEntry) -> RevisionState {
    let deletion = metadata_timestamp(entry.body.as_ref(), "deletionTimestamp");
    match entry.parsed.operation.verb {
        RevisionVerb::Delete => {
            let grace = entry
                .body
                .as_ref()
                .and_then(|b| b.get("metadata")?.get("deletionGracePeriodSeconds")?.as_i64())
                .unwrap_or(0);
            if deletion.is_some() && grace > 0 {
                RevisionState::Deleting
            } else {
                RevisionState::Deleted
            }
        }
        _ => {
            if deletion.is_some() {
                RevisionState::Deleting
            } else {
                RevisionState::Existing
            }
        }
    }
}

fn handle(
    request: &RecordRequest<'_>,
    changeset: &mut ChangeSet,
    state: Option<RecorderState>,
) -> Result<Option<RecorderState>, RecorderError> {
    let entry = request.entry;
    let parsed = &entry.parsed;
    let seen_before = state.is_some();

    changeset.set_summary(parsed.operation.describe());

    if parsed.is_error_response {
        changeset.set_severity(Severity::Error);
        changeset.add_event(request.path.clone());
        return Ok(Some(state.unwrap_or_else(|| Box::new(()))));
    }

    if !seen_before {
        if let Some(created) = metadata_timestamp(entry.body.as_ref(), "creationTimestamp") {
            if parsed.timestamp - created >= Duration::seconds(INFERRED_CREATE_GAP_SECONDS) {
                changeset.add_revision(
                    request.path.clone(),
                    StagedRevision {
                        verb: RevisionVerb::Create,
                        state: RevisionState::Inferred,
                        requestor: String::new(),
                        change_time: created,
                        body: INFERRED_CREATE_BODY.to_string(),
                        partial: false,
                        inferred: true,
                    },
                );
            }
        }
    }

    changeset.add_revision(
        request.path.clone(),
        StagedRevision {
            verb: parsed.operation.verb,
            state: terminal_state(entry),
            requestor: parsed.requestor.clone(),
            change_time: parsed.timestamp,
            body: entry.body_yaml.clone(),
            partial: parsed.response.is_none() && parsed.request_type == BodyType::Patch,
            inferred: parsed.generated_from_delete_collection,
        },
    );

    Ok(Some(Box::new(())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use khi_audit::{rebuild_timeline, JsonAuditExtractor, MergeConfigRegistry, TimelineGrouper};
    use khi_audit::AuditLogExtractor;
    use khi_chunk::{ChunkStore, ChunkStoreConfig};
    use khi_history::HistoryBuilder;
    use khi_log::LogId;
    use khi_test_utils::{manifest, AuditLogBuilder};
    use std::sync::Arc;

    fn builder() -> (Arc<HistoryBuilder>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChunkStore::new(ChunkStoreConfig::new(dir.path())));
        (Arc::new(HistoryBuilder::new(store)), dir)
    }

    async fn record(
        builders: Vec<AuditLogBuilder>,
        history: &Arc<HistoryBuilder>,
    ) -> ResourcePath {
        let parsed: Vec<_> = builders
            .into_iter()
            .enumerate()
            .map(|(i, b)| {
                JsonAuditExtractor
                    .extract(LogId(i), &b.build_arc())
                    .unwrap()
            })
            .collect();
        let grouped = TimelineGrouper::new().group(parsed);
        let (path, logs) = grouped.groups.into_iter().next().unwrap();
        let timeline = rebuild_timeline(path.clone(), logs, &MergeConfigRegistry::new());
        let recorder = Arc::new(resource_recorder());
        crate::dispatch::dispatch_recorder(
            &recorder,
            &khi_audit::ManifestTimelines {
                timelines: vec![timeline],
            },
            history,
            &tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap();
        path
    }

    #[tokio::test]
    async fn records_revision_with_summary() {
        let (history, _dir) = builder();
        let pod = manifest("v1", "Pod", "default", "a", "uid-1");
        let path = record(
            vec![AuditLogBuilder::new("create", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .response(pod)],
            &history,
        )
        .await;

        let revisions = history.timeline(&path).revisions();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].verb, RevisionVerb::Create);
        assert_eq!(revisions[0].state, RevisionState::Existing);
        assert_eq!(
            history.log_decoration(LogId(0)).unwrap().summary.as_deref(),
            Some("create pod default/a")
        );
    }

    #[tokio::test]
    async fn inferred_creation_when_first_log_is_late() {
        let (history, _dir) = builder();
        let mut pod = manifest("v1", "Pod", "default", "a", "uid-1");
        pod["metadata"]["creationTimestamp"] = serde_json::json!("2024-04-01T09:00:00Z");
        let path = record(
            vec![AuditLogBuilder::new("update", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .response(pod)],
            &history,
        )
        .await;

        let revisions = history.timeline(&path).revisions();
        assert_eq!(revisions.len(), 2);
        assert!(revisions[0].inferred);
        assert_eq!(revisions[0].state, RevisionState::Inferred);
        assert_eq!(
            revisions[0].change_time.to_rfc3339(),
            "2024-04-01T09:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn no_inferred_creation_within_gap() {
        let (history, _dir) = builder();
        let mut pod = manifest("v1", "Pod", "default", "a", "uid-1");
        pod["metadata"]["creationTimestamp"] = serde_json::json!("2024-04-01T09:59:55Z");
        let path = record(
            vec![AuditLogBuilder::new("create", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .response(pod)],
            &history,
        )
        .await;
        assert_eq!(history.timeline(&path).revisions().len(), 1);
    }

    #[tokio::test]
    async fn error_response_sets_severity_and_event() {
        let (history, _dir) = builder();
        let path = record(
            vec![AuditLogBuilder::new("delete", "pods", "default", "a")
                .at("2024-04-01T10:00:00Z")
                .status(404, "not found")],
            &history,
        )
        .await;

        assert_eq!(history.timeline(&path).revisions().len(), 0);
        assert_eq!(history.timeline(&path).events().len(), 1);
        assert_eq!(
            history.log_decoration(LogId(0)).unwrap().severity,
            Some(Severity::Error)
        );
    }

    #[tokio::test]
    async fn delete_records_deleted_state() {
        let (history, _dir) = builder();
        let pod = manifest("v1", "Pod", "default", "a", "uid-1");
        let path = record(
            vec![
                AuditLogBuilder::new("create", "pods", "default", "a")
                    .at("2024-04-01T10:00:00Z")
                    .response(pod.clone()),
                AuditLogBuilder::new("delete", "pods", "default", "a")
                    .at("2024-04-01T10:05:00Z")
                    .response(pod),
            ],
            &history,
        )
        .await;

        let revisions = history.timeline(&path).revisions();
        assert_eq!(revisions.last().unwrap().state, RevisionState::Deleted);
    }
}
