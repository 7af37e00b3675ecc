//! Dispatch-level runs of the kind-specific recorders

use khi_audit::{
    rebuild_timeline, AuditLogExtractor, JsonAuditExtractor, ManifestTimelines,
    MergeConfigRegistry, ParsedAuditLog, TimelineGrouper,
};
use khi_chunk::{ChunkStore, ChunkStoreConfig};
use khi_history::{HistoryBuilder, ResourcePath, RevisionState};
use khi_log::LogId;
use khi_recorder::recorders::{
    container_status_recorder, endpoint_slice_recorder, lease_recorder, node_recorder,
};
use khi_recorder::{dispatch_recorder, Recorder};
use khi_test_utils::{manifest, AuditLogBuilder};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn history() -> (Arc<HistoryBuilder>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ChunkStore::new(ChunkStoreConfig::new(dir.path())));
    (Arc::new(HistoryBuilder::new(store)), dir)
}

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

async fn dispatch(
    recorder: Recorder,
    builders: Vec<AuditLogBuilder>,
    history: &Arc<HistoryBuilder>,
) {
    let grouped = TimelineGrouper::new().group(parse_all(builders));
    let registry = MergeConfigRegistry::new();
    let timelines = ManifestTimelines {
        timelines: grouped
            .groups
            .into_iter()
            .map(|(path, logs)| rebuild_timeline(path, logs, &registry))
            .collect(),
    };
    dispatch_recorder(
        &Arc::new(recorder),
        &timelines,
        history,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn container_state_transitions_become_subresource_revisions() {
    let (history, _dir) = history();
    let mut waiting = manifest("v1", "Pod", "default", "web", "uid-1");
    waiting["status"] = json!({"containerStatuses": [
        {"name": "app", "state": {"waiting": {"reason": "ContainerCreating"}}},
    ]});
    let mut running = waiting.clone();
    running["status"]["containerStatuses"][0]["state"] =
        json!({"running": {"startedAt": "2024-04-01T10:01:00Z"}});

    dispatch(
        container_status_recorder(),
        vec![
            AuditLogBuilder::new("create", "pods", "default", "web")
                .at("2024-04-01T10:00:00Z")
                .response(waiting.clone()),
            // Same state again: no new revision expected.
            AuditLogBuilder::new("update", "pods", "default", "web")
                .at("2024-04-01T10:00:30Z")
                .response(waiting),
            AuditLogBuilder::new("update", "pods", "default", "web")
                .at("2024-04-01T10:01:00Z")
                .response(running),
        ],
        &history,
    )
    .await;

    let container = history.timeline(&ResourcePath::from("core/v1#pod#default#web#app"));
    let revisions = container.revisions();
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].state, RevisionState::ContainerWaiting);
    assert_eq!(revisions[1].state, RevisionState::ContainerRunning);
    assert!(revisions.iter().all(|r| r.partial));
}

#[tokio::test]
async fn lease_events_only_on_holder_change() {
    let (history, _dir) = history();
    let lease_body = |holder: &str| {
        let mut body = manifest("coordination.k8s.io/v1", "Lease", "kube-system", "lock", "uid-l");
        body["spec"] = json!({"holderIdentity": holder});
        body
    };

    dispatch(
        lease_recorder(),
        vec![
            AuditLogBuilder::new("update", "leases", "kube-system", "lock")
                .api_group("coordination.k8s.io")
                .at("2024-04-01T10:00:00Z")
                .response(lease_body("controller-a")),
            // Renewal by the same holder: no event.
            AuditLogBuilder::new("update", "leases", "kube-system", "lock")
                .api_group("coordination.k8s.io")
                .at("2024-04-01T10:00:30Z")
                .response(lease_body("controller-a")),
            AuditLogBuilder::new("update", "leases", "kube-system", "lock")
                .api_group("coordination.k8s.io")
                .at("2024-04-01T10:01:00Z")
                .response(lease_body("controller-b")),
        ],
        &history,
    )
    .await;

    let lease = history.timeline(&ResourcePath::from(
        "coordination.k8s.io/v1#lease#kube-system#lock",
    ));
    assert_eq!(lease.events().len(), 2);
    let decoration = history.log_decoration(LogId(2)).unwrap();
    assert!(decoration
        .annotations
        .iter()
        .any(|a| a.key == "leaseHolder" && a.value == "controller-b"));
}

#[tokio::test]
async fn endpoint_slices_mark_target_pods() {
    let (history, _dir) = history();
    let mut slice = manifest("discovery.k8s.io/v1", "EndpointSlice", "default", "svc-abc", "uid-s");
    slice["endpoints"] = json!([
        {
            "conditions": {"ready": true},
            "nodeName": "node-1",
            "targetRef": {"kind": "Pod", "name": "web-1", "namespace": "default"},
        },
        {
            "conditions": {"ready": false},
            "targetRef": {"kind": "Pod", "name": "web-2", "namespace": "default"},
        },
    ]);

    dispatch(
        endpoint_slice_recorder(),
        vec![AuditLogBuilder::new("update", "endpointslices", "default", "svc-abc")
            .api_group("discovery.k8s.io")
            .at("2024-04-01T10:00:00Z")
            .response(slice)],
        &history,
    )
    .await;

    for pod in ["web-1", "web-2"] {
        let path = ResourcePath::resource("core/v1", "pod", "default", pod);
        assert_eq!(history.timeline(&path).events().len(), 1);
    }
    let node = ResourcePath::from("core/v1#node#cluster-scope#node-1");
    assert_eq!(history.timeline(&node).events().len(), 1);
    let decoration = history.log_decoration(LogId(0)).unwrap();
    assert!(decoration
        .annotations
        .iter()
        .any(|a| a.key == "readyEndpoints" && a.value == "1/2"));
}

#[tokio::test]
async fn node_readiness_transitions_annotated() {
    let (history, _dir) = history();
    let node_body = |ready: &str| {
        let mut body = manifest("v1", "Node", "", "node-1", "uid-n");
        body["status"] = json!({"conditions": [{"type": "Ready", "status": ready}]});
        body
    };

    dispatch(
        node_recorder(),
        vec![
            AuditLogBuilder::new("update", "nodes", "", "node-1")
                .at("2024-04-01T10:00:00Z")
                .response(node_body("True")),
            AuditLogBuilder::new("update", "nodes", "", "node-1")
                .at("2024-04-01T10:01:00Z")
                .response(node_body("True")),
            AuditLogBuilder::new("update", "nodes", "", "node-1")
                .at("2024-04-01T10:02:00Z")
                .response(node_body("False")),
        ],
        &history,
    )
    .await;

    let node = history.timeline(&ResourcePath::from("core/v1#node#cluster-scope#node-1"));
    // One event per transition: unknown -> ready, ready -> not ready.
    assert_eq!(node.events().len(), 2);
    let decoration = history.log_decoration(LogId(2)).unwrap();
    assert!(decoration
        .annotations
        .iter()
        .any(|a| a.key == "nodeReady" && a.value == "False"));
}
