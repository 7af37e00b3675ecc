//! End-to-end inspection runs over fixture audit logs
//!
//! Drives the full graph (ingest, extract, group, rebuild, record,
//! serialize) through the task runner, the way the run controller does.

use khi_audit::tasks::{refs as audit_refs, HISTORY_BUILDER};
use khi_audit::JsonAuditExtractor;
use khi_history::{ResourcePath, RevisionState};
use khi_log::Log;
use khi_recorder::tasks::{default_inspection_tasks, refs};
use khi_task::{
    labels, FormField, FormFieldsMetadata, InspectionType, IoConfig, LabelSet, QueryMetadata,
    RunMode, TaskContext, TaskDefinition, TaskId, TaskRunner, TaskSet, TracingInterceptor,
    IO_CONFIG,
};
use khi_test_utils::{manifest, AuditLogBuilder};
use serde_json::json;
use std::sync::Arc;

/// Fixture log source: serves `logs` in run mode, populates the form in
/// dry-run
fn source_task(logs: Vec<Arc<Log>>) -> Arc<TaskDefinition> {
    TaskDefinition::new(
        TaskId::with_implementation(audit_refs::SOURCE_AUDIT_LOGS.reference(), "fixture"),
        vec![],
        LabelSet::new().with(labels::TITLE, "Fixture audit logs".to_string()),
        move |ctx: TaskContext| {
            let logs = logs.clone();
            async move {
                if ctx.is_dry_run() {
                    ctx.metadata().get_or_init::<FormFieldsMetadata>().upsert(
                        FormField::text("duration", "Query duration")
                            .with_default("1h")
                            .with_priority(10),
                    );
                    ctx.metadata()
                        .get_or_init::<QueryMetadata>()
                        .set("audit", "protoPayload.methodName:\"io.k8s\"");
                    return Ok(Vec::<Arc<Log>>::new());
                }
                Ok(logs)
            }
        },
    )
}

fn task_set(logs: Vec<Arc<Log>>) -> TaskSet {
    let mut set = TaskSet::new();
    set.add_inspection_type(InspectionType::new("gke", "GKE"))
        .unwrap();
    set.register(source_task(logs)).unwrap();
    for task in default_inspection_tasks(Arc::new(JsonAuditExtractor)) {
        set.register(task).unwrap();
    }
    set
}

async fn run_inspection(logs: Vec<Arc<Log>>, mode: RunMode) -> (TaskContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("tmp");
    let data = dir.path().join("data");
    std::fs::create_dir_all(&temp).unwrap();
    std::fs::create_dir_all(&data).unwrap();

    let set = task_set(logs);
    let runnable = set
        .resolve(&[refs::AUDIT_FEATURE.reference().to_string()], "gke")
        .unwrap();

    let ctx = TaskContext::new(mode, "gke");
    ctx.inspection().insert(
        IO_CONFIG,
        IoConfig {
            temporary_dir: temp,
            data_dir: data,
        },
    );

    let handle = TaskRunner::new(runnable)
        .with_interceptor(Arc::new(TracingInterceptor))
        .start(ctx);
    let ctx = handle.wait().await.unwrap();
    (ctx, dir)
}

#[tokio::test]
async fn inspection_builds_history_and_artifact() {
    let pod = manifest("v1", "Pod", "default", "nginx", "uid-1");
    let logs = vec![
        AuditLogBuilder::new("create", "pods", "default", "nginx")
            .at("2024-04-01T10:00:00Z")
            .response(pod.clone())
            .build_arc(),
        AuditLogBuilder::new("patch", "pods", "default", "nginx")
            .at("2024-04-01T10:01:00Z")
            .request(json!({"metadata": {"labels": {"app": "web"}}}))
            .build_arc(),
        AuditLogBuilder::new("delete", "pods", "default", "nginx")
            .at("2024-04-01T10:02:00Z")
            .response(pod)
            .build_arc(),
    ];

    let (ctx, dir) = run_inspection(logs, RunMode::Run).await;
    let builder = ctx.inspection().get(HISTORY_BUILDER).unwrap();

    let timeline = builder.timeline(&ResourcePath::from("core/v1#pod#default#nginx"));
    let revisions = timeline.revisions();
    assert_eq!(revisions.len(), 3);
    assert_eq!(revisions.last().unwrap().state, RevisionState::Deleted);
    // Revisions sorted ascending and every body resolvable.
    for pair in revisions.windows(2) {
        assert!(pair[0].change_time <= pair[1].change_time);
    }
    for revision in &revisions {
        assert!(builder.chunk_store().read(&revision.body).await.is_ok());
    }

    // The artifact landed in the data dir with the size the header records.
    let artifact = dir.path().join("data").join("gke.khi");
    let header = ctx.metadata().get_or_init::<khi_task::HeaderMetadata>();
    assert_eq!(
        std::fs::metadata(&artifact).unwrap().len(),
        header.file_size().unwrap()
    );
}

#[tokio::test]
async fn delete_collection_fans_out_to_existing_pods() {
    let pod = manifest("v1", "Pod", "default", "foo", "uid-1");
    let logs = vec![
        AuditLogBuilder::new("create", "pods", "default", "foo")
            .at("2024-04-01T09:00:00Z")
            .response(pod)
            .build_arc(),
        AuditLogBuilder::new("deletecollection", "pods", "default", "")
            .at("2024-04-01T10:00:00Z")
            .build_arc(),
    ];

    let (ctx, _dir) = run_inspection(logs, RunMode::Run).await;
    let builder = ctx.inspection().get(HISTORY_BUILDER).unwrap();

    let revisions = builder
        .timeline(&ResourcePath::from("core/v1#pod#default#foo"))
        .revisions();
    assert_eq!(revisions.len(), 2);
    let synthesized = revisions.last().unwrap();
    assert_eq!(synthesized.state, RevisionState::Deleted);
    assert!(synthesized.inferred);
    assert_eq!(
        synthesized.change_time.to_rfc3339(),
        "2024-04-01T10:00:00+00:00"
    );
}

#[tokio::test]
async fn parent_deletion_propagates_to_owned_pods() {
    let mut pod = manifest("v1", "Pod", "default", "web-abc", "uid-pod");
    pod["metadata"]["ownerReferences"] = json!([{
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "name": "web",
        "uid": "uid-dep",
        "controller": true,
    }]);
    let deployment = manifest("apps/v1", "Deployment", "default", "web", "uid-dep");

    let logs = vec![
        AuditLogBuilder::new("create", "deployments", "default", "web")
            .api_group("apps")
            .at("2024-04-01T09:00:00Z")
            .response(deployment.clone())
            .build_arc(),
        AuditLogBuilder::new("create", "pods", "default", "web-abc")
            .at("2024-04-01T09:01:00Z")
            .response(pod.clone())
            .build_arc(),
        AuditLogBuilder::new("patch", "pods", "default", "web-abc")
            .at("2024-04-01T09:02:00Z")
            .request(json!({"metadata": {"labels": {"ready": "true"}}}))
            .build_arc(),
        AuditLogBuilder::new("delete", "deployments", "default", "web")
            .api_group("apps")
            .at("2024-04-01T09:30:00Z")
            .response(deployment)
            .build_arc(),
    ];

    let (ctx, _dir) = run_inspection(logs, RunMode::Run).await;
    let builder = ctx.inspection().get(HISTORY_BUILDER).unwrap();

    let pod_path = ResourcePath::from("core/v1#pod#default#web-abc");
    let revisions = builder.timeline(&pod_path).revisions();
    let synthesized = revisions.last().unwrap();
    assert_eq!(synthesized.state, RevisionState::Deleted);
    assert!(synthesized.inferred);
    // At the parent's deletion timestamp, after the pod's own last log.
    assert_eq!(
        synthesized.change_time.to_rfc3339(),
        "2024-04-01T09:30:00+00:00"
    );

    // The owner alias landed as well.
    let aliases = builder.aliases_of(&pod_path);
    assert!(aliases
        .iter()
        .any(|a| a.as_str() == "apps/v1#deployment#default#web#web-abc"));
}

#[tokio::test]
async fn dry_run_populates_form_without_touching_history() {
    let logs = vec![AuditLogBuilder::new("create", "pods", "default", "nginx")
        .at("2024-04-01T10:00:00Z")
        .build_arc()];

    let (ctx, dir) = run_inspection(logs, RunMode::DryRun).await;

    // No history builder was ever materialized and no artifact written.
    assert!(ctx.inspection().get(HISTORY_BUILDER).is_none());
    assert!(!dir.path().join("data").join("gke.khi").exists());

    // The form and query preview are fully populated for the UI.
    let form = ctx.metadata().get_or_init::<FormFieldsMetadata>();
    assert!(!form.is_empty());
    assert_eq!(form.fields()[0].id, "duration");
    let queries = ctx.metadata().get_or_init::<QueryMetadata>();
    assert_eq!(queries.entries().len(), 1);
}

#[tokio::test]
async fn binding_subresource_grouped_and_recorded() {
    let logs = vec![
        AuditLogBuilder::new("create", "pods", "default", "foo")
            .at("2024-04-01T10:00:00Z")
            .response(manifest("v1", "Pod", "default", "foo", "uid-1"))
            .build_arc(),
        AuditLogBuilder::new("create", "pods", "default", "foo")
            .at("2024-04-01T10:00:05Z")
            .subresource("binding")
            .request(json!({
                "apiVersion": "v1",
                "kind": "Binding",
                "target": {"kind": "Node", "name": "node-1"},
            }))
            .response(json!({"apiVersion": "v1", "kind": "Status", "status": "Success"}))
            .build_arc(),
    ];

    let (ctx, _dir) = run_inspection(logs, RunMode::Run).await;
    let builder = ctx.inspection().get(HISTORY_BUILDER).unwrap();

    // Grouped at the binding subresource despite the Status response.
    let binding_path = ResourcePath::from("core/v1#pod#default#foo#binding");
    assert_eq!(builder.timeline(&binding_path).revisions().len(), 1);

    // The target node timeline received the scheduling event.
    let node_path = ResourcePath::from("core/v1#node#cluster-scope#node-1");
    assert_eq!(builder.timeline(&node_path).events().len(), 1);
}
