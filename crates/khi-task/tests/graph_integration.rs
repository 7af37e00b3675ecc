//! Cross-module runs of the task graph engine

use khi_task::{
    labels, ErrorReportInterceptor, ErrorSetMetadata, InspectionType, LabelSet, RunMode,
    TaskContext, TaskDefinition, TaskError, TaskId, TaskReference, TaskRunner, TaskSet,
};
use std::sync::Arc;

static IP_MAP: TaskReference<Vec<(String, String)>> = TaskReference::new("discovery/ip-map");
static MERGED: TaskReference<usize> = TaskReference::new("merge/node-logs");

/// Discovery provider: ip to vm-name pairs
fn discovery_task() -> Arc<TaskDefinition> {
    TaskDefinition::new(
        TaskId::new(IP_MAP.reference()),
        vec![],
        LabelSet::new(),
        |ctx: TaskContext| async move {
            if ctx.is_dry_run() {
                return Ok(Vec::new());
            }
            Ok(vec![("10.0.0.1".to_string(), "vm-a".to_string())])
        },
    )
}

/// Consumer that reads the discovery output optionally
fn merger_task() -> Arc<TaskDefinition> {
    TaskDefinition::new(
        TaskId::new(MERGED.reference()),
        vec![],
        LabelSet::new()
            .with(labels::FEATURE, true)
            .with(labels::SUBSEQUENT_TASKS, vec![IP_MAP.reference().to_string()]),
        |ctx: TaskContext| async move {
            // A missing discovery result is legal; the merge degrades.
            let mapped = ctx.optional_result(IP_MAP).map_or(0, |m| m.len());
            Ok(mapped)
        },
    )
}

fn set_with(tasks: Vec<Arc<TaskDefinition>>) -> TaskSet {
    let mut set = TaskSet::new();
    set.add_inspection_type(InspectionType::new("gke", "GKE"))
        .unwrap();
    for task in tasks {
        set.register(task).unwrap();
    }
    set
}

#[tokio::test]
async fn discovery_provider_pulled_in_and_read_optionally() {
    let set = set_with(vec![discovery_task(), merger_task()]);
    let runnable = set
        .resolve(&[MERGED.reference().to_string()], "gke")
        .unwrap();
    assert!(runnable.contains(IP_MAP.reference()));

    let handle = TaskRunner::new(runnable).start(TaskContext::new(RunMode::Run, "gke"));
    let ctx = handle.wait().await.unwrap();
    // The provider ran first, so the consumer saw its output.
    assert_eq!(*ctx.result(MERGED).unwrap(), 1);
}

#[tokio::test]
async fn consumer_degrades_without_provider() {
    // The provider is not registered at all; the subsequent ref is skipped.
    let set = set_with(vec![merger_task()]);
    let runnable = set
        .resolve(&[MERGED.reference().to_string()], "gke")
        .unwrap();
    assert!(!runnable.contains(IP_MAP.reference()));

    let handle = TaskRunner::new(runnable).start(TaskContext::new(RunMode::Run, "gke"));
    let ctx = handle.wait().await.unwrap();
    assert_eq!(*ctx.result(MERGED).unwrap(), 0);
}

#[tokio::test]
async fn error_reporter_feeds_error_set_metadata() {
    let failing = TaskDefinition::new(
        TaskId::new("always/fails"),
        vec![],
        LabelSet::new().with(labels::FEATURE, true),
        |_ctx: TaskContext| async {
            Err::<(), _>(TaskError::failed(&TaskId::new("always/fails"), "no quota"))
        },
    );
    let set = set_with(vec![failing]);
    let runnable = set.resolve(&["always/fails".to_string()], "gke").unwrap();

    let handle = TaskRunner::new(runnable)
        .with_interceptor(Arc::new(ErrorReportInterceptor))
        .start(TaskContext::new(RunMode::Run, "gke"));
    let ctx = handle.context().clone();
    assert!(handle.wait().await.is_err());

    let errors = ctx.metadata().get_or_init::<ErrorSetMetadata>();
    assert_eq!(errors.count(), 1);
    assert!(errors.reports()[0].message.contains("no quota"));
    assert_eq!(
        errors.reports()[0].task.as_deref(),
        Some("always/fails@default")
    );
}

#[tokio::test]
async fn dry_run_produces_empty_containers() {
    let set = set_with(vec![discovery_task(), merger_task()]);
    let runnable = set
        .resolve(&[MERGED.reference().to_string()], "gke")
        .unwrap();
    let handle = TaskRunner::new(runnable).start(TaskContext::new(RunMode::DryRun, "gke"));
    let ctx = handle.wait().await.unwrap();
    assert!(ctx.result(IP_MAP).unwrap().is_empty());
}
