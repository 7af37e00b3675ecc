//! Task execution interceptors
//!
//! Stackable middleware around every task body. An interceptor sees the
//! context, the task, and a [`Next`] handle it may call (or not) to
//! continue the chain.

use crate::context::TaskContext;
use crate::metadata::ErrorSetMetadata;
use crate::task::{TaskDefinition, TaskError, TaskFuture, TaskResult, TaskRunFn};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Middleware around task execution
#[async_trait]
pub trait TaskInterceptor: Send + Sync {
    /// Wrap one task invocation
    async fn intercept(
        &self,
        ctx: TaskContext,
        task: Arc<TaskDefinition>,
        next: Next,
    ) -> Result<TaskResult, TaskError>;
}

/// Remainder of the interceptor chain, ending at the task body
pub struct Next {
    chain: Arc<[Arc<dyn TaskInterceptor>]>,
    index: usize,
    run: TaskRunFn,
}

impl Next {
    /// Chain head over `interceptors`, terminating at `run`
    #[must_use]
    pub fn head(interceptors: Arc<[Arc<dyn TaskInterceptor>]>, run: TaskRunFn) -> Self {
        Self {
            chain: interceptors,
            index: 0,
            run,
        }
    }

    /// Invoke the rest of the chain
    #[must_use]
    pub fn call(self, ctx: TaskContext, task: Arc<TaskDefinition>) -> TaskFuture {
        Box::pin(async move {
            if let Some(interceptor) = self.chain.get(self.index).cloned() {
                let next = Self {
                    chain: self.chain,
                    index: self.index + 1,
                    run: self.run,
                };
                interceptor.intercept(ctx, task, next).await
            } else {
                (self.run)(ctx).await
            }
        })
    }
}

/// Logs task start, finish and duration through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInterceptor;

#[async_trait]
impl TaskInterceptor for TracingInterceptor {
    async fn intercept(
        &self,
        ctx: TaskContext,
        task: Arc<TaskDefinition>,
        next: Next,
    ) -> Result<TaskResult, TaskError> {
        let id = task.id().clone();
        let started = Instant::now();
        debug!(task = %id, mode = ?ctx.mode(), "task starting");
        let result = next.call(ctx, task).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => debug!(task = %id, ?elapsed, "task finished"),
            Err(err) => warn!(task = %id, ?elapsed, %err, "task failed"),
        }
        result
    }
}

/// Appends task failures to the error-set metadata for post-mortem
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorReportInterceptor;

#[async_trait]
impl TaskInterceptor for ErrorReportInterceptor {
    async fn intercept(
        &self,
        ctx: TaskContext,
        task: Arc<TaskDefinition>,
        next: Next,
    ) -> Result<TaskResult, TaskError> {
        let id = task.id().clone();
        let metadata = Arc::clone(ctx.metadata());
        let result = next.call(ctx, task).await;
        if let Err(err) = &result {
            if !matches!(err, TaskError::Cancelled) {
                metadata
                    .get_or_init::<ErrorSetMetadata>()
                    .add_for_task(id.to_string(), err.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TaskId;
    use crate::label::LabelSet;
    use crate::task::RunMode;
    use parking_lot::Mutex;

    struct OrderProbe {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl TaskInterceptor for OrderProbe {
        async fn intercept(
            &self,
            ctx: TaskContext,
            task: Arc<TaskDefinition>,
            next: Next,
        ) -> Result<TaskResult, TaskError> {
            self.seen.lock().push(self.name);
            next.call(ctx, task).await
        }
    }

    fn probe_task() -> Arc<TaskDefinition> {
        TaskDefinition::new(
            TaskId::new("test/probe"),
            vec![],
            LabelSet::new(),
            |_ctx| async { Ok("done".to_string()) },
        )
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Arc<[Arc<dyn TaskInterceptor>]> = Arc::from(vec![
            Arc::new(OrderProbe {
                name: "outer",
                seen: Arc::clone(&seen),
            }) as Arc<dyn TaskInterceptor>,
            Arc::new(OrderProbe {
                name: "inner",
                seen: Arc::clone(&seen),
            }),
        ]);

        let task = probe_task();
        let ctx = TaskContext::new(RunMode::Run, "test");
        let result = Next::head(interceptors, Arc::clone(task.run_fn()))
            .call(ctx, task)
            .await
            .unwrap();

        assert_eq!(*result.downcast::<String>().unwrap(), "done");
        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn error_reporter_records_failures() {
        let task = TaskDefinition::new(
            TaskId::new("test/fails"),
            vec![],
            LabelSet::new(),
            |_ctx| async {
                Err::<(), _>(TaskError::failed(&TaskId::new("test/fails"), "boom"))
            },
        );
        let interceptors: Arc<[Arc<dyn TaskInterceptor>]> =
            Arc::from(vec![Arc::new(ErrorReportInterceptor) as Arc<dyn TaskInterceptor>]);
        let ctx = TaskContext::new(RunMode::Run, "test");

        let result = Next::head(interceptors, Arc::clone(task.run_fn()))
            .call(ctx.clone(), task)
            .await;
        assert!(result.is_err());

        let errors = ctx.metadata().get_or_init::<ErrorSetMetadata>();
        assert_eq!(errors.count(), 1);
        assert!(errors.reports()[0].message.contains("boom"));
    }
}
