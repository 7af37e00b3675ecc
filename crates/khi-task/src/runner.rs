//! The parallel task runner
//!
//! Every task of the runnable set is spawned up front; each waits for its
//! dependencies through watch channels, then runs under a semaphore bound.
//! The first failure (by wall-clock completion) cancels the shared context;
//! peers observe cancellation at their next suspension point.

use crate::context::TaskContext;
use crate::interceptor::{Next, TaskInterceptor};
use crate::metadata::{HeaderMetadata, PlanMetadata};
use crate::progress::ProgressRegistry;
use crate::registry::RunnableTaskSet;
use crate::task::TaskError;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

/// Default bound on concurrently executing tasks
const DEFAULT_CONCURRENCY: usize = 16;

/// Executes a resolved task set
pub struct TaskRunner {
    set: RunnableTaskSet,
    interceptors: Vec<Arc<dyn TaskInterceptor>>,
    concurrency: usize,
}

impl TaskRunner {
    /// Runner over `set` with default concurrency
    #[must_use]
    pub fn new(set: RunnableTaskSet) -> Self {
        Self {
            set,
            interceptors: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Push an interceptor; outermost first
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn TaskInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Override the concurrency bound
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Start the run; returns immediately with a waiter
    #[must_use]
    pub fn start(self, ctx: TaskContext) -> RunHandle {
        let interceptors: Arc<[Arc<dyn TaskInterceptor>]> = Arc::from(self.interceptors);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let first_error: Arc<Mutex<Option<TaskError>>> = Arc::new(Mutex::new(None));

        let metadata = ctx.metadata();
        metadata
            .get_or_init::<PlanMetadata>()
            .set_tasks(self.set.task_ids());
        let header = metadata.get_or_init::<HeaderMetadata>();
        header.set_inspection_type(ctx.inspection_type());
        header.set_start_time(Utc::now());

        for task in self.set.tasks() {
            let label = task
                .labels()
                .title()
                .unwrap_or_else(|| task.id().reference().to_string());
            ctx.progress().register(task.id().to_string(), label);
        }

        let mut senders: HashMap<String, watch::Sender<bool>> = HashMap::new();
        let mut receivers: HashMap<String, watch::Receiver<bool>> = HashMap::new();
        for task in self.set.tasks() {
            let (tx, rx) = watch::channel(false);
            senders.insert(task.id().reference().to_string(), tx);
            receivers.insert(task.id().reference().to_string(), rx);
        }

        let mut join_set = JoinSet::new();
        for task in self.set.tasks() {
            let task = Arc::clone(task);
            let ctx = ctx.clone();
            let interceptors = Arc::clone(&interceptors);
            let semaphore = Arc::clone(&semaphore);
            let first_error = Arc::clone(&first_error);
            let done_tx = senders
                .remove(task.id().reference())
                .unwrap_or_else(|| watch::channel(false).0);
            let dep_rxs: Vec<watch::Receiver<bool>> = task
                .dependencies()
                .iter()
                .filter_map(|dep| receivers.get(dep).cloned())
                .collect();

            join_set.spawn(run_one(
                task,
                ctx,
                interceptors,
                semaphore,
                first_error,
                done_tx,
                dep_rxs,
            ));
        }
        drop(receivers);

        let header_for_driver = header;
        let driver_error = Arc::clone(&first_error);
        let driver_ctx = ctx.clone();
        let driver: JoinHandle<()> = tokio::spawn(async move {
            while join_set.join_next().await.is_some() {}
            header_for_driver.set_end_time(Utc::now());
            if driver_ctx.is_cancelled() && driver_error.lock().is_none() {
                *driver_error.lock() = Some(TaskError::Cancelled);
            }
            debug!("task run finished");
        });

        RunHandle {
            driver,
            ctx,
            first_error,
        }
    }
}

async fn run_one(
    task: Arc<crate::task::TaskDefinition>,
    ctx: TaskContext,
    interceptors: Arc<[Arc<dyn TaskInterceptor>]>,
    semaphore: Arc<Semaphore>,
    first_error: Arc<Mutex<Option<TaskError>>>,
    done_tx: watch::Sender<bool>,
    dep_rxs: Vec<watch::Receiver<bool>>,
) {
    let id_string = task.id().to_string();
    let cancel = ctx.cancellation().clone();

    for mut rx in dep_rxs {
        tokio::select! {
            () = cancel.cancelled() => {
                ctx.progress().mark_cancelled(&id_string);
                return;
            }
            ready = rx.wait_for(|done| *done) => {
                if ready.is_err() {
                    // Producer dropped without completing; the run is
                    // coming down.
                    ctx.progress().mark_cancelled(&id_string);
                    return;
                }
            }
        }
    }

    let permit = tokio::select! {
        () = cancel.cancelled() => {
            ctx.progress().mark_cancelled(&id_string);
            return;
        }
        permit = semaphore.acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        ctx.progress().mark_cancelled(&id_string);
        return;
    };
    if cancel.is_cancelled() {
        ctx.progress().mark_cancelled(&id_string);
        return;
    }

    ctx.progress().mark_running(&id_string);
    let reference = task.id().reference().to_string();
    let run = Arc::clone(task.run_fn());
    let result = Next::head(interceptors, run).call(ctx.clone(), task).await;

    match result {
        Ok(value) => {
            ctx.set_result(&reference, value);
            ctx.progress().mark_done(&id_string);
            let _ = done_tx.send(true);
        }
        Err(err) => {
            ctx.progress().mark_error(&id_string, err.to_string());
            {
                let mut slot = first_error.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
            cancel.cancel();
        }
    }
}

/// Waiter over a started run
pub struct RunHandle {
    driver: JoinHandle<()>,
    ctx: TaskContext,
    first_error: Arc<Mutex<Option<TaskError>>>,
}

impl RunHandle {
    /// Wait for every task to settle
    ///
    /// Returns the context (carrying results, metadata and progress) on
    /// success.
    ///
    /// # Errors
    /// The first task error by wall-clock completion, or
    /// [`TaskError::Cancelled`] when the run was cancelled externally.
    pub async fn wait(self) -> Result<TaskContext, TaskError> {
        let _ = self.driver.await;
        let error = self.first_error.lock().take();
        match error {
            Some(err) => Err(err),
            None => Ok(self.ctx),
        }
    }

    /// Cancel the run; in-flight tasks stop at their next suspension point
    pub fn cancel(&self) {
        self.ctx.cancellation().cancel();
    }

    /// Progress accessor usable while the run executes
    #[must_use]
    pub fn progress(&self) -> Arc<ProgressRegistry> {
        Arc::clone(self.ctx.progress())
    }

    /// The run's context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }
}
