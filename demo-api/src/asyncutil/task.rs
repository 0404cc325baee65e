use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use error_stack::{Context, Report, Result, ResultExt};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The Task trait defines a container that allows easy creation, movement, storage and execution of cancellable async behaviour
#[async_trait]
pub trait Task {
    type Output;

    fn create<Fut>(task: impl FnOnce(CancellationToken) -> Fut + Send + 'static) -> Self
    where
        Fut: Future<Output = Self::Output> + Send + 'static;

    async fn run(self, token: CancellationToken) -> Self::Output;
}

/// An awaitable action that can be cancelled. Boxed and pinned so it can be stored
/// next to tasks with different concrete types
pub type CancellableTask<Output> =
    Box<dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Output> + Send>> + Send>;

#[async_trait]
impl<T> Task for CancellableTask<T> {
    type Output = T;

    fn create<Fut>(task: impl FnOnce(CancellationToken) -> Fut + Send + 'static) -> Self
    where
        Fut: Future<Output = Self::Output> + Send + 'static,
    {
        Box::new(move |token: CancellationToken| Box::pin(task(token)))
    }

    async fn run(self, token: CancellationToken) -> Self::Output {
        self(token).await
    }
}

#[derive(Error, Debug)]
#[error("task {0} failed")]
pub struct TaskError(String);

/// A named set of tasks that live and die together.
///
/// All tasks start at the same time. As soon as one of them stops, for whatever reason,
/// the others are cancelled. Errors and panics of all tasks are collected into one report.
pub struct TaskGroup<E>
where
    E: From<TaskError> + Context,
{
    name: String,
    tasks: Vec<(String, CancellableTask<Result<(), E>>)>,
}

impl<E> TaskGroup<E>
where
    E: From<TaskError> + Context,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: vec![],
        }
    }

    /// The added task won't be started until [TaskGroup::run] is called
    pub fn add_task(
        mut self,
        name: impl Into<String>,
        task: CancellableTask<Result<(), E>>,
    ) -> Self {
        self.tasks.push((name.into(), task));
        self
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), E> {
        info!(group = %self.name, tasks = self.tasks.len(), "starting tasks");

        let mut running_tasks = JoinSet::new();
        for (name, task) in self.tasks {
            // child tokens: a task cancelling its own token must not stop its siblings
            let token = token.child_token();
            running_tasks.spawn(async move {
                let result = task(token).await;
                (name, result)
            });
        }

        wait_for_completion(&self.name, &mut running_tasks, &token).await
    }
}

async fn wait_for_completion<E>(
    group: &str,
    running_tasks: &mut JoinSet<(String, Result<(), E>)>,
    token: &CancellationToken,
) -> Result<(), E>
where
    E: From<TaskError> + Context,
{
    let mut final_result: Result<(), E> = Ok(());
    let total_task_count = running_tasks.len();

    while let Some(task_result) = running_tasks.join_next().await {
        // cancelling an already cancelled token is a no-op
        token.cancel();

        let err = match task_result {
            Ok((name, Ok(()))) => {
                info!(group, task = %name, "task stopped");
                None
            }
            Ok((name, Err(err))) => {
                warn!(group, task = %name, "task stopped with an error");
                Some(err.change_context(E::from(TaskError(name))))
            }
            Err(join_err) => {
                warn!(group, "task panicked or was aborted");
                Some(Report::new(join_err).change_context(E::from(TaskError(group.to_string()))))
            }
        };

        info!(
            group,
            "shutting down tasks ({}/{})",
            total_task_count.saturating_sub(running_tasks.len()),
            total_task_count
        );

        final_result = match (final_result, err) {
            (result, None) => result,
            (Ok(()), Some(err)) => Err(err),
            (Err(mut report), Some(err)) => {
                report.extend_one(err);
                Err(report)
            }
        };
    }

    final_result
}
