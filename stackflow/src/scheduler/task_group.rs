//! Bounded task group that waits for every task.

use crate::errors::{Result, StackflowError};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// The outcome of one task of a group.
#[derive(Debug)]
pub struct TaskResult<T> {
    /// Label given when the task was spawned.
    pub label: String,
    /// What the task returned.
    pub result: Result<T>,
}

/// A group of tasks running at most `limit` at a time.
///
/// Unlike a fail-fast group, a failing task never cancels its siblings:
/// [`join`](Self::join) returns exactly one result per spawned task, in
/// completion order. A panicking task is reported as an internal error.
pub struct BoundedTaskGroup<T> {
    semaphore: Arc<Semaphore>,
    sender: mpsc::UnboundedSender<TaskResult<T>>,
    receiver: mpsc::UnboundedReceiver<TaskResult<T>>,
    launched: usize,
}

impl<T: Send + 'static> BoundedTaskGroup<T> {
    /// Creates a group running at most `limit` tasks concurrently.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
            sender,
            receiver,
            launched: 0,
        }
    }

    /// Spawns a task. It starts once a slot is free.
    pub fn spawn<F>(&mut self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let semaphore = self.semaphore.clone();
        let sender = self.sender.clone();
        self.launched += 1;

        tokio::spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => AssertUnwindSafe(task)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(StackflowError::Internal(format!("task '{label}' panicked")))
                    }),
                Err(_) => Err(StackflowError::Internal("task group closed".to_string())),
            };
            // The receiver only goes away if the group was dropped without joining.
            let _ = sender.send(TaskResult { label, result });
        });
    }

    /// Returns the number of spawned tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.launched
    }

    /// Returns true if nothing was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.launched == 0
    }

    /// Waits for every spawned task.
    ///
    /// `on_result` sees each result as it arrives, with the number of results
    /// received so far.
    pub async fn join<F>(self, mut on_result: F) -> Vec<TaskResult<T>>
    where
        F: FnMut(usize, &TaskResult<T>),
    {
        let Self {
            sender,
            mut receiver,
            launched,
            ..
        } = self;
        drop(sender);

        let mut results = Vec::with_capacity(launched);
        while results.len() < launched {
            let Some(result) = receiver.recv().await else {
                break;
            };
            on_result(results.len() + 1, &result);
            results.push(result);
        }
        results
    }
}

impl<T> std::fmt::Debug for BoundedTaskGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedTaskGroup")
            .field("launched", &self.launched)
            .field("available", &self.semaphore.available_permits())
            .finish()
    }
}
