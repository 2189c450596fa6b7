//! Deferred work requested by index modules while a block is connected.
//!
//! Modules enqueue a [`Task`] through the scheduler handle exposed by the
//! builder context. The crawler drains the queue between blocks, runs each
//! task and hands the [`TaskResult`] back to the owning module.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::IndexerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Key of the index module that owns the task.
    pub index: String,
    /// Block height that produced the task.
    pub height: i64,
    /// Task kind understood by the executor (e.g. `"script"`).
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: Task,
    /// `Ok(data)` on success, `Err(reason)` when the executor gave up.
    pub outcome: Result<serde_json::Value, String>,
}

/// Cloneable sending side handed to index modules.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    tx: mpsc::Sender<Task>,
}

/// Receiving side owned by the crawler.
#[derive(Debug)]
pub struct TaskQueue {
    rx: mpsc::Receiver<Task>,
}

impl TaskScheduler {
    /// Create a scheduler and its queue holding at most `capacity` tasks.
    pub fn channel(capacity: usize) -> (TaskScheduler, TaskQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (TaskScheduler { tx }, TaskQueue { rx })
    }

    /// Enqueue a task without waiting. Fails when the queue is full or closed.
    pub fn enqueue(&self, task: Task) -> Result<(), IndexerError> {
        self.tx
            .try_send(task)
            .map_err(|e| IndexerError::Other(format!("task queue: {e}")))
    }
}

impl TaskQueue {
    /// Take every task currently queued.
    pub fn drain(&mut self) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Ok(task) = self.rx.try_recv() {
            tasks.push(task);
        }
        tasks
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
