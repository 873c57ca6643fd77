//! Task queue — priority-ordered pool of assignable work items.
//!
//! Queued tasks are ordered by priority descending, FIFO within equal
//! priority. A task is assigned to at most one worker at a time, and every
//! task assigned to an evicted worker returns to the queue with its
//! assignment cleared — nothing is silently lost.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TaskError;

/// Valid priority range for submitted tasks.
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Status of a task.
///
/// `Assigned` carries the worker id, so a task assigned to an evicted
/// worker is unrepresentable once the cascade clears the assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Assigned { worker_id: String },
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_assigned_to(&self, worker_id: &str) -> bool {
        matches!(self, Self::Assigned { worker_id: w } if w == worker_id)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Assigned { .. } => "assigned",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A unit of assignable work.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: u64,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: u8,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    /// Times this task has been failed back by a worker.
    pub failures: u32,
}

/// Submission request from a task producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: u8,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, priority: u8) -> Self {
        Self {
            task_type: task_type.into(),
            priority,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Queue counts by status, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub assigned: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Ready-queue entry. Max-heap: higher priority first, earlier submission
/// (lower id) within equal priority. A failed task re-enters with its
/// original id, so priority dominates and its original position holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: u8,
    id: u64,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered task pool with assignment bookkeeping.
pub struct TaskQueue {
    tasks: HashMap<u64, Task>,
    ready: BinaryHeap<ReadyEntry>,
    next_id: u64,
    max_failures: Option<u32>,
}

impl TaskQueue {
    pub fn new(max_failures: Option<u32>) -> Self {
        Self {
            tasks: HashMap::new(),
            ready: BinaryHeap::new(),
            next_id: 1,
            max_failures,
        }
    }

    /// Validate and insert a new task. Returns its monotonic id.
    pub fn submit(&mut self, spec: TaskSpec) -> Result<u64, TaskError> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&spec.priority) {
            return Err(TaskError::PriorityOutOfRange {
                priority: spec.priority,
            });
        }
        if spec.task_type.trim().is_empty() {
            return Err(TaskError::EmptyType);
        }

        let id = self.next_id;
        self.next_id += 1;

        let task = Task {
            id,
            task_type: spec.task_type,
            priority: spec.priority,
            payload: spec.payload,
            status: TaskStatus::Queued,
            submitted_at: Utc::now(),
            failures: 0,
        };
        debug!(task_id = id, task_type = %task.task_type, priority = task.priority, "Task submitted");

        self.ready.push(ReadyEntry {
            priority: task.priority,
            id,
        });
        self.tasks.insert(id, task);
        Ok(id)
    }

    /// Pop the highest-priority queued task and assign it to `worker_id`.
    ///
    /// `None` means the pool is idle — callers must treat it as "nothing to
    /// do", not spin on it.
    pub fn assign_next(&mut self, worker_id: &str) -> Option<Task> {
        while let Some(entry) = self.ready.pop() {
            let Some(task) = self.tasks.get_mut(&entry.id) else {
                continue;
            };
            if task.status != TaskStatus::Queued {
                continue;
            }
            task.status = TaskStatus::Assigned {
                worker_id: worker_id.to_string(),
            };
            debug!(task_id = task.id, worker_id, "Task assigned");
            return Some(task.clone());
        }
        None
    }

    /// Mark an assigned task as completed.
    pub fn complete(&mut self, id: u64) -> Result<(), TaskError> {
        let task = self.tasks.get_mut(&id).ok_or(TaskError::NotFound { id })?;
        match task.status {
            TaskStatus::Assigned { .. } => {
                task.status = TaskStatus::Completed;
                debug!(task_id = id, "Task completed");
                Ok(())
            }
            ref other => Err(TaskError::NotAssigned {
                id,
                status: other.to_string(),
            }),
        }
    }

    /// Fail an assigned task back into the queue at its original priority
    /// position. With a configured failure bound, a task that reaches it is
    /// parked as `Failed` instead of requeued.
    pub fn fail(&mut self, id: u64) -> Result<TaskStatus, TaskError> {
        let task = self.tasks.get_mut(&id).ok_or(TaskError::NotFound { id })?;
        if !matches!(task.status, TaskStatus::Assigned { .. }) {
            return Err(TaskError::NotAssigned {
                id,
                status: task.status.to_string(),
            });
        }

        task.failures += 1;
        if let Some(max) = self.max_failures
            && task.failures >= max
        {
            task.status = TaskStatus::Failed;
            warn!(task_id = id, failures = task.failures, "Task parked after repeated failures");
            return Ok(task.status.clone());
        }

        task.status = TaskStatus::Queued;
        self.ready.push(ReadyEntry {
            priority: task.priority,
            id,
        });
        debug!(task_id = id, failures = task.failures, "Task failed, requeued");
        Ok(task.status.clone())
    }

    /// Return every task assigned to a lost worker to the queue with its
    /// assignment cleared. Returns the requeued task ids.
    pub fn on_worker_lost(&mut self, worker_id: &str) -> Vec<u64> {
        let mut requeued = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status.is_assigned_to(worker_id) {
                task.status = TaskStatus::Queued;
                self.ready.push(ReadyEntry {
                    priority: task.priority,
                    id: task.id,
                });
                requeued.push(task.id);
            }
        }
        if !requeued.is_empty() {
            info!(worker_id, count = requeued.len(), "Requeued tasks from lost worker");
        }
        requeued
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Number of queued (assignable) tasks.
    pub fn depth(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .count()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Assigned { .. } => counts.assigned += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
