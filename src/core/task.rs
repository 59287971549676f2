//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work assigned to assistants. Each task
//! tracks its status, dependency list, attempt count, and result or
//! failure record.

use crate::core::goal::AssistantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task within a project.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The assistant performed the task and reported failure.
    Execution,
    /// The external call exceeded the per-task timeout.
    Timeout,
    /// The resolver itself was unreachable or returned garbage.
    Resolver,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Execution => write!(f, "execution"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Resolver => write!(f, "resolver"),
        }
    }
}

/// Record of the most recent failure of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// What kind of failure occurred.
    pub kind: FailureKind,
    /// Error message describing the failure.
    pub message: String,
    /// Number of attempts made so far, including the failed one.
    pub attempts: u32,
}

impl std::fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (attempt {})",
            self.kind, self.message, self.attempts
        )
    }
}

/// Task status in its lifecycle.
///
/// Tasks progress `pending -> ready -> running -> succeeded | failed`.
/// A failed task may return to `ready` through the bounded retry
/// transition; once retries are exhausted `failed` is terminal and every
/// transitive successor becomes `blocked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but dependencies not yet satisfied.
    #[default]
    Pending,
    /// All dependencies satisfied, ready to be dispatched.
    Ready,
    /// Task is currently being performed by its assistant.
    Running,
    /// Task completed successfully.
    Succeeded,
    /// Task failed; terminal once retries are exhausted.
    Failed,
    /// Task can never run because an ancestor failed permanently.
    Blocked {
        /// Reason why the task is blocked.
        reason: String,
    },
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
        }
    }
}

/// A single task in the execution DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// The assistant responsible for performing this task.
    pub assistant_id: AssistantId,
    /// Human-readable description of the work.
    pub description: String,
    /// Current execution status.
    pub status: TaskStatus,
    /// Predecessor tasks that must succeed before this one may run.
    pub depends_on: Vec<TaskId>,
    /// Result payload reported by the assistant on success.
    pub result: Option<String>,
    /// Record of the most recent failure, if any.
    pub failure: Option<FailureRecord>,
    /// Number of execution attempts made.
    pub attempts: u32,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(assistant_id: AssistantId, description: &str, depends_on: Vec<TaskId>) -> Self {
        Self {
            id: TaskId::new(),
            assistant_id,
            description: description.to_string(),
            status: TaskStatus::Pending,
            depends_on,
            result: None,
            failure: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the task ready once its dependencies are satisfied.
    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    /// Start an execution attempt.
    ///
    /// Transitions status to Running, bumps the attempt counter, and
    /// records the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task as successfully completed with its result payload.
    pub fn succeed(&mut self, result: &str) {
        self.status = TaskStatus::Succeeded;
        self.result = Some(result.to_string());
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as failed, recording kind and message.
    ///
    /// The failure is terminal only if the executor decides not to retry.
    pub fn fail(&mut self, kind: FailureKind, message: &str) {
        self.status = TaskStatus::Failed;
        self.failure = Some(FailureRecord {
            kind,
            message: message.to_string(),
            attempts: self.attempts,
        });
        self.completed_at = Some(Utc::now());
    }

    /// Re-arm a failed task for another attempt.
    ///
    /// This is the only status regression the state machine permits. The
    /// failure record is kept for reporting; the attempt counter carries
    /// forward so the bounded-attempts limit holds across retries.
    pub fn retry(&mut self) {
        self.status = TaskStatus::Ready;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Mark the task as blocked with a reason.
    pub fn block(&mut self, reason: &str) {
        self.status = TaskStatus::Blocked {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Blocked { .. }
        )
    }

    /// Check if the task can be dispatched (Pending or Ready).
    pub fn can_start(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Ready)
    }
}
