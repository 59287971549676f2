//! Project aggregate: goals, assistants, tasks, and execution state.
//!
//! The project is the root of the plan data model. It is created by the
//! plan compiler, mutated only through the executor's serialized update
//! path during execution, and persisted whole by the plan store. Tasks
//! are stored in insertion order, which is also the deterministic
//! dispatch order when multiple tasks are ready at once.

use crate::core::goal::{Assistant, AssistantId, Goal, GoalId};
use crate::core::task::{Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The full persisted/executable plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project name, used as the plan document name.
    pub name: String,
    /// Ordered goals supplied by the operator.
    pub goals: Vec<Goal>,
    /// Assistants keyed by id, one per goal.
    pub assistants: HashMap<AssistantId, Assistant>,
    /// Tasks in insertion order.
    pub tasks: Vec<Task>,
}

impl Project {
    /// Create a new empty project.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            goals: Vec::new(),
            assistants: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    /// Add a goal to the project.
    pub fn add_goal(&mut self, goal: Goal) {
        self.goals.push(goal);
    }

    /// Add an assistant to the project.
    pub fn add_assistant(&mut self, assistant: Assistant) {
        self.assistants.insert(assistant.id, assistant);
    }

    /// Add a task to the project, preserving insertion order.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Get a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Get a mutable task by id.
    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// Get an assistant by id.
    pub fn assistant(&self, id: &AssistantId) -> Option<&Assistant> {
        self.assistants.get(id)
    }

    /// Get the assistant serving a goal, if any.
    pub fn assistant_for_goal(&self, goal_id: &GoalId) -> Option<&Assistant> {
        self.assistants.values().find(|a| &a.goal_id == goal_id)
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    /// Number of tasks in the project.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Check if every task has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.tasks.iter().all(Task::is_terminal)
    }

    /// Count tasks per status bucket: (succeeded, failed, blocked, other).
    pub fn status_counts(&self) -> (usize, usize, usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut blocked = 0;
        let mut other = 0;
        for task in &self.tasks {
            match task.status {
                TaskStatus::Succeeded => succeeded += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Blocked { .. } => blocked += 1,
                _ => other += 1,
            }
        }
        (succeeded, failed, blocked, other)
    }

    /// Revert transient statuses left over from an interrupted run.
    ///
    /// A plan saved mid-execution may contain tasks stuck in `ready` or
    /// `running`; on load they revert to `pending` so the executor derives
    /// readiness from scratch. Terminal statuses are untouched.
    pub fn normalize_transient(&mut self) {
        for task in &mut self.tasks {
            if matches!(task.status, TaskStatus::Ready | TaskStatus::Running) {
                task.status = TaskStatus::Pending;
                task.started_at = None;
            }
        }
    }

    /// Reset failed and blocked tasks for an explicit retry-from-checkpoint.
    ///
    /// Succeeded tasks keep their results and stay satisfied. Returns the
    /// number of tasks reset.
    pub fn reset_for_retry(&mut self) -> usize {
        let mut reset = 0;
        for task in &mut self.tasks {
            if matches!(
                task.status,
                TaskStatus::Failed | TaskStatus::Blocked { .. }
            ) {
                task.status = TaskStatus::Pending;
                task.failure = None;
                task.attempts = 0;
                task.started_at = None;
                task.completed_at = None;
                reset += 1;
            }
        }
        reset
    }
}
