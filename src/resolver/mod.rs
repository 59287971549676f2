//! Assistant resolver capability.
//!
//! The resolver is the narrow interface to the external language-model
//! assistant service: given a goal it produces an assistant definition and
//! a decomposition into proposed tasks with local dependency references,
//! and given an assistant and a task it performs the task. Everything the
//! resolver returns is loosely structured on purpose; the plan compiler
//! normalizes it into typed records at this boundary and nothing beyond
//! these types leaks into the core.

mod headless;

pub use headless::{HeadlessResolver, DEFAULT_CALL_TIMEOUT_SECS};

use crate::core::{Assistant, Goal, Task};
use crate::core::task::FailureKind;
use crate::error::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// A dependency reference local to one goal's decomposition.
///
/// The resolver may refer to predecessors either by zero-based position
/// in its own task list or by label. Labels also reach tasks of
/// previously resolved goals, which is how cross-goal dependencies are
/// expressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRef {
    /// Zero-based index into the same decomposition.
    Index(usize),
    /// Label of a task in this or an earlier decomposition.
    Label(String),
}

/// A task as proposed by the resolver, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedTask {
    /// Optional label other proposed tasks can reference.
    #[serde(default)]
    pub label: Option<String>,
    /// Human-readable description of the work.
    pub description: String,
    /// Local references to predecessor tasks.
    #[serde(default)]
    pub depends_on: Vec<DependencyRef>,
}

/// The resolver's answer for one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Opaque token correlating to the remote assistant definition.
    pub external_ref: String,
    /// Assistant name, e.g. "Baker".
    pub name: String,
    /// Assistant role, e.g. "pastry chef".
    pub role: String,
    /// Prompting instructions for the backing service.
    pub instructions: String,
    /// The goal's decomposition into proposed tasks.
    pub tasks: Vec<ProposedTask>,
}

/// Outcome of performing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The assistant completed the task.
    Success {
        /// Result payload reported by the assistant.
        result: String,
    },
    /// The assistant reported failure.
    Failure {
        /// What kind of failure occurred.
        kind: FailureKind,
        /// Error message describing the failure.
        message: String,
    },
}

impl TaskOutcome {
    /// Check if the outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

/// Capability interface to the external assistant service.
///
/// Implementations must be object-safe: the executor holds the resolver
/// as `Arc<dyn AssistantResolver>` and calls it from spawned workers, so
/// methods return boxed futures and the trait requires `Send + Sync`.
pub trait AssistantResolver: Send + Sync {
    /// Obtain (or update) the assistant definition and decomposition for
    /// a goal.
    ///
    /// `existing_ref` carries the correlation token from a previous
    /// compilation so the implementation can update the remote definition
    /// instead of creating a duplicate.
    ///
    /// # Errors
    /// `Error::Resolution` on service or network failure. The compiler
    /// contains such a failure to the affected goal's subtree.
    fn resolve_assistant<'a>(
        &'a self,
        goal: &'a Goal,
        existing_ref: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Resolution>>;

    /// Perform one task through the assistant backing it.
    ///
    /// Returns `Ok(TaskOutcome::Failure { .. })` when the assistant ran
    /// and reported failure; returns `Err` when the call itself failed
    /// (both are retryable from the executor's point of view).
    fn perform_task<'a>(
        &'a self,
        assistant: &'a Assistant,
        task: &'a Task,
    ) -> BoxFuture<'a, Result<TaskOutcome>>;
}
