//! Goal and assistant entities.
//!
//! A goal is a natural-language objective supplied by the operator. Each
//! goal is served by exactly one assistant, the agent entity backed by an
//! external language-model service. The core never talks to that service
//! directly; it only stores the opaque correlation token handed back by
//! the resolver.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(pub Uuid);

impl GoalId {
    /// Create a new unique goal identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GoalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A top-level objective supplied by the operator.
///
/// Immutable once part of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier for this goal.
    pub id: GoalId,
    /// The natural-language objective.
    pub text: String,
}

impl Goal {
    /// Create a new goal with the given objective text.
    pub fn new(text: &str) -> Self {
        Self {
            id: GoalId::new(),
            text: text.to_string(),
        }
    }
}

/// Unique identifier for an assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssistantId(pub Uuid);

impl AssistantId {
    /// Create a new unique assistant identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AssistantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AssistantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The agent entity responsible for one goal's tasks.
///
/// Created and updated through the assistant resolver. `external_ref` is
/// the opaque token correlating this record to the remote definition; the
/// core stores it but never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    /// Unique identifier for this assistant.
    pub id: AssistantId,
    /// The goal this assistant serves (1:1).
    pub goal_id: GoalId,
    /// Human-readable name, e.g. "Baker".
    pub name: String,
    /// Role description, e.g. "pastry chef".
    pub role: String,
    /// Prompting instructions for the backing service.
    pub instructions: String,
    /// Opaque token correlating to the resolver's remote definition.
    pub external_ref: Option<String>,
}

impl Assistant {
    /// Create a new assistant for the given goal.
    pub fn new(goal_id: GoalId, name: &str, role: &str, instructions: &str) -> Self {
        Self {
            id: AssistantId::new(),
            goal_id,
            name: name.to_string(),
            role: role.to_string(),
            instructions: instructions.to_string(),
            external_ref: None,
        }
    }

    /// Record the remote correlation token.
    pub fn set_external_ref(&mut self, external_ref: &str) {
        self.external_ref = Some(external_ref.to_string());
    }
}
