//! Plan compiler: goals in, validated project out.
//!
//! For each goal the compiler asks the assistant resolver for an
//! assistant definition and a decomposition, then normalizes the loosely
//! structured answer into typed task records with global ids. The merged
//! graph is validated (referential integrity, acyclicity) before the
//! project is handed to anyone else; structural errors abort the whole
//! compile and no partial plan escapes.

use crate::core::{Assistant, Goal, PlanGraph, Project, Task, TaskId};
use crate::error::{Error, Result};
use crate::resolver::{AssistantResolver, DependencyRef, ProposedTask};
use crate::{alog, alog_warn};
use std::collections::HashMap;
use std::sync::Arc;

/// A goal whose resolution failed.
///
/// Resolution failures are contained to the affected goal's subtree; the
/// rest of the plan still compiles.
#[derive(Debug, Clone)]
pub struct UnresolvedGoal {
    /// The goal that could not be resolved.
    pub goal: Goal,
    /// Why resolution failed.
    pub reason: String,
}

/// Result of a compilation run.
#[derive(Debug)]
pub struct CompileOutcome {
    /// The validated project.
    pub project: Project,
    /// Goals skipped because their resolution failed.
    pub unresolved: Vec<UnresolvedGoal>,
}

/// Compiles operator goals into a validated project.
pub struct PlanCompiler {
    resolver: Arc<dyn AssistantResolver>,
}

impl PlanCompiler {
    /// Create a compiler backed by the given resolver.
    pub fn new(resolver: Arc<dyn AssistantResolver>) -> Self {
        Self { resolver }
    }

    /// Compile fresh goals into a project.
    ///
    /// Each goal is resolved independently; a `Resolution` error skips
    /// that goal (reported in the outcome) without aborting the others.
    /// Structural errors in the merged graph are fatal.
    ///
    /// # Errors
    /// - `UnknownDependency` / `CyclicPlan` if the merged graph is invalid
    /// - `Resolution` if no goal at all could be resolved
    pub async fn compile(&self, name: &str, goals: &[String]) -> Result<CompileOutcome> {
        let mut project = Project::new(name);
        let mut unresolved = Vec::new();
        // Labels are global across goals; this is how a task under one
        // assistant may depend on a task under another.
        let mut label_registry: HashMap<String, TaskId> = HashMap::new();

        for text in goals {
            let goal = Goal::new(text);
            alog!("Resolving goal {}: {:?}", goal.id.short(), text);

            match self.resolver.resolve_assistant(&goal, None).await {
                Ok(resolution) => {
                    let mut assistant = Assistant::new(
                        goal.id,
                        &resolution.name,
                        &resolution.role,
                        &resolution.instructions,
                    );
                    assistant.set_external_ref(&resolution.external_ref);
                    let assistant_id = assistant.id;

                    let normalized =
                        normalize_tasks(assistant_id, &resolution.tasks, &label_registry)?;

                    project.add_goal(goal);
                    project.add_assistant(assistant);
                    for (task, label) in normalized {
                        if let Some(label) = label {
                            label_registry.insert(label, task.id);
                        }
                        project.add_task(task);
                    }
                }
                Err(Error::Resolution(reason)) => {
                    alog_warn!(
                        "Goal {} could not be resolved: {}",
                        goal.id.short(),
                        reason
                    );
                    unresolved.push(UnresolvedGoal { goal, reason });
                }
                Err(other) => return Err(other),
            }
        }

        if project.goals.is_empty() {
            return Err(Error::Resolution(
                "no goal could be resolved".to_string(),
            ));
        }

        Self::validate(&project)?;
        alog!(
            "Compiled project {:?}: {} goals, {} tasks",
            project.name,
            project.goals.len(),
            project.task_count()
        );

        Ok(CompileOutcome {
            project,
            unresolved,
        })
    }

    /// Refresh remote assistant definitions for a loaded project.
    ///
    /// Each assistant's stored correlation token is passed back to the
    /// resolver so it updates the existing remote definition instead of
    /// creating a duplicate. The decomposition in the response is
    /// ignored; tasks of a loaded project are never regenerated. A
    /// resolution failure leaves that assistant's stored token as is.
    pub async fn refresh_assistants(&self, project: &mut Project) -> Result<()> {
        for goal in project.goals.clone() {
            let existing = project
                .assistant_for_goal(&goal.id)
                .and_then(|a| a.external_ref.clone());
            match self
                .resolver
                .resolve_assistant(&goal, existing.as_deref())
                .await
            {
                Ok(resolution) => {
                    if let Some(assistant) = project
                        .assistants
                        .values_mut()
                        .find(|a| a.goal_id == goal.id)
                    {
                        assistant.set_external_ref(&resolution.external_ref);
                    }
                }
                Err(Error::Resolution(reason)) => {
                    alog_warn!(
                        "Could not refresh assistant for goal {}: {}",
                        goal.id.short(),
                        reason
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Prepare a loaded project for execution.
    ///
    /// Goals supplied elsewhere are ignored in favor of the project's
    /// stored goals. The document may have been hand-edited, so the graph
    /// is validated from scratch; statuses left over from an interrupted
    /// run are reverted to pending.
    pub fn revalidate(mut project: Project) -> Result<Project> {
        project.normalize_transient();
        Self::validate(&project)?;
        Ok(project)
    }

    /// Validate a project's graph and referential integrity.
    pub fn validate(project: &Project) -> Result<()> {
        for task in &project.tasks {
            if project.assistant(&task.assistant_id).is_none() {
                return Err(Error::Validation(format!(
                    "Task {} belongs to unknown assistant {}",
                    task.id.short(),
                    task.assistant_id.short()
                )));
            }
        }
        for assistant in project.assistants.values() {
            if !project.goals.iter().any(|g| g.id == assistant.goal_id) {
                return Err(Error::Validation(format!(
                    "Assistant {} serves unknown goal {}",
                    assistant.id.short(),
                    assistant.goal_id.short()
                )));
            }
        }

        let graph = PlanGraph::build(project)?;
        graph.ensure_acyclic(project)
    }
}

/// Normalize one goal's proposed tasks into global task records.
///
/// Local dependency references (index or label) are translated to global
/// task ids. Labels resolve within this decomposition first, then against
/// the registry of earlier goals.
fn normalize_tasks(
    assistant_id: crate::core::AssistantId,
    proposed: &[ProposedTask],
    label_registry: &HashMap<String, TaskId>,
) -> Result<Vec<(Task, Option<String>)>> {
    // First pass: assign ids and collect local labels.
    let ids: Vec<TaskId> = proposed.iter().map(|_| TaskId::new()).collect();
    let mut local_labels: HashMap<&str, TaskId> = HashMap::new();
    for (proposed_task, id) in proposed.iter().zip(&ids) {
        if let Some(label) = proposed_task.label.as_deref() {
            if local_labels.insert(label, *id).is_some() {
                return Err(Error::Validation(format!(
                    "Duplicate task label {:?} in decomposition",
                    label
                )));
            }
        }
    }

    // Second pass: translate dependency references.
    let mut out = Vec::with_capacity(proposed.len());
    for (index, (proposed_task, id)) in proposed.iter().zip(&ids).enumerate() {
        let mut depends_on = Vec::with_capacity(proposed_task.depends_on.len());
        for dep in &proposed_task.depends_on {
            let target = match dep {
                DependencyRef::Index(i) => {
                    ids.get(*i).copied().ok_or_else(|| Error::UnknownDependency {
                        task: proposed_task.description.clone(),
                        dependency: format!("index {}", i),
                    })?
                }
                DependencyRef::Label(label) => local_labels
                    .get(label.as_str())
                    .or_else(|| label_registry.get(label))
                    .copied()
                    .ok_or_else(|| Error::UnknownDependency {
                        task: proposed_task.description.clone(),
                        dependency: label.clone(),
                    })?,
            };
            depends_on.push(target);
        }

        let mut task = Task::new(assistant_id, &proposed_task.description, depends_on);
        task.id = ids[index];
        out.push((task, proposed_task.label.clone()));
    }

    Ok(out)
}
