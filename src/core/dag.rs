//! Plan dependency graph for scheduling and validation.
//!
//! This module provides the PlanGraph structure that represents task
//! dependencies as a directed acyclic graph. The graph is built once from
//! a compiled (or loaded) project; tasks and edges are never added after
//! that point, so the acyclicity invariant established here holds for the
//! rest of the project's lifetime.

use crate::core::project::Project;
use crate::core::task::{TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// DFS marking used during cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// The task dependency graph.
///
/// PlanGraph uses petgraph's DiGraph with task ids as node weights; the
/// project remains the single owner of task state. Edges point from
/// predecessor to successor. Node insertion follows project insertion
/// order, which makes `ready_tasks` deterministic.
pub struct PlanGraph {
    /// The underlying directed graph.
    graph: DiGraph<TaskId, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    node_index: HashMap<TaskId, NodeIndex>,
}

impl PlanGraph {
    /// Build the dependency graph for a project.
    ///
    /// # Errors
    /// Returns `UnknownDependency` if any task references a task id that
    /// is not present in the project.
    pub fn build(project: &Project) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for task in &project.tasks {
            let index = graph.add_node(task.id);
            node_index.insert(task.id, index);
        }

        for task in &project.tasks {
            let to = node_index[&task.id];
            for dep in &task.depends_on {
                let from = node_index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    task: task.description.clone(),
                    dependency: dep.short(),
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        Ok(Self { graph, node_index })
    }

    /// Number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check whether the graph contains a task.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.node_index.contains_key(id)
    }

    /// Verify the graph is acyclic.
    ///
    /// Runs a depth-first traversal with three-color marking so the full
    /// offending cycle can be reported, not just one of its members. Task
    /// descriptions from the project are used to render the cycle.
    ///
    /// # Errors
    /// Returns `CyclicPlan` naming the cycle if one exists.
    pub fn ensure_acyclic(&self, project: &Project) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut stack: Vec<NodeIndex> = Vec::new();

        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }
            if let Some(cycle) = self.dfs_cycle(start, &mut marks, &mut stack) {
                let rendered = cycle
                    .iter()
                    .map(|index| {
                        let id = self.graph[*index];
                        project
                            .task(&id)
                            .map(|t| t.description.clone())
                            .unwrap_or_else(|| id.short())
                    })
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(Error::CyclicPlan { cycle: rendered });
            }
        }

        Ok(())
    }

    /// DFS helper: returns the cycle path (closed, first == last) if one
    /// is reachable from `node`.
    fn dfs_cycle(
        &self,
        node: NodeIndex,
        marks: &mut Vec<Mark>,
        stack: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        marks[node.index()] = Mark::InProgress;
        stack.push(node);

        for next in self
            .graph
            .neighbors_directed(node, petgraph::Direction::Outgoing)
        {
            match marks[next.index()] {
                Mark::InProgress => {
                    // Found a back edge: the cycle is everything on the
                    // stack from `next` onward, closed with `next` again.
                    let pos = stack.iter().position(|n| *n == next)?;
                    let mut cycle: Vec<NodeIndex> = stack[pos..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.dfs_cycle(next, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node.index()] = Mark::Done;
        None
    }

    /// Get all tasks ready to dispatch, in project insertion order.
    ///
    /// A task is ready if it is not in the succeeded set and every one of
    /// its predecessors is. The caller filters out tasks that are already
    /// running or terminally failed/blocked; this method only answers the
    /// dependency question.
    pub fn ready_tasks(&self, succeeded: &HashSet<TaskId>) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let id = self.graph[index];
                if succeeded.contains(&id) {
                    return None;
                }
                let deps_satisfied = self
                    .graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .all(|dep| succeeded.contains(&self.graph[dep]));
                deps_satisfied.then_some(id)
            })
            .collect()
    }

    /// Direct successors of a task.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        match self.node_index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Direct predecessors of a task.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        match self.node_index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// All transitive successors of a task (BFS order, excluding the task
    /// itself).
    ///
    /// Used to propagate blocked status forward when a task fails
    /// permanently; failure never propagates backward.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.node_index.get(id) else {
            return Vec::new();
        };

        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        let mut out = Vec::new();
        queue.push_back(start);
        seen.insert(start);

        while let Some(node) = queue.pop_front() {
            for next in self
                .graph
                .neighbors_directed(node, petgraph::Direction::Outgoing)
            {
                if seen.insert(next) {
                    out.push(self.graph[next]);
                    queue.push_back(next);
                }
            }
        }

        out
    }

    /// Check whether every task in the project is terminal, given the
    /// project's current statuses.
    pub fn all_settled(&self, project: &Project) -> bool {
        project.tasks.iter().all(|t| {
            matches!(
                t.status,
                TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Blocked { .. }
            )
        })
    }
}

impl std::fmt::Debug for PlanGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
