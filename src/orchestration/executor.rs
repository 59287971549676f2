//! Executor for dependency-ordered task execution.
//!
//! The Executor drains the plan graph: it computes the ready set, spawns
//! workers for ready tasks up to the concurrency limit, and processes
//! completions and failures until every task is terminal. All project
//! mutation happens in the scheduling loop itself; spawned workers only
//! run the external call and report back over a channel, so there is a
//! single mutator of shared state even when task execution overlaps.

use crate::core::task::FailureKind;
use crate::core::{PlanGraph, Project, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::resolver::{AssistantResolver, TaskOutcome};
use crate::store::PlanStore;
use crate::{alog, alog_warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Configuration for one execution run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of tasks in flight at once. Default 1, which gives
    /// fully sequential, deterministic execution.
    pub concurrency: usize,
    /// Maximum execution attempts per task.
    pub max_attempts: u32,
    /// Base backoff delay; the actual delay grows with the attempt count.
    pub backoff: Duration,
    /// Hard boundary for one external call. A hung call becomes a failed
    /// attempt eligible for retry.
    pub task_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            task_timeout: Duration::from_secs(600),
        }
    }
}

/// Events emitted by the executor for task lifecycle changes.
///
/// These events let external components (the CLI progress printer, tests)
/// react to state changes without polling the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task was dispatched to its assistant.
    TaskStarted {
        /// The task that was started.
        task_id: TaskId,
        /// Which attempt this is (1-based).
        attempt: u32,
    },
    /// A task completed successfully.
    TaskSucceeded {
        /// The task that completed.
        task_id: TaskId,
    },
    /// A task attempt failed.
    TaskFailed {
        /// The task that failed.
        task_id: TaskId,
        /// Error message describing the failure.
        message: String,
        /// Whether the executor will retry the task.
        will_retry: bool,
    },
    /// A task was blocked by a permanent upstream failure.
    TaskBlocked {
        /// The task that was blocked.
        task_id: TaskId,
        /// Reason why the task is blocked.
        reason: String,
    },
    /// Every task has reached a terminal state (or the run was aborted).
    PlanSettled,
}

/// Final tally of an execution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Tasks that succeeded.
    pub succeeded: Vec<TaskId>,
    /// Tasks that failed permanently, with their failure descriptions.
    pub failed: Vec<(TaskId, String)>,
    /// Tasks blocked by upstream failures, with reasons.
    pub blocked: Vec<(TaskId, String)>,
    /// Tasks left non-terminal (only possible after an abort).
    pub unfinished: Vec<TaskId>,
}

impl ExecutionReport {
    /// Build a report from the project's current statuses.
    pub fn from_project(project: &Project) -> Self {
        let mut report = Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            blocked: Vec::new(),
            unfinished: Vec::new(),
        };
        for task in &project.tasks {
            match &task.status {
                TaskStatus::Succeeded => report.succeeded.push(task.id),
                TaskStatus::Failed => {
                    let reason = task
                        .failure
                        .as_ref()
                        .map(|f| f.to_string())
                        .unwrap_or_else(|| "failed".to_string());
                    report.failed.push((task.id, reason));
                }
                TaskStatus::Blocked { reason } => {
                    report.blocked.push((task.id, reason.clone()));
                }
                _ => report.unfinished.push(task.id),
            }
        }
        report
    }

    /// True when every task succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.unfinished.is_empty()
    }

    /// Total number of tasks covered by the report.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.blocked.len() + self.unfinished.len()
    }
}

/// Message from a worker (or retry timer) back to the scheduling loop.
enum ExecMsg {
    /// A dispatched task finished, successfully or not.
    Finished {
        task_id: TaskId,
        outcome: Result<TaskOutcome>,
    },
    /// A failed task's backoff delay elapsed; it may be re-armed.
    RetryReady { task_id: TaskId },
}

/// The dependency-aware execution engine.
///
/// # Example
///
/// ```ignore
/// let (event_tx, mut event_rx) = mpsc::channel(100);
/// let mut executor = Executor::new(project, resolver, ExecutorConfig::default(), event_tx)?;
/// let report = executor.run().await?;
/// ```
pub struct Executor {
    /// The project being executed; shared so observers can snapshot it.
    project: Arc<RwLock<Project>>,
    /// The dependency graph, built once up front.
    graph: PlanGraph,
    /// The external capability performing tasks.
    resolver: Arc<dyn AssistantResolver>,
    /// Run configuration.
    config: ExecutorConfig,
    /// Channel for emitting scheduler events.
    event_tx: mpsc::Sender<SchedulerEvent>,
    /// Abort signal: stops new dispatch, lets in-flight work drain.
    cancel: CancellationToken,
    /// Optional store for checkpointing after each terminal transition.
    checkpoint: Option<PlanStore>,
    /// Tasks that have reached terminal success.
    succeeded: HashSet<TaskId>,
    /// Tasks currently dispatched.
    running: HashSet<TaskId>,
    /// Number of armed retry timers; counts as in-flight work.
    waiting_retry: usize,
}

impl Executor {
    /// Create an executor for a validated project.
    ///
    /// Previously succeeded tasks (from a loaded checkpoint) are treated
    /// as already satisfied.
    ///
    /// # Errors
    /// Returns an error if the project's graph is structurally invalid;
    /// normally the compiler has already guaranteed this.
    pub fn new(
        project: Project,
        resolver: Arc<dyn AssistantResolver>,
        config: ExecutorConfig,
        event_tx: mpsc::Sender<SchedulerEvent>,
    ) -> Result<Self> {
        let graph = PlanGraph::build(&project)?;
        graph.ensure_acyclic(&project)?;

        let succeeded = project
            .tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Succeeded))
            .map(|t| t.id)
            .collect();

        Ok(Self {
            project: Arc::new(RwLock::new(project)),
            graph,
            resolver,
            config,
            event_tx,
            cancel: CancellationToken::new(),
            checkpoint: None,
            succeeded,
            running: HashSet::new(),
            waiting_retry: 0,
        })
    }

    /// Checkpoint the project through the given store after every
    /// terminal task transition.
    pub fn with_checkpoint_store(mut self, store: PlanStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Token observers can use to request an abort.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared handle to the project being executed.
    pub fn project(&self) -> Arc<RwLock<Project>> {
        Arc::clone(&self.project)
    }

    /// Clone the project's current state.
    pub async fn snapshot(&self) -> Project {
        self.project.read().await.clone()
    }

    /// Number of tasks currently in flight.
    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    /// Run the scheduling loop until the plan settles.
    ///
    /// 1. Dispatch ready tasks up to the concurrency limit.
    /// 2. Wait for a worker completion or an elapsed retry timer.
    /// 3. Record the result, apply retry/blocked policy, recompute
    ///    readiness.
    /// 4. Repeat until no task is in flight and none can become ready.
    pub async fn run(&mut self) -> Result<ExecutionReport> {
        let (tx, mut rx) = mpsc::channel::<ExecMsg>(64);

        // A loaded checkpoint may carry permanent failures whose
        // successors were never settled; block them before scheduling so
        // they are not mistaken for dispatchable work. Retrying such
        // tasks requires an explicit reset, never happens automatically.
        let failed_at_start: Vec<TaskId> = {
            let project = self.project.read().await;
            project
                .tasks
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Failed))
                .map(|t| t.id)
                .collect()
        };
        for task_id in failed_at_start {
            self.propagate_blocked(task_id).await;
        }

        loop {
            if !self.cancel.is_cancelled() {
                self.dispatch_ready(&tx).await?;
            }

            if self.running.is_empty() && self.waiting_retry == 0 {
                break;
            }

            match rx.recv().await {
                Some(msg) => self.handle(msg, &tx).await?,
                None => break,
            }
        }

        let report = {
            let project = self.project.read().await;
            ExecutionReport::from_project(&project)
        };
        alog!(
            "Plan settled: {} succeeded, {} failed, {} blocked, {} unfinished",
            report.succeeded.len(),
            report.failed.len(),
            report.blocked.len(),
            report.unfinished.len()
        );
        let _ = self.event_tx.send(SchedulerEvent::PlanSettled).await;
        Ok(report)
    }

    /// Dispatch ready tasks up to the concurrency limit.
    ///
    /// Candidates are taken in project insertion order, which makes
    /// dispatch deterministic for a given graph and set of outcomes.
    async fn dispatch_ready(&mut self, tx: &mpsc::Sender<ExecMsg>) -> Result<()> {
        let capacity = self.config.concurrency.saturating_sub(self.running.len());
        if capacity == 0 {
            return Ok(());
        }

        let candidates: Vec<TaskId> = {
            let project = self.project.read().await;
            self.graph
                .ready_tasks(&self.succeeded)
                .into_iter()
                .filter(|id| !self.running.contains(id))
                .filter(|id| project.task(id).map(|t| t.can_start()).unwrap_or(false))
                .take(capacity)
                .collect()
        };

        for task_id in candidates {
            let (task, assistant, attempt) = {
                let mut project = self.project.write().await;
                let task = project.task_mut(&task_id).ok_or_else(|| {
                    Error::Validation(format!("Task {} vanished from project", task_id.short()))
                })?;
                task.start();
                let attempt = task.attempts;
                let snapshot = task.clone();
                let assistant = project
                    .assistant(&snapshot.assistant_id)
                    .cloned()
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "Task {} has no assistant",
                            task_id.short()
                        ))
                    })?;
                (snapshot, assistant, attempt)
            };

            self.running.insert(task_id);
            alog!(
                "Dispatching task {} (attempt {}): {}",
                task_id.short(),
                attempt,
                task.description
            );
            let _ = self
                .event_tx
                .send(SchedulerEvent::TaskStarted { task_id, attempt })
                .await;

            let resolver = Arc::clone(&self.resolver);
            let timeout = self.config.task_timeout;
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome =
                    match tokio::time::timeout(timeout, resolver.perform_task(&assistant, &task))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(timeout)),
                    };
                let _ = tx.send(ExecMsg::Finished { task_id, outcome }).await;
            });
        }

        Ok(())
    }

    /// Process one message from a worker or retry timer.
    async fn handle(&mut self, msg: ExecMsg, tx: &mpsc::Sender<ExecMsg>) -> Result<()> {
        match msg {
            ExecMsg::Finished { task_id, outcome } => {
                self.running.remove(&task_id);
                match outcome {
                    Ok(TaskOutcome::Success { result }) => {
                        self.complete(task_id, &result).await;
                    }
                    Ok(TaskOutcome::Failure { kind, message }) => {
                        self.record_failure(task_id, kind, &message, tx).await;
                    }
                    Err(Error::Timeout(duration)) => {
                        let message = format!("timed out after {:?}", duration);
                        self.record_failure(task_id, FailureKind::Timeout, &message, tx)
                            .await;
                    }
                    Err(other) => {
                        self.record_failure(task_id, FailureKind::Resolver, &other.to_string(), tx)
                            .await;
                    }
                }
            }
            ExecMsg::RetryReady { task_id } => {
                self.waiting_retry -= 1;
                if self.cancel.is_cancelled() {
                    // The retry was pre-empted by an abort: the failure
                    // stays terminal and its successors are blocked.
                    self.propagate_blocked(task_id).await;
                } else {
                    let mut project = self.project.write().await;
                    if let Some(task) = project.task_mut(&task_id) {
                        task.retry();
                    }
                }
            }
        }
        Ok(())
    }

    /// Record a successful completion and unlock successors.
    async fn complete(&mut self, task_id: TaskId, result: &str) {
        {
            let mut project = self.project.write().await;
            if let Some(task) = project.task_mut(&task_id) {
                task.succeed(result);
            }
        }
        self.succeeded.insert(task_id);
        alog!("Task {} succeeded", task_id.short());
        let _ = self
            .event_tx
            .send(SchedulerEvent::TaskSucceeded { task_id })
            .await;
        self.save_checkpoint().await;
    }

    /// Record a failed attempt and either arm a retry or settle the
    /// failure permanently.
    async fn record_failure(
        &mut self,
        task_id: TaskId,
        kind: FailureKind,
        message: &str,
        tx: &mpsc::Sender<ExecMsg>,
    ) {
        let attempts = {
            let mut project = self.project.write().await;
            match project.task_mut(&task_id) {
                Some(task) => {
                    task.fail(kind, message);
                    task.attempts
                }
                None => return,
            }
        };

        let will_retry = !self.cancel.is_cancelled() && attempts < self.config.max_attempts;
        alog_warn!(
            "Task {} failed (attempt {}/{}): {}",
            task_id.short(),
            attempts,
            self.config.max_attempts,
            message
        );
        let _ = self
            .event_tx
            .send(SchedulerEvent::TaskFailed {
                task_id,
                message: message.to_string(),
                will_retry,
            })
            .await;

        if will_retry {
            // Backoff grows linearly with the attempt count.
            let delay = self.config.backoff * attempts;
            self.waiting_retry += 1;
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(ExecMsg::RetryReady { task_id }).await;
            });
        } else {
            self.propagate_blocked(task_id).await;
            self.save_checkpoint().await;
        }
    }

    /// Mark every transitive successor of a permanently failed task as
    /// blocked. Failure propagates forward only.
    async fn propagate_blocked(&mut self, failed_id: TaskId) {
        let short = failed_id.short();
        let downstream = self.graph.transitive_dependents(&failed_id);
        let mut blocked = Vec::new();
        {
            let mut project = self.project.write().await;
            for dep_id in downstream {
                if self.succeeded.contains(&dep_id) {
                    continue;
                }
                if let Some(task) = project.task_mut(&dep_id) {
                    if task.is_terminal() {
                        continue;
                    }
                    let reason = format!("dependency {} failed permanently", short);
                    task.block(&reason);
                    blocked.push((dep_id, reason));
                }
            }
        }
        for (task_id, reason) in blocked {
            alog_warn!("Task {} blocked: {}", task_id.short(), reason);
            let _ = self
                .event_tx
                .send(SchedulerEvent::TaskBlocked { task_id, reason })
                .await;
        }
    }

    /// Persist the project if a checkpoint store is configured.
    ///
    /// Runs in the scheduling loop, so the snapshot is always consistent.
    async fn save_checkpoint(&self) {
        if let Some(store) = &self.checkpoint {
            let project = self.project.read().await;
            if let Err(e) = store.save(&project) {
                alog_warn!("Checkpoint save failed: {}", e);
            }
        }
    }
}
