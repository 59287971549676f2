//! Orchestration layer: the dependency-aware execution engine.
//!
//! The executor walks a validated project's dependency graph, dispatches
//! ready tasks to the assistant resolver up to the concurrency limit,
//! applies the retry policy, and propagates blocked status forward when a
//! task fails permanently.

mod executor;

pub use executor::{ExecutionReport, Executor, ExecutorConfig, SchedulerEvent};
