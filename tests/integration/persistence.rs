//! Persistence tests: round-trips, mid-execution checkpoints, resume,
//! and hand-edited plan documents.

use std::sync::Arc;

use autoplan::compiler::PlanCompiler;
use autoplan::core::{Project, TaskStatus};
use autoplan::error::Error;
use autoplan::orchestration::Executor;
use autoplan::store::PlanStore;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::fixtures::{cake_project, failure, fast_config, success, ScriptedResolver};

fn temp_store() -> (PlanStore, TempDir) {
    let dir = TempDir::new().unwrap();
    (PlanStore::new(dir.path().join("projects")), dir)
}

/// A project saved then loaded produces an identical graph: ids,
/// statuses, dependencies, results, and failure records all survive.
#[test]
fn test_round_trip_equality() {
    let (store, _dir) = temp_store();
    let (mut project, t1, t2, _) = cake_project();
    project.task_mut(&t1).unwrap().succeed("bought everything");
    {
        let task = project.task_mut(&t2).unwrap();
        task.start();
        task.fail(autoplan::core::FailureKind::Execution, "mixer jammed");
    }

    store.save(&project).unwrap();
    let loaded = store.load("cake").unwrap();

    assert_eq!(project, loaded);
}

/// Save mid-execution, then resume: previously succeeded tasks are
/// treated as satisfied and are not dispatched again.
#[tokio::test]
async fn test_checkpoint_and_resume_after_failure() {
    let (store, _dir) = temp_store();
    let (project, t1, t2, t3) = cake_project();

    // First run: T1 succeeds, T2 exhausts its retries.
    let resolver = Arc::new(
        ScriptedResolver::new()
            .script("buy ingredients", vec![success("bought")])
            .script(
                "mix batter",
                vec![failure("jammed"), failure("jammed"), failure("jammed")],
            ),
    );
    let (event_tx, _event_rx) = mpsc::channel(100);
    let mut executor = Executor::new(project, resolver.clone(), fast_config(1), event_tx)
        .unwrap()
        .with_checkpoint_store(store.clone());
    let report = executor.run().await.unwrap();

    assert_eq!(report.succeeded, vec![t1]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.blocked.len(), 1);

    // The checkpoint on disk reflects the settled state.
    let checkpoint = store.load("cake").unwrap();
    assert_eq!(checkpoint.task(&t1).unwrap().status, TaskStatus::Succeeded);
    assert_eq!(checkpoint.task(&t2).unwrap().status, TaskStatus::Failed);
    assert!(matches!(
        checkpoint.task(&t3).unwrap().status,
        TaskStatus::Blocked { .. }
    ));

    // Resume: explicit retry-from-checkpoint resets failed/blocked, and
    // the succeeded task is not dispatched again.
    let mut resumed = PlanCompiler::revalidate(checkpoint).unwrap();
    let reset = resumed.reset_for_retry();
    assert_eq!(reset, 2);

    let resolver2 = Arc::new(ScriptedResolver::new());
    let (event_tx, _event_rx) = mpsc::channel(100);
    let mut executor2 =
        Executor::new(resumed, resolver2.clone(), fast_config(1), event_tx).unwrap();
    let report = executor2.run().await.unwrap();

    assert!(report.is_success());
    assert_eq!(resolver2.dispatch_log(), vec!["mix batter", "bake"]);
}

/// Loading without an explicit reset keeps failed/blocked terminal;
/// nothing is retried automatically.
#[tokio::test]
async fn test_resume_without_reset_does_not_retry() {
    let (store, _dir) = temp_store();
    let (project, _, _, _) = cake_project();

    let resolver = Arc::new(ScriptedResolver::new().script(
        "buy ingredients",
        vec![failure("x"), failure("x"), failure("x")],
    ));
    let (event_tx, _event_rx) = mpsc::channel(100);
    let mut executor = Executor::new(project, resolver.clone(), fast_config(1), event_tx)
        .unwrap()
        .with_checkpoint_store(store.clone());
    executor.run().await.unwrap();

    let loaded = PlanCompiler::revalidate(store.load("cake").unwrap()).unwrap();
    let resolver2 = Arc::new(ScriptedResolver::new());
    let (event_tx, _event_rx) = mpsc::channel(100);
    let mut executor2 =
        Executor::new(loaded, resolver2.clone(), fast_config(1), event_tx).unwrap();
    let report = executor2.run().await.unwrap();

    assert!(resolver2.dispatch_log().is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.blocked.len(), 2);
}

/// An operator may hand-edit the document between runs; the compiler
/// re-validates on load and rejects a graph edited into a cycle.
#[test]
fn test_hand_edited_cycle_rejected_on_load() {
    let (store, _dir) = temp_store();
    let (project, t1, _, t3) = cake_project();
    let path = store.save(&project).unwrap();

    // Edit the JSON by hand: give T1 a dependency on T3.
    let text = std::fs::read_to_string(&path).unwrap();
    let mut document: serde_json::Value = serde_json::from_str(&text).unwrap();
    document["tasks"][0]["depends_on"] = serde_json::json!([t3.to_string()]);
    std::fs::write(&path, serde_json::to_string_pretty(&document).unwrap()).unwrap();

    let loaded = store.load("cake").unwrap();
    assert_eq!(loaded.task(&t1).unwrap().depends_on, vec![t3]);

    let err = PlanCompiler::revalidate(loaded).unwrap_err();
    assert!(matches!(err, Error::CyclicPlan { .. }));
}

/// Hand-removing a task leaves a dangling reference, which validation
/// catches on load.
#[test]
fn test_hand_edited_dangling_reference_rejected() {
    let (store, _dir) = temp_store();
    let (project, _, _, _) = cake_project();
    let path = store.save(&project).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let mut document: serde_json::Value = serde_json::from_str(&text).unwrap();
    // Drop the first task; the second still references it.
    document["tasks"].as_array_mut().unwrap().remove(0);
    std::fs::write(&path, serde_json::to_string_pretty(&document).unwrap()).unwrap();

    let loaded = store.load("cake").unwrap();
    let err = PlanCompiler::revalidate(loaded).unwrap_err();
    assert!(matches!(err, Error::UnknownDependency { .. }));
}

/// Saved plans are listed by name.
#[test]
fn test_store_lists_saved_plans() {
    let (store, _dir) = temp_store();
    assert!(store.list().unwrap().is_empty());

    let (cake, _, _, _) = cake_project();
    store.save(&cake).unwrap();
    store.save(&Project::new("empty-plan")).unwrap();

    assert_eq!(store.list().unwrap(), vec!["cake", "empty-plan"]);
}
