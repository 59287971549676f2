//! Compilation integration tests: goals through the resolver into a
//! validated project, including cross-goal dependencies and failure
//! containment.

use std::sync::Arc;

use autoplan::compiler::PlanCompiler;
use autoplan::error::Error;
use autoplan::resolver::{DependencyRef, Resolution};

use crate::fixtures::{cake_resolution, proposed, ScriptedResolver};

/// Given the "bake a cake" goal
/// When the compiler runs
/// Then the project holds one assistant and the three-task chain
#[tokio::test]
async fn test_compile_cake_goal() {
    let resolver = ScriptedResolver::new().resolve("bake a cake", cake_resolution());
    let compiler = PlanCompiler::new(Arc::new(resolver));

    let outcome = compiler
        .compile("cake", &["bake a cake".to_string()])
        .await
        .unwrap();

    let project = outcome.project;
    assert!(outcome.unresolved.is_empty());
    assert_eq!(project.name, "cake");
    assert_eq!(project.goals.len(), 1);
    assert_eq!(project.assistants.len(), 1);
    assert_eq!(project.task_count(), 3);

    let ids = project.task_ids();
    assert_eq!(project.task(&ids[0]).unwrap().description, "buy ingredients");
    assert_eq!(project.task(&ids[1]).unwrap().depends_on, vec![ids[0]]);
    assert_eq!(project.task(&ids[2]).unwrap().depends_on, vec![ids[1]]);
}

/// Cross-goal dependencies are expressed by label: a task under one
/// assistant may depend on a task under another.
#[tokio::test]
async fn test_compile_two_goals_with_cross_goal_dependency() {
    let shopping = Resolution {
        external_ref: "shopper-buyer".to_string(),
        name: "Shopper".to_string(),
        role: "buyer".to_string(),
        instructions: String::new(),
        tasks: vec![proposed(Some("groceries"), "buy groceries", Vec::new())],
    };
    let cooking = Resolution {
        external_ref: "cook-chef".to_string(),
        name: "Cook".to_string(),
        role: "chef".to_string(),
        instructions: String::new(),
        tasks: vec![
            proposed(Some("prep"), "prep vegetables", vec![DependencyRef::Label(
                "groceries".to_string(),
            )]),
            proposed(None, "cook dinner", vec![DependencyRef::Label("prep".to_string())]),
        ],
    };
    let resolver = ScriptedResolver::new()
        .resolve("buy groceries", shopping)
        .resolve("cook dinner", cooking);
    let compiler = PlanCompiler::new(Arc::new(resolver));

    let outcome = compiler
        .compile(
            "dinner",
            &["buy groceries".to_string(), "cook dinner".to_string()],
        )
        .await
        .unwrap();

    let project = outcome.project;
    assert_eq!(project.goals.len(), 2);
    assert_eq!(project.assistants.len(), 2);

    let ids = project.task_ids();
    // prep depends on the shopping goal's task.
    assert_eq!(project.task(&ids[1]).unwrap().depends_on, vec![ids[0]]);
    assert_ne!(
        project.task(&ids[0]).unwrap().assistant_id,
        project.task(&ids[1]).unwrap().assistant_id
    );
}

/// A resolution failure skips that goal's subtree only; other goals
/// still compile and the skip is reported.
#[tokio::test]
async fn test_resolution_failure_is_contained() {
    let resolver = ScriptedResolver::new().resolve("bake a cake", cake_resolution());
    // "world peace" has no script, so resolution fails for it.
    let compiler = PlanCompiler::new(Arc::new(resolver));

    let outcome = compiler
        .compile(
            "mixed",
            &["bake a cake".to_string(), "world peace".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(outcome.project.goals.len(), 1);
    assert_eq!(outcome.project.task_count(), 3);
    assert_eq!(outcome.unresolved.len(), 1);
    assert_eq!(outcome.unresolved[0].goal.text, "world peace");
}

/// When no goal resolves at all, compilation fails outright.
#[tokio::test]
async fn test_all_goals_unresolved_is_fatal() {
    let compiler = PlanCompiler::new(Arc::new(ScriptedResolver::new()));

    let err = compiler
        .compile("empty", &["unscripted goal".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Resolution(_)));
}

/// A decomposition that references a label nowhere in the plan is a
/// structural error and aborts the whole compile.
#[tokio::test]
async fn test_dangling_reference_aborts_compile() {
    let broken = Resolution {
        external_ref: "b".to_string(),
        name: "B".to_string(),
        role: "b".to_string(),
        instructions: String::new(),
        tasks: vec![proposed(
            None,
            "needs missing",
            vec![DependencyRef::Label("missing".to_string())],
        )],
    };
    let resolver = ScriptedResolver::new()
        .resolve("bake a cake", cake_resolution())
        .resolve("broken goal", broken);
    let compiler = PlanCompiler::new(Arc::new(resolver));

    let err = compiler
        .compile(
            "mixed",
            &["bake a cake".to_string(), "broken goal".to_string()],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownDependency { .. }));
}

/// A decomposition whose labels form a loop is rejected with the cycle
/// named in the error.
#[tokio::test]
async fn test_cyclic_decomposition_rejected() {
    let cyclic = Resolution {
        external_ref: "c".to_string(),
        name: "C".to_string(),
        role: "c".to_string(),
        instructions: String::new(),
        tasks: vec![
            proposed(Some("first"), "step one", vec![DependencyRef::Label("second".to_string())]),
            proposed(Some("second"), "step two", vec![DependencyRef::Label("first".to_string())]),
        ],
    };
    let resolver = ScriptedResolver::new().resolve("loop", cyclic);
    let compiler = PlanCompiler::new(Arc::new(resolver));

    let err = compiler.compile("loop", &["loop".to_string()]).await.unwrap_err();

    match err {
        Error::CyclicPlan { cycle } => {
            assert!(cycle.contains("step one"));
            assert!(cycle.contains("step two"));
        }
        other => panic!("Expected CyclicPlan, got {:?}", other),
    }
}
