use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use autoplan::compiler::PlanCompiler;
use autoplan::config::Config;
use autoplan::core::Project;
use autoplan::orchestration::{ExecutionReport, Executor, ExecutorConfig, SchedulerEvent};
use autoplan::resolver::{AssistantResolver, HeadlessResolver};
use autoplan::store::PlanStore;
use autoplan::{alog, Error, Result};

/// Autoplan - turn high-level goals into an executable project plan
#[derive(Parser, Debug)]
#[command(name = "autoplan")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    AUTOPLAN_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// The goals for the project
    #[arg(conflicts_with = "load")]
    pub goals: Vec<String>,

    /// Load a previously saved plan instead of compiling goals
    #[arg(short, long)]
    pub load: Option<String>,

    /// Save the plan under this name before execution
    #[arg(short, long)]
    pub save: Option<String>,

    /// Maximum number of tasks in flight at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Reset failed and blocked tasks from a loaded checkpoint
    #[arg(long, requires = "load", conflicts_with = "goals")]
    pub retry_failed: bool,

    /// Compile (and optionally save) the plan without executing it
    #[arg(long)]
    pub no_execute: bool,

    /// Enable debug logging (writes to ~/.autoplan/autoplan.log)
    #[arg(short, long)]
    pub debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    autoplan::log::init_with_debug(cli.debug);

    match run(cli) {
        Ok(report) => {
            if report.map(|r| r.is_success()).unwrap_or(true) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Compile (or load) the plan and execute it.
///
/// Returns the execution report, or `None` when `--no-execute` stopped
/// after compilation.
fn run(cli: Cli) -> Result<Option<ExecutionReport>> {
    if cli.goals.is_empty() && cli.load.is_none() {
        return Err(Error::Validation(
            "supply at least one goal, or --load a saved plan".to_string(),
        ));
    }

    let config = Config::load()?;
    let store = PlanStore::new(config.projects_dir());
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let resolver: Arc<dyn AssistantResolver> =
            Arc::new(HeadlessResolver::new(config.effective_command())?);

        let mut project = match &cli.load {
            Some(name) => {
                println!("Loading plan {:?}", name);
                let mut project = PlanCompiler::revalidate(store.load(name)?)?;
                if cli.retry_failed {
                    let reset = project.reset_for_retry();
                    println!("Reset {} failed/blocked task(s) for retry", reset);
                }
                if !cli.no_execute {
                    // Update remote assistant definitions before running;
                    // stored correlation tokens are passed back so the
                    // resolver reuses them instead of creating duplicates.
                    let compiler = PlanCompiler::new(Arc::clone(&resolver));
                    compiler.refresh_assistants(&mut project).await?;
                }
                project
            }
            None => {
                let name = cli
                    .save
                    .clone()
                    .unwrap_or_else(|| plan_name(&cli.goals[0]));
                let compiler = PlanCompiler::new(Arc::clone(&resolver));
                let outcome = compiler.compile(&name, &cli.goals).await?;
                for unresolved in &outcome.unresolved {
                    eprintln!(
                        "Warning: goal {:?} skipped: {}",
                        unresolved.goal.text, unresolved.reason
                    );
                }
                outcome.project
            }
        };

        if let Some(name) = &cli.save {
            project.name = name.clone();
        }

        print_plan(&project);

        if let Some(name) = &cli.save {
            let path = store.save(&project)?;
            println!("Saved plan {:?} to {}", name, path.display());
        }

        if cli.no_execute {
            return Ok(None);
        }

        let exec_config = ExecutorConfig {
            concurrency: cli.concurrency.unwrap_or_else(|| config.concurrency()),
            max_attempts: config.max_attempts(),
            backoff: config.backoff(),
            task_timeout: config.task_timeout(),
        };

        let (event_tx, event_rx) = mpsc::channel(100);
        let mut executor = Executor::new(project, resolver, exec_config, event_tx)?;
        if cli.save.is_some() || cli.load.is_some() {
            executor = executor.with_checkpoint_store(store.clone());
        }

        // Ctrl-C stops new dispatch; in-flight tasks run to completion.
        let cancel = executor.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nAbort requested; letting in-flight tasks finish...");
                cancel.cancel();
            }
        });

        let project_handle = executor.project();
        let printer = tokio::spawn(print_events(event_rx, project_handle));

        let report = executor.run().await?;
        let _ = printer.await;

        if cli.save.is_some() || cli.load.is_some() {
            store.save(&executor.snapshot().await)?;
        }

        print_report(&report);
        Ok(Some(report))
    })
}

/// Derive a plan name from the first goal.
fn plan_name(goal: &str) -> String {
    let mut name: String = goal
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(40);
    while name.ends_with('-') {
        name.pop();
    }
    if name.is_empty() {
        "plan".to_string()
    } else {
        name
    }
}

/// Print the compiled plan before execution.
fn print_plan(project: &Project) {
    println!();
    println!("Plan {:?}:", project.name);
    for goal in &project.goals {
        println!("  Goal: {}", goal.text);
        if let Some(assistant) = project.assistant_for_goal(&goal.id) {
            println!("    Assistant: {} ({})", assistant.name, assistant.role);
            for task in project.tasks.iter().filter(|t| t.assistant_id == assistant.id) {
                let deps = if task.depends_on.is_empty() {
                    String::new()
                } else {
                    format!(
                        "  [after {}]",
                        task.depends_on
                            .iter()
                            .map(|d| d.short())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                };
                println!("    - {} {}{}", task.id.short(), task.description, deps);
            }
        }
    }
    println!();
}

/// Stream execution progress to stdout.
async fn print_events(
    mut event_rx: mpsc::Receiver<SchedulerEvent>,
    project: Arc<tokio::sync::RwLock<Project>>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SchedulerEvent::TaskStarted { task_id, attempt } => {
                let description = describe(&project, &task_id).await;
                if attempt > 1 {
                    println!("-> {} (attempt {})", description, attempt);
                } else {
                    println!("-> {}", description);
                }
            }
            SchedulerEvent::TaskSucceeded { task_id } => {
                println!("   {} succeeded", describe(&project, &task_id).await);
            }
            SchedulerEvent::TaskFailed {
                task_id,
                message,
                will_retry,
            } => {
                let suffix = if will_retry { ", retrying" } else { "" };
                println!(
                    "   {} failed: {}{}",
                    describe(&project, &task_id).await,
                    message,
                    suffix
                );
            }
            SchedulerEvent::TaskBlocked { task_id, reason } => {
                println!("   {} blocked: {}", describe(&project, &task_id).await, reason);
            }
            SchedulerEvent::PlanSettled => break,
        }
    }
}

async fn describe(project: &Arc<tokio::sync::RwLock<Project>>, task_id: &autoplan::core::TaskId) -> String {
    let project = project.read().await;
    project
        .task(task_id)
        .map(|t| t.description.clone())
        .unwrap_or_else(|| task_id.short())
}

/// Print the final execution summary.
fn print_report(report: &ExecutionReport) {
    println!();
    println!(
        "Done: {} succeeded, {} failed, {} blocked{}",
        report.succeeded.len(),
        report.failed.len(),
        report.blocked.len(),
        if report.unfinished.is_empty() {
            String::new()
        } else {
            format!(", {} unfinished", report.unfinished.len())
        }
    );
    for (task_id, reason) in &report.failed {
        println!("  failed  {}: {}", task_id.short(), reason);
    }
    for (task_id, reason) in &report.blocked {
        println!("  blocked {}: {}", task_id.short(), reason);
    }
    alog!(
        "Run finished: success={}, total={}",
        report.is_success(),
        report.total()
    );
}
