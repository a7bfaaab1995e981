//! Taskflow Demo: Documentation Review Pipeline
//!
//! Walks a handful of documentation tasks through a four-step graph:
//!
//! 1. **Routine work** runs straight through without consulting anything
//! 2. **Rejected drafts** fail review and are routed to a revision step
//! 3. **Ambiguous or complex work** parks in `Blocked` at the gated review
//!    step until an operator resumes it with guidance
//! 4. **Dependent tasks** wait for their prerequisite task to finish
//!
//! ```text
//! cargo run -p review-pipeline -- --knowledge "security=Threat-model every auth flow."
//! ```

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use taskflow_engine::{
    init_tracing, load_workflow_file, Delegate, DelegateError, DelegateRegistry, EngineConfig,
    GuidanceSignal, InMemoryTaskStore, NewTask, StaticKnowledgeBase, TaskRun, TaskStore,
    WorkflowCatalog, WorkflowEngine,
};
use taskflow_types::{
    DelegationRequest, DelegationResponse, SuggestedAction, SuspendReason, TaskId, TaskStatus,
};

/// Review pipeline demo CLI
#[derive(Parser)]
#[command(name = "review-pipeline")]
#[command(about = "Taskflow demo - documentation review pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TASKFLOW_CONFIG")]
    config: Option<String>,

    /// Workflow definition (JSON)
    #[arg(
        short,
        long,
        default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/workflow.json")
    )]
    workflow: PathBuf,

    /// Knowledge entry as KEYWORD=TEXT; repeatable
    #[arg(short, long = "knowledge")]
    knowledge: Vec<String>,

    /// Write the final task records to this file as JSON
    #[arg(long)]
    export: Option<PathBuf>,

    /// Log level override
    #[arg(long, env = "TASKFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,
}

// ── Delegates ────────────────────────────────────────────────────────

/// The three roles the review graph delegates to
#[derive(Clone, Copy, Debug)]
enum Role {
    Writer,
    Reviewer,
    Publisher,
}

#[async_trait]
impl Delegate for Role {
    async fn invoke(
        &self,
        request: DelegationRequest,
    ) -> Result<DelegationResponse, DelegateError> {
        match self {
            Role::Writer => write(request),
            Role::Reviewer => Ok(review(request)),
            Role::Publisher => {
                let location = format!("docs/{}.md", request.task_id.short());
                Ok(DelegationResponse::success(Default::default()).with_output("location", location))
            }
        }
    }
}

fn write(request: DelegationRequest) -> Result<DelegationResponse, DelegateError> {
    let topic = request
        .inputs
        .get("topic")
        .ok_or_else(|| DelegateError::Rejected("writer needs a topic".to_string()))?;

    let draft = match request.inputs.get("draft") {
        // revision pass
        Some(previous) if request.step_id.as_str() == "revise" => {
            previous.replace("TODO", "(covered)")
        }
        _ => format!("Notes on {}", topic),
    };
    Ok(DelegationResponse::success(Default::default()).with_output("draft", draft))
}

fn review(request: DelegationRequest) -> DelegationResponse {
    let draft = request.inputs.get("draft").map(String::as_str).unwrap_or("");
    if draft.contains("TODO") {
        return DelegationResponse::failure("draft has unresolved TODO markers");
    }

    let basis = match (&request.context.knowledge, &request.context.guidance) {
        (_, Some(guidance)) => format!("approved per guidance: {}", guidance),
        (Some(knowledge), None) => format!("approved against: {}", knowledge),
        (None, None) => "approved".to_string(),
    };
    DelegationResponse::success(Default::default()).with_output("verdict", basis)
}

// ── Output ───────────────────────────────────────────────────────────

fn header(title: &str) {
    println!();
    println!("{}", "═".repeat(72).cyan());
    println!("  {}", title.cyan().bold());
    println!("{}", "═".repeat(72).cyan());
}

fn status_label(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Done => status.to_string().green().bold(),
        TaskStatus::Failed => status.to_string().red().bold(),
        TaskStatus::Blocked => status.to_string().yellow().bold(),
        _ => status.to_string().normal(),
    }
}

fn print_run(run: &TaskRun) {
    println!(
        "  {} {:<16} {:<12} steps={} at={}",
        "├".dimmed(),
        run.task_id.as_str(),
        status_label(run.status),
        run.steps_executed,
        run.current_step_id
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("-")
    );
    match &run.suspension {
        Some(SuspendReason::AwaitingGuidance { question }) => {
            println!("  {}   {} {}", "│".dimmed(), "asks:".yellow(), question);
        }
        Some(SuspendReason::Escalated(request)) => {
            println!(
                "  {}   {} {}",
                "│".dimmed(),
                "escalated:".yellow(),
                request.missing_information
            );
            for suggestion in &request.suggestions {
                let text = match suggestion {
                    SuggestedAction::ExternalSearch { query } => format!("search for '{}'", query),
                    SuggestedAction::ReadReference { reference } => format!("read {}", reference),
                    SuggestedAction::AskClarification { question } => format!("ask: {}", question),
                    SuggestedAction::ProceedFlaggedUncertain => {
                        "proceed, flagged uncertain".to_string()
                    }
                };
                println!("  {}     - {}", "│".dimmed(), text);
            }
        }
        None => {}
    }
}

fn knowledge_base(entries: &[String]) -> anyhow::Result<StaticKnowledgeBase> {
    entries.iter().try_fold(StaticKnowledgeBase::new(), |kb, entry| {
        let (keyword, text) = entry
            .split_once('=')
            .with_context(|| format!("knowledge entry '{}' is not KEYWORD=TEXT", entry))?;
        Ok(kb.with_entry(keyword.trim(), text.trim()))
    })
}

// ── Main ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    init_tracing(&config.logging).context("installing tracing subscriber")?;

    let definition = load_workflow_file(&cli.workflow)
        .with_context(|| format!("loading workflow {}", cli.workflow.display()))?;
    let mut catalog = WorkflowCatalog::new();
    let workflow = catalog.publish(definition)?;
    tracing::info!(
        workflow_id = %workflow.id(),
        steps = workflow.steps().len(),
        "Workflow published"
    );

    let store = Arc::new(InMemoryTaskStore::new());
    let delegates = DelegateRegistry::new()
        .with("writer", Arc::new(Role::Writer))
        .with("reviewer", Arc::new(Role::Reviewer))
        .with("publisher", Arc::new(Role::Publisher));
    let engine = Arc::new(
        WorkflowEngine::new(workflow, store.clone(), delegates, config)?
            .with_knowledge(Arc::new(knowledge_base(&cli.knowledge)?)),
    );

    // ── Part 1: Intake ───────────────────────────────────────────────
    header("Part 1: Submitting tasks");

    let submissions = [
        NewTask::new(TaskId::new("docs-caching"))
            .with_metadata("topic", "response caching")
            .with_metadata("complexity", "routine"),
        NewTask::new(TaskId::new("docs-retries"))
            .with_metadata("topic", "retry policy TODO")
            .with_metadata("complexity", "simple"),
        NewTask::new(TaskId::new("docs-auth")).with_metadata("topic", "login flow"),
        NewTask::new(TaskId::new("docs-billing"))
            .with_metadata("topic", "invoice exports")
            .with_metadata("complexity", "complex")
            .with_related_doc("docs/billing/overview.md"),
        NewTask::new(TaskId::new("docs-sso"))
            .with_metadata("topic", "single sign-on")
            .with_metadata("complexity", "routine")
            .depends_on(TaskId::new("docs-auth")),
    ];
    for task in submissions {
        let record = engine.submit(task).await?;
        println!("  {} submitted {}", "├".dimmed(), record.id.as_str().bold());
    }

    // ── Part 2: First pass ───────────────────────────────────────────
    header("Part 2: Running every runnable task");

    for run in engine.run_pending().await? {
        print_run(&run);
    }

    // ── Part 3: Guidance ─────────────────────────────────────────────
    header("Part 3: Resuming blocked tasks with guidance");

    let blocked: Vec<TaskId> = store
        .list()
        .await?
        .into_iter()
        .filter(|r| r.status == TaskStatus::Blocked)
        .map(|r| r.id)
        .collect();
    for task_id in blocked {
        let answer = format!("reviewed by the security team for {}", task_id);
        let run = engine.resume(GuidanceSignal::new(task_id, answer)).await?;
        print_run(&run);
    }

    // ── Part 4: Dependents ───────────────────────────────────────────
    header("Part 4: Running tasks released by their prerequisites");

    for run in engine.run_pending().await? {
        print_run(&run);
    }

    // ── Summary ──────────────────────────────────────────────────────
    header("Summary");

    let records = store.snapshot().await?;
    for record in &records {
        let location = record
            .collected_outputs()
            .get("location")
            .cloned()
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {:<16} {:<12} history={} published={}",
            "├".dimmed(),
            record.id.as_str(),
            status_label(record.status),
            record.history.len(),
            location
        );
    }

    if let Some(path) = cli.export {
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("\n  exported {} records to {}", records.len(), path.display());
    }

    Ok(())
}
