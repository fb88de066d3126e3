use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use crewflow_core::metrics::init_metrics_from_env;
use crewflow_core::{
    BackendError, BackendReply, CohereBackend, CompletionRequest, Config, ConfigLoader,
    CrewExecutor, EventCollector, FileWriterTool, InferenceBackend, Orchestrator, Pipeline,
    RunLogInput, SearchHit, SearchProvider, SerperSearch, TelemetryOptions, TextReportWriter,
    ToolError, ToolRegistry, TraceCollector, WebSearchTool, drain_events, init_telemetry,
    log_run_completion, persist_trace, report_targets, research_pipeline,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "crewflow",
    version,
    about = "Multi-agent company research pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research a company and save the use-case and resource reports.
    Run(RunArgs),
    /// Print the crews and their execution groups without calling any backend.
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Company to research.
    #[arg(long)]
    company: String,

    /// Path to a crewflow.toml (falls back to CREWFLOW_CONFIG, then ./crewflow.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for task outputs and reports (overrides `output.dir`).
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = match &cli.command {
        Command::Run(args) => args.config.clone(),
        Command::Plan(args) => args.config.clone(),
    };
    let config = ConfigLoader::load(config_path).context("failed to load configuration")?;

    init_telemetry(TelemetryOptions::with_default_level(&config.logging.level))?;
    init_metrics_from_env("crewflow-cli")?;

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args, config).await,
            Command::Plan(_) => plan_command(&config),
        }
    })
}

async fn run_command(args: RunArgs, mut config: Config) -> Result<ExitCode> {
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    let output_dir = config.output.dir.clone();

    let backend: Arc<dyn InferenceBackend> = Arc::new(CohereBackend::from_config(&config.llm)?);
    let search = SerperSearch::from_config(&config.search)?;
    let tools = ToolRegistry::new()
        .with_tool(Arc::new(WebSearchTool::new(Arc::new(search))))
        .with_tool(Arc::new(FileWriterTool::new(&output_dir)));

    let pipeline = research_pipeline(backend, &tools, &output_dir)?;
    let (events, mut receiver) = EventCollector::new();
    let executor = CrewExecutor::new(config.executor.clone(), tools, events);
    let orchestrator = Orchestrator::new(
        pipeline,
        executor,
        Arc::new(TextReportWriter::new(&output_dir)),
    )
    .with_reports(report_targets(&config.output));

    info!(company = %args.company, output_dir = %output_dir.display(), "Starting research run");
    let report = orchestrator.run(&args.company).await?;

    let trace = TraceCollector::from_events(&drain_events(&mut receiver));
    let trace_path = match persist_trace(&config.output.trace_dir, &report.run_id, trace.events()) {
        Ok(path) => Some(path),
        Err(err) => {
            warn!(error = %err, "failed to persist trace");
            None
        }
    };

    let log_input = RunLogInput {
        run_id: report.run_id.clone(),
        input: report.input.clone(),
        status: report.status_message(),
        artifacts: report
            .artifacts
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
        warnings: report.warnings.iter().map(ToString::to_string).collect(),
        trace_path: trace_path.as_ref().map(|path| path.display().to_string()),
    };
    if let Err(err) = log_run_completion(log_input) {
        warn!(error = %err, "failed to append run log");
    }

    println!("{}", report.status_message());
    if let Some(output) = &report.final_output {
        println!("\n{output}");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if let Some(path) = &trace_path {
        println!("\nTrace saved to {}", path.display());
    }
    println!("\n{}", trace.summary().render_markdown());

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn plan_command(config: &Config) -> Result<ExitCode> {
    let tools = ToolRegistry::new()
        .with_tool(Arc::new(WebSearchTool::new(Arc::new(Offline))))
        .with_tool(Arc::new(FileWriterTool::new(&config.output.dir)));
    let pipeline = research_pipeline(Arc::new(Offline), &tools, &config.output.dir)?;
    print_plan(&pipeline);
    Ok(ExitCode::SUCCESS)
}

fn print_plan(pipeline: &Pipeline) {
    let graph = pipeline.graph();
    for (position, plan) in pipeline.crews().iter().enumerate() {
        let crew = plan.crew();
        println!("{}. crew `{}` ({:?})", position + 1, crew.name, crew.strategy);
        for (index, group) in plan.plan().groups.iter().enumerate() {
            let tasks = group
                .tasks
                .iter()
                .map(|id| match graph.task(id) {
                    Some(node) if node.spec.concurrent => format!("{id} (concurrent)"),
                    _ => id.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            println!("   group {}: {tasks}", index + 1);
        }
        println!("   final task: {}", plan.final_task());
    }
}

/// Stand-in collaborator for `plan`, which never executes a task.
struct Offline;

#[async_trait]
impl InferenceBackend for Offline {
    fn model(&self) -> &str {
        "offline"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<BackendReply, BackendError> {
        Err(BackendError::Request(
            "planning mode does not call the backend".to_string(),
        ))
    }
}

#[async_trait]
impl SearchProvider for Offline {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ToolError> {
        Err(ToolError::Failed {
            tool: "search".to_string(),
            reason: "planning mode does not search".to_string(),
        })
    }
}
