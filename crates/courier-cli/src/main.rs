use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use courier_core::app::{FailurePolicy, WorkflowBuilder};
use courier_core::config::CourierConfig;
use courier_core::domain::Operation;
use courier_core::impls::{CloudTasksHttpQueue, InMemoryQueueService, LocalTraceContext, TracingEventSink};
use courier_core::ports::{QueueService, Span, TraceContext};

#[derive(Parser, Debug)]
#[command(name = "courier", version, about = "Dispatch a workflow of HTTP operations onto task queues")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every operation in the workflow file, in order.
    Kick(KickArgs),
    /// Check the workflow file without dispatching anything.
    Validate {
        #[arg(long, short = 'w')]
        workflow: PathBuf,
    },
}

#[derive(Args, Debug)]
struct KickArgs {
    /// JSON array of operations.
    #[arg(long, short = 'w')]
    workflow: PathBuf,

    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[arg(long, env = "COURIER_PROJECT")]
    project: Option<String>,

    #[arg(long, env = "COURIER_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "COURIER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    #[arg(long)]
    operation_timeout_secs: Option<u64>,

    #[arg(long)]
    run_timeout_secs: Option<u64>,

    /// Use the in-memory queue instead of the REST backend.
    #[arg(long)]
    dry_run: bool,

    /// Open a root span with this name so every task shares one trace.
    #[arg(long)]
    trace_root: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    FailFast,
    Continue,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::FailFast => FailurePolicy::FailFast,
            PolicyArg::Continue => FailurePolicy::Continue,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_workflow(path: &Path) -> Result<Vec<Operation>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read workflow {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse workflow {}", path.display()))
}

/// Flags win over the config file.
fn resolve_config(args: &KickArgs) -> Result<CourierConfig> {
    let mut config = match &args.config {
        Some(path) => CourierConfig::load(path)?,
        None => CourierConfig::default(),
    };
    if let Some(project) = &args.project {
        config.project_id = Some(project.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(token) = &args.access_token {
        config.access_token = Some(token.clone());
    }
    if let Some(policy) = args.policy {
        config.policy = policy.into();
    }
    if let Some(secs) = args.operation_timeout_secs {
        config.operation_timeout_secs = Some(secs);
    }
    if let Some(secs) = args.run_timeout_secs {
        config.run_timeout_secs = Some(secs);
    }
    Ok(config)
}

async fn kick(args: KickArgs) -> Result<ExitCode> {
    let config = resolve_config(&args)?;
    let Some(project_id) = config.project_id.clone() else {
        bail!("no project id: pass --project, set COURIER_PROJECT or add projectId to the config file");
    };
    let operations = load_workflow(&args.workflow)?;

    let queue: Arc<dyn QueueService> = if args.dry_run {
        Arc::new(InMemoryQueueService::new())
    } else {
        let mut http = CloudTasksHttpQueue::new(config.endpoint.clone());
        if let Some(token) = &config.access_token {
            http = http.with_access_token(token.clone());
        }
        Arc::new(http)
    };

    let tracer = LocalTraceContext::new();
    let options = config.run_options();
    let mut builder = WorkflowBuilder::new(project_id, queue)
        .tracer(Arc::new(tracer.clone()) as Arc<dyn TraceContext>)
        .event_sink(Arc::new(TracingEventSink))
        .policy(options.policy)
        .operations(operations);
    if let Some(timeout) = options.operation_timeout {
        builder = builder.operation_timeout(timeout);
    }
    if let Some(timeout) = options.run_timeout {
        builder = builder.run_timeout(timeout);
    }
    let engine = builder.build().context("invalid workflow")?;

    let mut root = args.trace_root.as_deref().map(|name| tracer.start_root(name));
    let summary = engine.kick().await;
    if let Some(span) = root.as_mut() {
        if let Err(e) = span.end() {
            tracing::warn!(error = %e, "failed to end root span");
        }
    }
    let summary = summary.context("workflow run failed")?;

    let queue = engine.get_workflow_queue();
    println!("{}", serde_json::to_string_pretty(&queue)?);

    info!(
        dispatched = summary.dispatched,
        executed = summary.counts.executed,
        failed = summary.counts.failed,
        pending = summary.counts.pending,
        halted = summary.halted,
        "run finished"
    );
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate(workflow: &Path) -> Result<ExitCode> {
    let operations = load_workflow(workflow)?;
    let mut invalid = 0;
    for (index, op) in operations.iter().enumerate() {
        if let Err(e) = op.validate() {
            error!(index, url = %op.url, "{e}");
            invalid += 1;
        }
    }
    if invalid > 0 {
        bail!("{invalid} of {} operations are invalid", operations.len());
    }
    info!(count = operations.len(), "workflow is valid");
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Kick(args) => kick(args).await,
        Command::Validate { workflow } => validate(&workflow),
    }
}
