use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use triage_core::{AnalysisResult, Collaborators, Orchestrator, PipelineConfig, RemediationResult, VERSION};
use triage_graph::{SignalMetricsCollector, StaticTopology};
use triage_model::{ErrorContext, ErrorPattern, RemediationAction};
use triage_patterns::{InMemoryBackend, PatternStore, RemotePatternStore};
use triage_remediation::{ActionError, ActionHandler, ApprovalGate, AutoApprove, DenyAll};

/// Logs actions instead of performing them
struct DryRunHandler;

#[async_trait]
impl ActionHandler for DryRunHandler {
    async fn execute(&self, action: &RemediationAction) -> Result<(), ActionError> {
        info!(action = %action.name, target = %action.target_component, parameters = ?action.parameters, "dry run: execute");
        Ok(())
    }

    async fn revert(&self, action: &RemediationAction) -> Result<(), ActionError> {
        let inverse = action.inverse.as_deref().unwrap_or("-");
        info!(action = %action.name, inverse, target = %action.target_component, "dry run: revert");
        Ok(())
    }
}

fn pipeline_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("context")
                .long("context")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("ErrorContext as JSON"),
        )
        .arg(
            Arg::new("topology")
                .long("topology")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Component topology as TOML ([[component]] tables)"),
        )
        .arg(
            Arg::new("patterns")
                .long("patterns")
                .value_parser(value_parser!(PathBuf))
                .help("Known error patterns as a JSON array"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_orchestrator(args: &ArgMatches) -> Result<Orchestrator> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let topology_path = args.get_one::<PathBuf>("topology").context("--topology is required")?;
    let topology = StaticTopology::load(topology_path)
        .with_context(|| format!("loading topology {}", topology_path.display()))?;

    let store = RemotePatternStore::new(Arc::new(InMemoryBackend::new()), config.store.clone());
    store.connect().await?;
    if let Some(path) = args.get_one::<PathBuf>("patterns") {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let patterns: Vec<ErrorPattern> = serde_json::from_str(&raw).context("parsing patterns")?;
        for pattern in &patterns {
            store.save_pattern(pattern).await?;
        }
        info!(count = patterns.len(), "patterns loaded");
    }

    let approvals: Arc<dyn ApprovalGate> = if args.get_flag("approve") {
        Arc::new(AutoApprove)
    } else {
        Arc::new(DenyAll)
    };
    let parts = Collaborators::standard(
        &config,
        Arc::new(topology),
        Arc::new(SignalMetricsCollector::with_config(config.metrics.clone())),
        Arc::new(store),
        Arc::new(DryRunHandler),
        approvals,
    );
    Ok(Orchestrator::new(config, parts))
}

fn read_context(args: &ArgMatches) -> Result<ErrorContext> {
    let path = args.get_one::<PathBuf>("context").context("--context is required")?;
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing error context {}", path.display()))
}

fn print_analysis(result: &AnalysisResult) {
    println!("Correlation: {}", result.correlation_id);
    println!(
        "Classification: {} (confidence {:.2}, severity {})",
        result.classification.category, result.classification.confidence, result.classification.severity
    );
    println!("Root cause: {}", result.root_cause.as_deref().unwrap_or("unknown"));
    println!("Impacted components:");
    for node in &result.impact.impacted {
        println!("  {:<24} {:?}/{:?} score {:.2}", node.component_id, node.severity, node.scope, node.score);
    }
    if !result.impact.related_errors.is_empty() {
        println!("Related errors:");
        for related in &result.impact.related_errors {
            println!("  {:<24} {} ({:.2})", related.component_id, related.error_type, related.confidence);
        }
    }
    if let Some(summary) = &result.summary {
        println!("Summary: {summary}");
    }
    for warning in &result.warnings {
        println!("Warning: {warning}");
    }
}

fn print_remediation(result: &RemediationResult) {
    print_analysis(&result.analysis);
    println!();
    println!("Plan:");
    for (action, risk) in result.plan.actions.iter().zip(&result.assessments) {
        println!(
            "  {:<24} -> {:<20} risk {:?} ({:.2})",
            action.name, action.target_component, risk.level, risk.score
        );
    }
    for issue in &result.validation.issues {
        println!("  {:?}: {} [{}]", issue.severity, issue.message, issue.component);
    }
    if let Some(execution) = &result.execution {
        println!("Execution: {:?}", execution.status);
        for action in &execution.actions {
            println!(
                "  {:<24} {:?} attempts {}{}",
                action.action_name,
                action.status,
                action.attempts,
                if action.rolled_back { " (rolled back)" } else { "" }
            );
        }
        if let Some(rollback) = &execution.rollback {
            println!("Rollback: {:?}", rollback.status);
        }
    }
    if let Some(failure) = &result.failure {
        println!("Failure: {failure}");
    }
    if let Some(failure) = &result.rollback_failure {
        println!("Rollback failure: {failure}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Command::new("triage")
        .version(VERSION)
        .about("Analyze runtime errors and remediate them against a dependency topology")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Pipeline configuration (TOML)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .arg(
            Arg::new("approve")
                .long("approve")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Approve actions flagged as high risk"),
        )
        .subcommand(pipeline_args(Command::new("analyze").about("Analyze an error without remediating")))
        .subcommand(pipeline_args(
            Command::new("remediate").about("Analyze an error and run its remediation plan (dry run)"),
        ));

    let matches = cli.get_matches();
    init_logging(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("analyze", args)) => {
            let orchestrator = build_orchestrator(args).await?;
            let result = orchestrator.analyze_error(read_context(args)?).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_analysis(&result);
            }
        }
        Some(("remediate", args)) => {
            let orchestrator = build_orchestrator(args).await?;
            let result = orchestrator.remediate_error(read_context(args)?).await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_remediation(&result);
            }
            std::process::exit(if result.succeeded() { 0 } else { 1 });
        }
        _ => anyhow::bail!("a subcommand is required"),
    }
    Ok(())
}
