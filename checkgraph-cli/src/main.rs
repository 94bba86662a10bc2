//! `checkgraph`: loads a workflow file, runs it against a PR, and prints
//! the grouped results and statistics to stdout. A small clap surface —
//! load, run, print — rather than a full TUI or database-backed binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use checkgraph_core::model::PrInfo;
use checkgraph_core::provider::ProviderRegistry;
use checkgraph_host::{load_workflow_json, load_workflow_yaml, ExecuteOptions, WorkflowHost};
use checkgraph_providers::{register_builtin_providers, EchoBackend};
use checkgraph_session::SessionRegistry;
use clap::Parser;

#[derive(Parser)]
#[command(name = "checkgraph")]
#[command(about = "Runs a checkgraph workflow against a pull request", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the workflow file (.yaml/.yml or .json)
    workflow: PathBuf,

    /// Path to a JSON-encoded PrInfo; defaults to a minimal empty PR
    #[arg(long)]
    pr: Option<PathBuf>,

    /// The event name that selects which root checks fire
    #[arg(long, default_value = "pull_request")]
    event: String,

    /// Restrict the printed report to these check ids (comma-separated);
    /// the run itself is unaffected — every reachable check still executes
    #[arg(long, value_delimiter = ',')]
    check: Vec<String>,

    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(filter)).try_init();
}

fn load_pr(path: Option<&PathBuf>) -> anyhow::Result<PrInfo> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(PrInfo::new(0, "")),
    }
}

fn load_workflow(path: &PathBuf) -> anyhow::Result<checkgraph_core::model::WorkflowConfig> {
    let raw = std::fs::read_to_string(path)?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    if is_json {
        Ok(load_workflow_json(&raw)?)
    } else {
        Ok(load_workflow_yaml(&raw)?)
    }
}

fn filter_for_report(grouped: &checkgraph_core::aggregator::GroupedResults, only: &[String]) -> HashMap<String, HashMap<String, Vec<checkgraph_core::model::ReviewSummary>>> {
    if only.is_empty() {
        return grouped.0.clone();
    }
    let only: std::collections::HashSet<&String> = only.iter().collect();
    grouped
        .0
        .iter()
        .map(|(group, checks)| (group.clone(), checks.iter().filter(|(check_id, _)| only.contains(check_id)).map(|(k, v)| (k.clone(), v.clone())).collect()))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let workflow = load_workflow(&cli.workflow)?;
    let pr = load_pr(cli.pr.as_ref())?;

    let providers = Arc::new(ProviderRegistry::new());
    register_builtin_providers(&providers, Arc::new(EchoBackend), Arc::new(SessionRegistry::new()))?;

    let host = WorkflowHost::new(workflow, providers);
    let result = host.execute_checks(ExecuteOptions { pr, event: cli.event }).await;

    let report = filter_for_report(&result.grouped_results, &cli.check);
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "groupedResults": report,
        "statistics": result.statistics,
    }))?);

    Ok(())
}
