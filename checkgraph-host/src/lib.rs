//! Workflow Host: binds a validated config to the scheduler, selects
//! the event-triggered subset, and is the single thing frontends talk to —
//! `executeChecks` plus a pass-through to the event bus, the same "one
//! entry point, one event gateway" role a workflow service plays in front
//! of its own execution engine.

pub mod config;

use std::sync::Arc;

use checkgraph_core::aggregator::{ExecutionStatistics, GroupedResults};
use checkgraph_core::events::{EventBus, Shutdown};
use checkgraph_core::model::{PrInfo, WorkflowConfig};
use checkgraph_core::provider::ProviderRegistry;
use checkgraph_core::scheduler::Scheduler;
use checkgraph_tooling::cancellation::CancellationToken;

pub use config::{load_workflow_json, load_workflow_yaml, HostConfigError};

/// The event-triggered PR under review plus the event name that selects
/// which root checks fire.
pub struct ExecuteOptions {
    pub pr: PrInfo,
    pub event: String,
}

/// `executeChecks`'s return shape: final aggregated results and per-check
/// statistics, ready to hand back to whatever called the host.
pub struct ExecuteChecksResult {
    pub grouped_results: GroupedResults,
    pub statistics: ExecutionStatistics,
}

/// Owns one workflow config and the machinery to run it: a provider
/// registry, an event bus frontends subscribe to directly, and a root
/// cancellation token every run's scheduler is a child of, so cancelling
/// the host cancels every run it has ever started.
pub struct WorkflowHost {
    config: Arc<WorkflowConfig>,
    providers: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
    root_cancellation: CancellationToken,
}

impl WorkflowHost {
    pub fn new(config: WorkflowConfig, providers: Arc<ProviderRegistry>) -> Self {
        Self { config: Arc::new(config), providers, events: Arc::new(EventBus::new()), root_cancellation: CancellationToken::new() }
    }

    /// The event bus frontends subscribe to. Exposed directly rather than
    /// wrapped, so frontends subscribe to the scheduler's own broadcast
    /// channels instead of the host re-publishing them under new names.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Cancels every run this host has started or will start.
    pub fn shutdown(&self, reason: impl Into<String>) {
        self.root_cancellation.cancel();
        self.events.publish_shutdown(Shutdown { error: Some(reason.into()) });
    }

    /// Drives the DAG to completion for `options.event` against
    /// `options.pr`. A scheduler failure is treated as a fatal condition:
    /// `Shutdown` is published and a best-effort (here, empty) result is
    /// returned rather than propagating the error to the caller.
    pub async fn execute_checks(&self, options: ExecuteOptions) -> ExecuteChecksResult {
        let run_cancellation = self.root_cancellation.child_token();
        let scheduler = Scheduler::new(self.config.clone(), self.providers.clone(), self.events.clone(), run_cancellation);

        match scheduler.run(&options.pr, &options.event).await {
            Ok(aggregator) => {
                let (grouped_results, statistics) = aggregator.into_parts();
                ExecuteChecksResult { grouped_results, statistics }
            }
            Err(err) => {
                tracing::error!(error = %err, "workflow run failed fatally");
                self.events.publish_shutdown(Shutdown { error: Some(err.to_string()) });
                ExecuteChecksResult { grouped_results: GroupedResults::default(), statistics: ExecutionStatistics::default() }
            }
        }
    }
}
