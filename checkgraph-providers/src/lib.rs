//! Built-in check providers: the concrete `Provider` implementations
//! the host registers at boot so workflow configs can refer to them by
//! `type`.

pub mod ai;
pub mod command;
pub mod context;
pub mod human_input;
pub mod log;
pub mod noop;
pub mod template;
pub mod webhook;
pub mod workflow;

use std::sync::Arc;

use checkgraph_core::error::Result;
use checkgraph_core::provider::ProviderRegistry;
use checkgraph_session::SessionRegistry;

pub use ai::{AiBackend, AiBackendError, AiProvider, EchoBackend};
pub use command::CommandProvider;
pub use human_input::HumanInputProvider;
pub use log::LogProvider;
pub use noop::NoopProvider;
pub use webhook::WebhookProvider;
pub use workflow::WorkflowProvider;

/// Registers every built-in provider type under the `type` string workflow
/// configs use to select it. The AI provider needs a backend and a session
/// registry; the workflow provider needs a handle back to `registry` itself,
/// for resolving nested checks' provider types.
pub fn register_builtin_providers(
    registry: &Arc<ProviderRegistry>,
    ai_backend: Arc<dyn AiBackend>,
    sessions: Arc<SessionRegistry>,
) -> Result<()> {
    registry.register(Arc::new(NoopProvider))?;
    registry.register(Arc::new(LogProvider))?;
    registry.register(Arc::new(HumanInputProvider))?;
    registry.register(Arc::new(CommandProvider))?;
    registry.register(Arc::new(WebhookProvider))?;
    registry.register(Arc::new(AiProvider::new(ai_backend, sessions)))?;
    registry.register(Arc::new(WorkflowProvider::new(registry.clone())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_built_in_provider_type() {
        let registry = Arc::new(ProviderRegistry::new());
        register_builtin_providers(&registry, Arc::new(EchoBackend), Arc::new(SessionRegistry::new())).unwrap();
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["ai", "command", "human_input", "log", "noop", "webhook", "workflow"]);
    }
}
