//! The check-provider contract and its process-wide registry.
//!
//! Modeled as a capability interface dispatched by a `type` string, each
//! backend implementing the trait and looked up by name — not as host
//! inheritance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::model::{PrInfo, ReviewSummary, SessionMode};

/// `sessionInfo` passed to `execute`: which upstream session (if any) this
/// check's AI session should be seeded from, and whether to reuse it.
/// `session_mode` is not part of the two-field contract the component
/// design calls out, but the AI provider cannot honor clone-vs-append
/// without it, so the scheduler forwards the check's own `session_mode`
/// alongside the two documented fields.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub parent_session_id: Option<String>,
    pub reuse_session: bool,
    pub session_mode: SessionMode,
}

/// The arguments a provider's `execute` receives. `dependency_results` maps
/// an upstream `check_id` to the selected iteration's output value.
/// `check_id` is the invoking check's own id — not listed among the
/// documented `execute` arguments, but every provider that owns a durable
/// resource keyed by check (the AI provider's session) needs its own
/// identity to register under.
#[derive(Debug, Clone)]
pub struct ExecuteContext<'a> {
    pub check_id: &'a str,
    pub pr_info: &'a PrInfo,
    pub config: &'a HashMap<String, Value>,
    pub dependency_results: &'a HashMap<String, Value>,
    pub session_info: &'a SessionInfo,
}

/// A single prerequisite a provider expects the host environment to supply,
/// e.g. an API key or an executable on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub description: String,
}

impl Requirement {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into() }
    }
}

/// Backend that executes a check by `type`. Implementations must be
/// non-throwing for expected error classes, translating them into issues
/// with a `<type>/error`-suffixed `ruleId` instead.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The `type` discriminator this provider registers under.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Minimum: type match plus any provider-specific required fields.
    fn validate_config(&self, config: &HashMap<String, Value>) -> bool;

    /// Documentation surface: the config keys this provider understands.
    fn supported_config_keys(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Structural readiness, e.g. an API key is present in the environment.
    /// Default assumes always available, matching providers with no
    /// external dependency (noop, log).
    async fn is_available(&self) -> bool {
        true
    }

    fn requirements(&self) -> Vec<Requirement> {
        Vec::new()
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> crate::error::Result<ReviewSummary>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

/// Process-wide `type` → provider mapping. Mutation is expected at process
/// boot; mutating during a run is a programmer error the registry does not
/// itself guard against.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if a provider is already registered under this name.
    pub fn register(&self, provider: Arc<dyn Provider>) -> crate::error::Result<()> {
        let name = provider.name().to_string();
        let mut providers = self.providers.write();
        if providers.contains_key(&name) {
            return Err(crate::error::CheckGraphError::Custom(format!(
                "provider '{name}' is already registered"
            )));
        }
        providers.insert(name, provider);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.write().remove(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(name).cloned()
    }

    pub fn get_or_throw(&self, name: &str) -> crate::error::Result<Arc<dyn Provider>> {
        self.get(name)
            .ok_or_else(|| crate::error::CheckGraphError::UnknownProviderType(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Names of providers whose `is_available()` currently returns `true`.
    pub async fn list_active(&self) -> Vec<String> {
        let snapshot: Vec<Arc<dyn Provider>> = self.providers.read().values().cloned().collect();
        let mut active = Vec::new();
        for provider in snapshot {
            if provider.is_available().await {
                active.push(provider.name().to_string());
            }
        }
        active
    }

    pub fn reset(&self) {
        self.providers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        name: String,
        available: bool,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn validate_config(&self, _config: &HashMap<String, Value>) -> bool {
            true
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn execute(&self, _ctx: &ExecuteContext<'_>) -> crate::error::Result<ReviewSummary> {
            Ok(ReviewSummary::empty())
        }
    }

    fn stub(name: &str, available: bool) -> Arc<dyn Provider> {
        Arc::new(StubProvider { name: name.to_string(), available })
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = ProviderRegistry::new();
        registry.register(stub("noop", true)).unwrap();
        let err = registry.register(stub("noop", true)).unwrap_err();
        assert!(matches!(err, crate::error::CheckGraphError::Custom(_)));
    }

    #[test]
    fn get_or_throw_reports_unknown_provider_type() {
        let registry = ProviderRegistry::new();
        let err = registry.get_or_throw("missing").unwrap_err();
        assert!(matches!(err, crate::error::CheckGraphError::UnknownProviderType(_)));
    }

    #[tokio::test]
    async fn list_active_filters_by_availability() {
        let registry = ProviderRegistry::new();
        registry.register(stub("up", true)).unwrap();
        registry.register(stub("down", false)).unwrap();
        let mut active = registry.list_active().await;
        active.sort();
        assert_eq!(active, vec!["up".to_string()]);
    }

    #[test]
    fn reset_clears_all_registrations() {
        let registry = ProviderRegistry::new();
        registry.register(stub("noop", true)).unwrap();
        registry.reset();
        assert!(registry.list().is_empty());
    }
}
