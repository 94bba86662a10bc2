//! Error taxonomy for `checkgraph-core`.
//!
//! `ConfigInvalid` is caught at load and never reaches the scheduler,
//! `ExpressionEvaluationError` never propagates past the sandbox boundary
//! (it becomes a recorded failure with `failed=false`), and only
//! `fail_fast` plus a halting `fail_if`, or a host-level `Shutdown`, aborts
//! a run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckGraphError>;

#[derive(Error, Debug, Clone)]
pub enum CheckGraphError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("dependency '{dependency}' of check '{check_id}' did not succeed")]
    DependencyFailed { check_id: String, dependency: String },

    #[error("expression evaluation error: {0}")]
    ExpressionEvaluationError(String),

    #[error("provider '{provider_type}' timed out after {duration_ms}ms")]
    ProviderTimeout { provider_type: String, duration_ms: u64 },

    #[error("provider '{provider_type}' transient error: {message}")]
    ProviderTransient { provider_type: String, message: String },

    #[error("provider '{provider_type}' fatal error: {message}")]
    ProviderFatal { provider_type: String, message: String },

    #[error("check '{check_id}' is suspended awaiting human input")]
    HumanInputPending { check_id: String },

    #[error("routing budget exhausted for check '{check_id}'")]
    RoutingBudgetExhausted { check_id: String },

    #[error("unknown check id: {0}")]
    UnknownCheck(String),

    #[error("unknown provider type: {0}")]
    UnknownProviderType(String),

    #[error("{0}")]
    Custom(String),
}
