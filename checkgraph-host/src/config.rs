//! Thin config loading: YAML schema validation is out of scope, the
//! engine consumes an already-deserialized `WorkflowConfig`. This module
//! is the convenience layer that gets a workflow file onto that shape; it
//! does no structural validation beyond what `serde` gives for free.

use checkgraph_core::model::WorkflowConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostConfigError {
    #[error("failed to parse workflow as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse workflow as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn load_workflow_yaml(source: &str) -> Result<WorkflowConfig, HostConfigError> {
    Ok(serde_yaml::from_str(source)?)
}

pub fn load_workflow_json(source: &str) -> Result<WorkflowConfig, HostConfigError> {
    Ok(serde_json::from_str(source)?)
}
