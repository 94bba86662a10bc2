//! Error taxonomy for the session registry, mirrored on the checkpoint
//! saver's own small `CheckpointError` rather than reusing the host crate's
//! error enum — sessions are a narrower concern than the rest of the graph.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{key}' already registered with a different handle")]
    Conflict { key: String },
}
