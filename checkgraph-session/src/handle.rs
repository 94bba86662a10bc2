//! The opaque handle a session key resolves to. The registry never
//! interprets `transcript` — it only snapshots or shares it — the AI
//! provider is the only thing that reads the turns back into a prompt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One exchange recorded against a session, in send order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTurn {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionHandle {
    /// Provider-assigned conversation id, opaque to the registry.
    pub provider_session_id: String,
    pub transcript: Vec<SessionTurn>,
}

impl SessionHandle {
    pub fn new(provider_session_id: impl Into<String>) -> Self {
        Self { provider_session_id: provider_session_id.into(), transcript: Vec::new() }
    }

    pub fn append_turn(&mut self, role: impl Into<String>, content: Value) {
        self.transcript.push(SessionTurn { role: role.into(), content });
    }
}
