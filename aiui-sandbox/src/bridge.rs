//! Messages crossing the isolation boundary.
//!
//! The sandbox worker is an actor with exactly one inbound message kind:
//! replace-and-run a code payload. Payloads are serialized before they cross
//! the boundary; the worker signals readiness (out of band, together with its
//! thread-safe isolate handle) before the host sends anything.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeMessage {
    /// Execute a compiled unit's script inside the isolate.
    RunCode { code: String },
}

impl BridgeMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
