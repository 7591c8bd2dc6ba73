//! Observable sandbox state.

use serde::{Deserialize, Serialize};

/// The lifecycle controller's state machine, surfaced to the embedding
/// application. Transitions happen only through the controller's events
/// (submit, payload arrival, failure, reset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SandboxState {
    /// No work in flight, nothing mounted.
    Idle,
    /// A generation request is in flight.
    Loading,
    /// A render session is live.
    Rendering,
    /// A stage failed; carries the message shown to the user.
    Error { message: String },
}

impl SandboxState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_rendering(&self) -> bool {
        matches!(self, Self::Rendering)
    }

    /// The error message, if the machine is in the `error` state.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }
}

impl Default for SandboxState {
    fn default() -> Self {
        Self::Idle
    }
}
