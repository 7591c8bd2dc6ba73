//! Error taxonomy for the sandbox pipeline.
//!
//! Every failure that can reach the lifecycle controller is one of these
//! variants; the controller converts it to a human-readable message and moves
//! the state machine to `error`. Nothing is allowed to escape uncaught to the
//! embedding application.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The prompt-to-source call failed at the network layer, timed out, or
    /// returned a non-success status.
    #[error("generation request failed: {0}")]
    Transport(String),

    /// The prompt-to-source response lacked a usable source string.
    #[error("generation response was unusable: {0}")]
    MalformedResponse(String),

    /// The generated source failed to parse, referenced a disallowed import,
    /// or produced no callable entry point.
    #[error("compile error: {0}")]
    Compile(String),

    /// The entry point threw during invocation or rendering, or execution was
    /// terminated (timeout or teardown).
    #[error("mount error: {0}")]
    Mount(String),

    /// A capability call returned a non-success status. The `RequestError:`
    /// display prefix is load-bearing: the sandbox shim maps it back to a
    /// named JS error inside the isolate.
    #[error("RequestError: request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// A capability call succeeded but the body was not valid JSON.
    #[error("ParseError: response from {url} is not valid JSON: {reason}")]
    Parse { url: String, reason: String },
}

impl SandboxError {
    /// The message surfaced to users when the state machine enters `error`.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Whether this error came from inside the capability object (and thus
    /// belongs to the generated component's own error handling).
    pub fn is_capability_error(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::Parse { .. })
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
