//! Resource limits for sandboxed execution.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds applied to one render cycle of a compiled unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock bound on a mount, covering script evaluation, entry
    /// invocation and every capability call the unit makes. Expiry terminates
    /// the isolate.
    #[serde(default, with = "humantime_serde")]
    pub max_duration: Option<Duration>,

    /// V8 heap ceiling in bytes.
    pub max_heap_bytes: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_duration: Some(Duration::from_secs(10)),
            max_heap_bytes: Some(64 * 1024 * 1024), // 64 MB
        }
    }
}

impl ResourceLimits {
    /// Tight limits for hostile input (and fast-failing tests).
    pub fn strict() -> Self {
        Self {
            max_duration: Some(Duration::from_secs(2)),
            max_heap_bytes: Some(16 * 1024 * 1024), // 16 MB
        }
    }

    /// No bounds at all. Only sensible for trusted fixtures.
    pub fn unbounded() -> Self {
        Self {
            max_duration: None,
            max_heap_bytes: None,
        }
    }
}
