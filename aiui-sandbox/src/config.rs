//! Sandbox configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::limits::ResourceLimits;

fn default_generate_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Everything the lifecycle controller needs to wire itself up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Generation endpoint accepting `{"prompt"}` and answering `{"code"}`.
    pub generator_url: Url,

    /// How long to wait for the generation endpoint.
    #[serde(default = "default_generate_timeout", with = "humantime_serde")]
    pub generate_timeout: Duration,

    /// Base URL that relative capability requests resolve against. Without
    /// one, generated code may only use absolute URLs.
    #[serde(default)]
    pub api_base: Option<Url>,

    /// Per-mount execution bounds.
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl SandboxConfig {
    pub fn new(generator_url: Url) -> Self {
        Self {
            generator_url,
            generate_timeout: default_generate_timeout(),
            api_base: None,
            limits: ResourceLimits::default(),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}
