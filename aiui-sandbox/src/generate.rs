//! Source generation backends.
//!
//! A generator turns a natural-language prompt into component source text.
//! The generation endpoint is opaque: prompt in, code out, nothing about the
//! model or templating behind it leaks into the rest of the pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use aiui_common::{Result, SandboxError};

/// Trait implemented by source-generation backends.
#[async_trait]
pub trait SourceGenerator: Send + Sync {
    /// Produce component source for the given prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    code: Option<String>,
}

/// Generator backed by an HTTP endpoint speaking `{"prompt"} -> {"code"}`.
pub struct HttpSourceGenerator {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpSourceGenerator {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SourceGenerator for HttpSourceGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        tracing::debug!(endpoint = %self.endpoint, "requesting component source");

        let response = self
            .http
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&GenerateRequest { prompt })
            .send()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SandboxError::Transport(format!(
                "generation endpoint returned status {}",
                status.as_u16()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::MalformedResponse(e.to_string()))?;

        let raw = body.code.ok_or_else(|| {
            SandboxError::MalformedResponse("response carries no \"code\" field".to_string())
        })?;
        let code = unwrap_code_fence(&raw);
        if code.trim().is_empty() {
            return Err(SandboxError::MalformedResponse(
                "generated code is empty".to_string(),
            ));
        }
        Ok(code)
    }
}

/// Models often wrap payloads in a fenced block despite being asked not to;
/// unwrap the first block if one is present, otherwise pass through.
fn unwrap_code_fence(response: &str) -> String {
    let mut inside_block = false;
    let mut collected = Vec::new();

    for line in response.lines() {
        if line.trim_start().starts_with("```") {
            if inside_block {
                break;
            }
            inside_block = true;
            continue;
        }
        if inside_block {
            collected.push(line);
        }
    }

    if collected.is_empty() {
        response.trim().to_string()
    } else {
        collected.join("\n")
    }
}

/// Keyword-routed canned generator. No network, deterministic output; used by
/// demos and as a fallback when no endpoint is configured.
#[derive(Debug, Default)]
pub struct StaticSourceGenerator {
    pages: BTreeMap<&'static str, &'static str>,
}

impl StaticSourceGenerator {
    pub fn new() -> Self {
        let mut pages = BTreeMap::new();
        pages.insert("inventory", INVENTORY_PAGE);
        pages.insert("password", PASSWORD_PAGE);
        Self { pages }
    }
}

#[async_trait]
impl SourceGenerator for StaticSourceGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let lowered = prompt.to_lowercase();
        let page = self
            .pages
            .iter()
            .find(|(keyword, _)| lowered.contains(*keyword))
            .map(|(_, page)| *page)
            .unwrap_or(PLACEHOLDER_PAGE);
        Ok(page.to_string())
    }
}

const INVENTORY_PAGE: &str = r#"
export default async function Page({ api }) {
    const items = await api.get("/api/inventory");
    return (
        <div>
            <h2>Inventory</h2>
            <ul>
                {items.map((item) => (
                    <li key={item.id}>
                        {item.name}: {item.quantity}
                    </li>
                ))}
            </ul>
        </div>
    );
}
"#;

const PASSWORD_PAGE: &str = r#"
export default function Page({ api }) {
    return (
        <form>
            <h2>Change password</h2>
            <input type="password" name="current" placeholder="Current password" />
            <input type="password" name="next" placeholder="New password" />
            <button type="submit">Update</button>
        </form>
    );
}
"#;

const PLACEHOLDER_PAGE: &str = r#"
export default function Page() {
    return <p>Nothing matched that request yet.</p>;
}
"#;
