//! Capability shim: the restricted host surface handed to generated code.
//!
//! A compiled unit reaches the outside world through exactly two operations,
//! `get` and `post`, both resolving to parsed JSON. No DOM handles, no
//! storage, no navigation, no further module resolution. The semantics live
//! in [`CapabilityClient`]; the sandbox ops below are thin adapters that ship
//! values and named errors across the isolation boundary as strings.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use deno_core::{op2, Extension, OpState};
use deno_error::JsErrorBox;
use url::Url;

use aiui_common::{Result, SandboxError};

/// The only channel a compiled unit has to the host's network stack.
#[derive(Debug, Clone)]
pub struct CapabilityClient {
    http: reqwest::Client,
    base: Option<Url>,
}

impl CapabilityClient {
    /// `base` is what relative request paths resolve against; with no base,
    /// only absolute URLs are accepted.
    pub fn new(base: Option<Url>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base {
                Some(base) => base.join(url).map_err(|e| SandboxError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                }),
                None => Err(SandboxError::Request {
                    url: url.to_string(),
                    reason: "relative URL with no configured API base".to_string(),
                }),
            },
            Err(e) => Err(SandboxError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Read request. Non-success status fails with `Request`; a success body
    /// that is not valid JSON fails with `Parse`.
    pub async fn get(&self, url: &str) -> Result<serde_json::Value> {
        let target = self.resolve(url)?;
        tracing::debug!(url = %target, "capability get");

        let response = self
            .http
            .get(target)
            .send()
            .await
            .map_err(|e| SandboxError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SandboxError::Request {
                url: url.to_string(),
                reason: format!("status {}", status.as_u16()),
            });
        }

        let body = response.text().await.map_err(|e| SandboxError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|e| SandboxError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Write request. `body` defaults to an empty object. Write endpoints may
    /// legitimately return nothing: an empty or non-JSON success body
    /// resolves to `{}` instead of failing.
    pub async fn post(
        &self,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let target = self.resolve(url)?;
        let payload = body.unwrap_or_else(|| serde_json::json!({}));
        tracing::debug!(url = %target, "capability post");

        let response = self
            .http
            .post(target)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SandboxError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SandboxError::Request {
                url: url.to_string(),
                reason: format!("status {}", status.as_u16()),
            });
        }

        let body = response.text().await.unwrap_or_default();
        if body.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| serde_json::json!({})))
    }
}

#[op2(async)]
#[string]
async fn op_api_get(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
) -> std::result::Result<String, JsErrorBox> {
    let client = state.borrow().borrow::<CapabilityClient>().clone();
    let value = client
        .get(&url)
        .await
        .map_err(|e| JsErrorBox::generic(e.to_string()))?;
    Ok(value.to_string())
}

#[op2(async)]
#[string]
async fn op_api_post(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[string] body: String,
) -> std::result::Result<String, JsErrorBox> {
    let client = state.borrow().borrow::<CapabilityClient>().clone();
    let parsed = if body.trim().is_empty() {
        None
    } else {
        Some(
            serde_json::from_str(&body)
                .map_err(|e| JsErrorBox::type_error(format!("post body must be JSON: {e}")))?,
        )
    };
    let value = client
        .post(&url, parsed)
        .await
        .map_err(|e| JsErrorBox::generic(e.to_string()))?;
    Ok(value.to_string())
}

/// Extension registering exactly the two capability ops and nothing else.
pub(crate) fn capability_extension(client: CapabilityClient) -> Extension {
    Extension {
        name: "aiui_capability",
        ops: Cow::Owned(vec![op_api_get(), op_api_post()]),
        op_state_fn: Some(Box::new(move |state: &mut OpState| {
            state.put(client);
        })),
        ..Default::default()
    }
}
