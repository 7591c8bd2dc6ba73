//! View trees and the host-owned render target.
//!
//! A compiled unit never touches the target directly: it returns a pure-data
//! description of its tree, which the execution host normalizes inside the
//! isolate, ships across the boundary as JSON, and commits here.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::host::SessionId;

/// Tag used for fragment nodes (children with no element of their own).
pub const FRAGMENT_TAG: &str = "#fragment";

/// One node of a renderable description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViewNode {
    Text(String),
    Element {
        tag: String,
        #[serde(default)]
        props: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        children: Vec<ViewNode>,
    },
}

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

impl ViewNode {
    /// Project the tree into HTML markup. Function-valued props were already
    /// dropped during normalization; remaining non-scalar props (other than
    /// `style` objects) are skipped.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            ViewNode::Text(text) => out.push_str(&escape_html(text)),
            ViewNode::Element {
                tag,
                props,
                children,
            } => {
                if tag == FRAGMENT_TAG {
                    for child in children {
                        child.write_html(out);
                    }
                    return;
                }
                out.push('<');
                out.push_str(tag);
                for (name, value) in props {
                    let rendered = match value {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        serde_json::Value::Bool(true) => Some(String::new()),
                        serde_json::Value::Bool(false) | serde_json::Value::Null => None,
                        serde_json::Value::Object(style) if name == "style" => {
                            Some(style_to_css(style))
                        }
                        _ => None,
                    };
                    if let Some(rendered) = rendered {
                        out.push(' ');
                        out.push_str(name);
                        if !rendered.is_empty() {
                            out.push_str("=\"");
                            out.push_str(&escape_html(&rendered));
                            out.push('"');
                        }
                    }
                }
                if children.is_empty() && VOID_TAGS.contains(&tag.as_str()) {
                    out.push_str(" />");
                    return;
                }
                out.push('>');
                for child in children {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `{ fontSize: 13, color: "red" }` -> `font-size:13;color:red`.
fn style_to_css(style: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut parts = Vec::with_capacity(style.len());
    for (key, value) in style {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => continue,
        };
        parts.push(format!("{}:{}", camel_to_kebab(key), rendered));
    }
    parts.join(";")
}

fn camel_to_kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// A committed view: which session produced it, and its root node.
#[derive(Debug, Clone)]
pub struct MountedView {
    pub session: SessionId,
    pub root: ViewNode,
}

/// Host-owned mount point. Exclusively held by the execution host; compiled
/// units never receive a reference to it.
#[derive(Clone, Default)]
pub struct RenderTarget {
    inner: Arc<RwLock<Option<MountedView>>>,
}

impl RenderTarget {
    /// Replace whatever is mounted with `root`, owned by `session`.
    pub(crate) fn commit(&self, session: SessionId, root: ViewNode) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(MountedView { session, root });
    }

    /// Detach the mounted view, but only if `session` still owns it. Safe to
    /// call for sessions that were already displaced.
    pub(crate) fn clear_if(&self, session: SessionId) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().map(|view| view.session) == Some(session) {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<MountedView> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// HTML projection of the mounted view, if any.
    pub fn html(&self) -> Option<String> {
        self.current().map(|view| view.root.to_html())
    }
}
