//! Execution host: fresh V8 isolate per mount, behind a message boundary.
//!
//! Each mount spawns a dedicated worker thread that builds its own isolate,
//! installs the rendering prelude and the capability ops, signals readiness
//! (handing back a thread-safe isolate handle), and then accepts exactly one
//! [`BridgeMessage::RunCode`] payload. The worker evaluates the compiled
//! script, resolves the module's entry component, invokes it, and ships the
//! normalized view tree back as JSON. The host owns the render target, the
//! wall-clock timeout, and the unmount-before-mount ordering.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use aiui_common::{Result, SandboxError};

use crate::bridge::BridgeMessage;
use crate::capability::{capability_extension, CapabilityClient};
use crate::compile::CompiledUnit;
use crate::limits::ResourceLimits;
use crate::render::{RenderTarget, ViewNode};

/// Unique identifier for one mount of one compiled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct SessionInner {
    id: SessionId,
    live: AtomicBool,
    isolate: v8::IsolateHandle,
    target: RenderTarget,
}

/// Handle to one running (or finished) sandbox session. Cloneable; all clones
/// refer to the same isolate.
#[derive(Clone)]
pub struct RenderSession {
    inner: Arc<SessionInner>,
}

impl RenderSession {
    fn new(isolate: v8::IsolateHandle, target: RenderTarget) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                live: AtomicBool::new(true),
                isolate,
                target,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Tear the session down: terminate the isolate and detach its view from
    /// the target. Idempotent, and safe for sessions that were already
    /// displaced by a newer mount.
    pub fn unmount(&self) {
        if self.inner.live.swap(false, Ordering::SeqCst) {
            tracing::debug!(session = %self.inner.id, "unmounting session");
            self.inner.isolate.terminate_execution();
            self.inner.target.clear_if(self.inner.id);
        }
    }
}

impl fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSession")
            .field("id", &self.inner.id)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Owns the render target and enforces the single-occupant rule: at most one
/// session is mounted at a time, and a new mount always displaces the old
/// session before the new unit executes.
pub struct ExecutionHost {
    limits: ResourceLimits,
    target: RenderTarget,
    active: Option<RenderSession>,
}

impl ExecutionHost {
    pub fn new(limits: ResourceLimits, target: RenderTarget) -> Self {
        Self {
            limits,
            target,
            active: None,
        }
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn active_session(&self) -> Option<&RenderSession> {
        self.active.as_ref()
    }

    /// Execute one compiled unit and commit its view tree to the target.
    ///
    /// Failure classification follows the worker phase it happened in: script
    /// evaluation and entry resolution fail as [`SandboxError::Compile`],
    /// entry invocation (including uncaught capability errors and timeout)
    /// as [`SandboxError::Mount`]. On any failure the target is left empty.
    pub async fn mount(
        &mut self,
        unit: &CompiledUnit,
        client: CapabilityClient,
    ) -> Result<RenderSession> {
        self.unmount_active();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (code_tx, code_rx) = std::sync::mpsc::channel::<String>();
        let (result_tx, result_rx) = oneshot::channel();

        let limits = self.limits.clone();
        tokio::task::spawn_blocking(move || run_worker(limits, client, ready_tx, code_rx, result_tx));

        let isolate = ready_rx.await.map_err(|_| {
            SandboxError::Mount("sandbox worker exited before becoming ready".to_string())
        })?;
        let session = RenderSession::new(isolate, self.target.clone());
        tracing::debug!(session = %session.id(), "sandbox worker ready");

        let message = BridgeMessage::RunCode {
            code: unit.script().to_string(),
        };
        let encoded = message
            .encode()
            .map_err(|e| SandboxError::Mount(e.to_string()))?;
        if code_tx.send(encoded).is_err() {
            return Err(SandboxError::Mount("sandbox worker is gone".to_string()));
        }

        let outcome = match self.limits.max_duration {
            Some(max) => match tokio::time::timeout(max, result_rx).await {
                Ok(received) => received,
                Err(_) => {
                    // The worker may be spinning; terminating the isolate
                    // unblocks its thread.
                    session.unmount();
                    return Err(SandboxError::Mount(format!(
                        "execution did not finish within {max:?}"
                    )));
                }
            },
            None => result_rx.await,
        };

        let raw = outcome
            .map_err(|_| SandboxError::Mount("sandbox worker crashed".to_string()))?
            .map_err(WorkerFailure::into_error)?;

        let root: ViewNode = serde_json::from_str(&raw).map_err(|e| {
            SandboxError::Mount(format!("sandbox returned an unreadable view tree: {e}"))
        })?;

        self.target.commit(session.id(), root);
        self.active = Some(session.clone());
        tracing::info!(session = %session.id(), "view mounted");
        Ok(session)
    }

    /// Unmount a specific session. A no-op if it was already displaced.
    pub fn unmount(&mut self, session: &RenderSession) {
        session.unmount();
        if self.active.as_ref().map(RenderSession::id) == Some(session.id()) {
            self.active = None;
        }
    }

    /// Unmount whatever is currently active.
    pub fn unmount_active(&mut self) {
        if let Some(session) = self.active.take() {
            session.unmount();
        }
    }
}

/// Which step of the worker a failure happened in. The phase decides the
/// error class the host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerPhase {
    Evaluate,
    ResolveEntry,
    Invoke,
}

#[derive(Debug)]
struct WorkerFailure {
    phase: WorkerPhase,
    message: String,
}

impl WorkerFailure {
    fn new(phase: WorkerPhase, message: impl ToString) -> Self {
        Self {
            phase,
            message: first_line(&message.to_string()),
        }
    }

    fn into_error(self) -> SandboxError {
        match self.phase {
            WorkerPhase::Evaluate | WorkerPhase::ResolveEntry => {
                SandboxError::Compile(self.message)
            }
            WorkerPhase::Invoke => SandboxError::Mount(self.message),
        }
    }
}

/// JS error strings carry a stack trace; only the first line names the error.
fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

type WorkerResult = std::result::Result<String, WorkerFailure>;

/// Body of the worker thread. Builds the isolate, performs the readiness
/// handshake, runs one payload, reports the outcome, exits.
fn run_worker(
    limits: ResourceLimits,
    client: CapabilityClient,
    ready_tx: oneshot::Sender<v8::IsolateHandle>,
    code_rx: std::sync::mpsc::Receiver<String>,
    result_tx: oneshot::Sender<WorkerResult>,
) {
    let mut create_params = v8::CreateParams::default();
    if let Some(max_heap) = limits.max_heap_bytes {
        create_params = create_params.heap_limits(0, max_heap);
    }

    let mut js = JsRuntime::new(RuntimeOptions {
        extensions: vec![capability_extension(client)],
        create_params: Some(create_params),
        ..Default::default()
    });

    if ready_tx.send(js.v8_isolate().thread_safe_handle()).is_err() {
        return;
    }

    if let Err(e) = js.execute_script("<aiui-prelude>", PRELUDE_JS) {
        let _ = result_tx.send(Err(WorkerFailure::new(
            WorkerPhase::Invoke,
            format!("prelude initialization failed: {e}"),
        )));
        return;
    }

    let Ok(raw) = code_rx.recv() else {
        return; // host dropped the session before sending code
    };
    let code = match BridgeMessage::decode(&raw) {
        Ok(BridgeMessage::RunCode { code }) => code,
        Err(e) => {
            let _ = result_tx.send(Err(WorkerFailure::new(
                WorkerPhase::Invoke,
                format!("unreadable bridge message: {e}"),
            )));
            return;
        }
    };

    let outcome = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt.block_on(run_phases(&mut js, code)),
        Err(e) => Err(WorkerFailure::new(WorkerPhase::Invoke, e)),
    };
    let _ = result_tx.send(outcome);
}

async fn run_phases(js: &mut JsRuntime, code: String) -> WorkerResult {
    js.execute_script("<generated>", code)
        .map_err(|e| WorkerFailure::new(WorkerPhase::Evaluate, e))?;

    js.execute_script("<entry-check>", "__aiui.entry(); undefined")
        .map_err(|e| WorkerFailure::new(WorkerPhase::ResolveEntry, e))?;

    let result = js
        .execute_script("<invoke>", "__aiui.invoke()")
        .map_err(|e| WorkerFailure::new(WorkerPhase::Invoke, e))?;
    let promise = js.resolve(result);
    let resolved = js
        .with_event_loop_promise(promise, PollEventLoopOptions::default())
        .await
        .map_err(|e| WorkerFailure::new(WorkerPhase::Invoke, e))?;

    let scope = &mut js.handle_scope();
    let local = v8::Local::new(scope, resolved);
    Ok(local.to_rust_string_lossy(scope))
}

/// Rendering prelude installed before any generated code runs. Provides the
/// module slots, the `h`/`Fragment` primitives the compiler lowers JSX onto,
/// the frozen `api` capability object, and the normalization step that turns
/// whatever the component returned into the pure-data tree the host commits.
const PRELUDE_JS: &str = r##"
globalThis.__aiui = (() => {
    const Fragment = "#fragment";
    const module = { exports: {} };

    // Capability failures cross the boundary as prefixed strings; rebuild
    // them as named errors so generated code can distinguish them.
    const namedError = (message) => {
        for (const name of ["RequestError", "ParseError"]) {
            if (message.startsWith(name + ":")) {
                const err = new Error(message.slice(name.length + 1).trim());
                err.name = name;
                return err;
            }
        }
        return new Error(message);
    };

    const call = async (op, ...args) => {
        let raw;
        try {
            raw = await op(...args);
        } catch (e) {
            throw namedError(String(e && e.message !== undefined ? e.message : e));
        }
        return JSON.parse(raw);
    };

    const api = Object.freeze({
        get: (url) => call(Deno.core.ops.op_api_get, String(url)),
        post: (url, body) => call(
            Deno.core.ops.op_api_post,
            String(url),
            JSON.stringify(body === undefined ? {} : body),
        ),
    });

    const flatten = (children, out) => {
        for (const child of children) {
            if (Array.isArray(child)) flatten(child, out);
            else out.push(child);
        }
        return out;
    };

    const h = (type, props, ...children) => {
        const flat = flatten(children, []);
        if (typeof type === "function") {
            const merged = { ...(props !== null && props !== undefined ? props : {}) };
            merged.children = flat.length === 1 ? flat[0] : flat;
            return type(merged);
        }
        if (typeof type !== "string") {
            throw new Error("element type must be a tag name or a component function");
        }
        return {
            tag: type,
            props: props !== null && props !== undefined ? props : {},
            children: flat,
        };
    };

    const normalizeChildren = (children) => {
        const out = [];
        for (const child of children) {
            const normalized = normalize(child);
            if (normalized !== null) out.push(normalized);
        }
        return out;
    };

    const normalize = (node) => {
        if (node === null || node === undefined || typeof node === "boolean") return null;
        if (typeof node === "string") return node;
        if (typeof node === "number") return String(node);
        if (Array.isArray(node)) {
            return { tag: Fragment, props: {}, children: normalizeChildren(node) };
        }
        if (typeof node === "object" && typeof node.tag === "string") {
            const props = {};
            for (const key of Object.keys(node.props !== undefined ? node.props : {})) {
                const value = node.props[key];
                // "key" only disambiguates siblings; it never reaches the view.
                if (key === "key") continue;
                if (value === undefined || typeof value === "function") continue;
                props[key] = value;
            }
            const children = Array.isArray(node.children) ? node.children : [];
            return { tag: node.tag, props, children: normalizeChildren(children) };
        }
        throw new Error("component returned a value that is not renderable");
    };

    const entry = () => {
        const exported = module.exports.default !== undefined
            ? module.exports.default
            : module.exports;
        if (typeof exported !== "function") {
            throw new Error("generated module does not export a callable component");
        }
        return exported;
    };

    const invoke = async () => {
        const component = entry();
        const rendered = normalize(await component({ api }));
        return JSON.stringify(
            rendered !== null ? rendered : { tag: Fragment, props: {}, children: [] },
        );
    };

    const ui = Object.freeze({ h, createElement: h, Fragment });
    return { module, h, Fragment, ui, api, entry, invoke };
})();
"##;
