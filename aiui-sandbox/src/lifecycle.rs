//! Lifecycle controller: the observable `idle -> loading -> rendering ->
//! error` machine wrapped around the generate/compile/mount pipeline.
//!
//! Every submission opens a new epoch. Results belonging to an older epoch
//! are discarded at the first await point that notices, so a reset or a newer
//! prompt always wins over whatever was in flight. A stale mount that slipped
//! through tears its own session down instead of publishing anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use aiui_common::{SandboxError, SandboxState};

use crate::capability::CapabilityClient;
use crate::compile::compile;
use crate::config::SandboxConfig;
use crate::generate::{HttpSourceGenerator, SourceGenerator};
use crate::host::ExecutionHost;
use crate::limits::ResourceLimits;
use crate::render::RenderTarget;

struct Shared {
    epoch: AtomicU64,
    state_tx: watch::Sender<SandboxState>,
    host: Mutex<ExecutionHost>,
    generator: Arc<dyn SourceGenerator>,
    client: CapabilityClient,
    target: RenderTarget,
}

/// Cloneable handle driving the sandbox. All clones share one target, one
/// state machine and one host.
#[derive(Clone)]
pub struct LifecycleController {
    shared: Arc<Shared>,
}

impl LifecycleController {
    pub fn new(
        generator: Arc<dyn SourceGenerator>,
        client: CapabilityClient,
        limits: ResourceLimits,
    ) -> Self {
        let target = RenderTarget::default();
        let (state_tx, _) = watch::channel(SandboxState::Idle);
        Self {
            shared: Arc::new(Shared {
                epoch: AtomicU64::new(0),
                state_tx,
                host: Mutex::new(ExecutionHost::new(limits, target.clone())),
                generator,
                client,
                target,
            }),
        }
    }

    /// Wire a controller from configuration, backed by the HTTP generator.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let generator = HttpSourceGenerator::new(config.generator_url.clone())
            .with_timeout(config.generate_timeout);
        let client = CapabilityClient::new(config.api_base.clone());
        Self::new(Arc::new(generator), client, config.limits.clone())
    }

    /// Current machine state.
    pub fn state(&self) -> SandboxState {
        self.shared.state_tx.borrow().clone()
    }

    /// Subscribe to state transitions.
    pub fn watch(&self) -> watch::Receiver<SandboxState> {
        self.shared.state_tx.subscribe()
    }

    pub fn target(&self) -> &RenderTarget {
        &self.shared.target
    }

    /// Run one full render cycle for `prompt`. Failures do not propagate:
    /// they become the `error` state, with a message a person can read.
    ///
    /// Empty prompts are ignored. A submission while another is in flight
    /// supersedes it; the older cycle's outcome is discarded.
    pub async fn submit(&self, prompt: &str) {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            tracing::debug!("ignoring empty prompt");
            return;
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state_tx.send_replace(SandboxState::Loading);
        tracing::info!(epoch, "prompt submitted");

        let source = match self.shared.generator.generate(prompt).await {
            Ok(source) => source,
            Err(err) => return self.fail(epoch, err),
        };
        if self.stale(epoch) {
            return;
        }

        let unit = match compile(&source) {
            Ok(unit) => unit,
            Err(err) => return self.fail(epoch, err),
        };
        if self.stale(epoch) {
            return;
        }

        let mut host = self.shared.host.lock().await;
        if self.stale(epoch) {
            return;
        }
        match host.mount(&unit, self.shared.client.clone()).await {
            Ok(session) => {
                if self.stale(epoch) {
                    // Superseded between commit and publish: the view must
                    // not survive, and the state belongs to the winner.
                    host.unmount(&session);
                    return;
                }
                self.shared.state_tx.send_replace(SandboxState::Rendering);
                tracing::info!(epoch, session = %session.id(), "rendering");
            }
            Err(err) => {
                drop(host);
                self.fail(epoch, err);
            }
        }
    }

    /// Abandon whatever is in flight, unmount any view, return to `idle`.
    pub async fn reset(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.state_tx.send_replace(SandboxState::Idle);
        let mut host = self.shared.host.lock().await;
        host.unmount_active();
        tracing::info!("sandbox reset");
    }

    fn stale(&self, epoch: u64) -> bool {
        let current = self.shared.epoch.load(Ordering::SeqCst);
        if current != epoch {
            tracing::debug!(epoch, current, "discarding stale cycle");
            true
        } else {
            false
        }
    }

    fn fail(&self, epoch: u64, err: SandboxError) {
        if self.stale(epoch) {
            return;
        }
        tracing::warn!(error = %err, "render cycle failed");
        self.shared.state_tx.send_replace(SandboxState::Error {
            message: err.user_message(),
        });
    }
}
