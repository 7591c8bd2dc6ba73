//! AIUI sandbox - runtime compilation and isolated execution of generated
//! UI components.
//!
//! The pipeline: generated source text -> compiler adapter -> compiled unit
//! -> execution host (fresh V8 isolate behind a message boundary) -> rendered
//! view, with the capability shim injected as the unit's only channel to the
//! outside world. The lifecycle controller wraps every stage and owns the
//! observable `idle -> loading -> rendering -> error` state machine.

mod bridge;
mod capability;
mod compile;
mod config;
mod generate;
mod host;
mod lifecycle;
mod limits;
mod render;

pub use bridge::BridgeMessage;
pub use capability::CapabilityClient;
pub use compile::{compile, CompiledUnit};
pub use config::SandboxConfig;
pub use generate::{HttpSourceGenerator, SourceGenerator, StaticSourceGenerator};
pub use host::{ExecutionHost, RenderSession, SessionId};
pub use lifecycle::LifecycleController;
pub use limits::ResourceLimits;
pub use render::{MountedView, RenderTarget, ViewNode, FRAGMENT_TAG};

pub use aiui_common::{Result, SandboxError, SandboxState};
