//! Common test utilities shared across integration tests.

use std::sync::Arc;

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aiui_sandbox::{
    CapabilityClient, HttpSourceGenerator, LifecycleController, ResourceLimits,
};

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Smallest component that compiles and mounts.
pub const NULL_COMPONENT: &str = "export default function Page() { return null; }";

/// Teach the mock server to answer the generation endpoint with `code`.
pub async fn stub_generation(server: &MockServer, code: &str) {
    Mock::given(method("POST"))
        .and(path("/ui/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "code": code })))
        .mount(server)
        .await;
}

pub fn server_url(server: &MockServer, suffix: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), suffix)).expect("mock server URL")
}

/// Capability client whose relative paths resolve against the mock server.
pub fn capability_client(server: &MockServer) -> CapabilityClient {
    CapabilityClient::new(Some(server_url(server, "/")))
}

/// Full controller wired against the mock server for both generation and
/// data-API traffic.
pub fn sandbox_against(server: &MockServer) -> LifecycleController {
    let generator = HttpSourceGenerator::new(server_url(server, "/ui/code"));
    LifecycleController::new(
        Arc::new(generator),
        capability_client(server),
        ResourceLimits::default(),
    )
}
