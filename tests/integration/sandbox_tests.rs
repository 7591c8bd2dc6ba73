//! End-to-end execution host tests: compiled units running in real isolates
//! against a live mock data API.

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aiui_common::SandboxError;
use aiui_sandbox::{compile, ExecutionHost, RenderTarget, ResourceLimits};

use crate::common::{capability_client, setup_test_logging, NULL_COMPONENT};

fn host_pair() -> (ExecutionHost, RenderTarget) {
    let target = RenderTarget::default();
    let host = ExecutionHost::new(ResourceLimits::default(), target.clone());
    (host, target)
}

#[tokio::test(flavor = "multi_thread")]
async fn a_component_renders_fetched_data() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "name": "Widget", "quantity": 7 },
            { "id": 2, "name": "Gadget", "quantity": 3 },
        ])))
        .mount(&server)
        .await;

    let unit = compile(
        r#"
        export default async function Page({ api }) {
            const items = await api.get("/api/inventory");
            return (
                <ul>
                    {items.map((item) => (
                        <li key={item.id}>{item.name}: {item.quantity}</li>
                    ))}
                </ul>
            );
        }
        "#,
    )
    .unwrap();

    let (mut host, target) = host_pair();
    host.mount(&unit, capability_client(&server)).await.unwrap();

    let html = target.html().unwrap();
    assert!(html.contains("<li>Widget: 7</li>"), "got {html}");
    assert!(html.contains("<li>Gadget: 3</li>"), "got {html}");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_component_can_post_and_render_the_result() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/me/change-password"))
        .and(body_json(json!({ "current": "old", "next": "new" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "changed" })))
        .expect(1)
        .mount(&server)
        .await;

    let unit = compile(
        r#"
        export default async function Page({ api }) {
            const result = await api.post("/api/me/change-password", {
                current: "old",
                next: "new",
            });
            return <p>{result.status}</p>;
        }
        "#,
    )
    .unwrap();

    let (mut host, target) = host_pair();
    host.mount(&unit, capability_client(&server)).await.unwrap();
    assert_eq!(target.html().as_deref(), Some("<p>changed</p>"));
}

#[tokio::test(flavor = "multi_thread")]
async fn an_uncaught_capability_error_fails_the_mount_by_name() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let unit = compile(
        r#"
        export default async function Page({ api }) {
            const data = await api.get("/api/broken");
            return <p>{data.value}</p>;
        }
        "#,
    )
    .unwrap();

    let (mut host, target) = host_pair();
    let err = host.mount(&unit, capability_client(&server)).await.unwrap_err();
    assert_matches!(err, SandboxError::Mount(_));
    assert!(err.to_string().contains("RequestError"), "got {err}");
    assert!(!target.is_mounted());
}

#[tokio::test(flavor = "multi_thread")]
async fn components_can_catch_capability_errors_and_keep_rendering() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let unit = compile(
        r#"
        export default async function Page({ api }) {
            try {
                await api.get("/api/page");
                return <p>unexpected</p>;
            } catch (err) {
                return <p>{err.name}</p>;
            }
        }
        "#,
    )
    .unwrap();

    let (mut host, target) = host_pair();
    host.mount(&unit, capability_client(&server)).await.unwrap();
    assert_eq!(target.html().as_deref(), Some("<p>ParseError</p>"));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_null_component_mounts_an_empty_fragment() {
    setup_test_logging();
    let server = MockServer::start().await;
    let unit = compile(NULL_COMPONENT).unwrap();

    let (mut host, target) = host_pair();
    host.mount(&unit, capability_client(&server)).await.unwrap();
    assert!(target.is_mounted());
    assert_eq!(target.html().as_deref(), Some(""));
}
