//! Lifecycle controller scenarios over the full pipeline.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{sandbox_against, setup_test_logging, stub_generation, NULL_COMPONENT};

#[tokio::test(flavor = "multi_thread")]
async fn a_submission_walks_idle_loading_rendering() {
    setup_test_logging();
    let server = MockServer::start().await;
    stub_generation(&server, NULL_COMPONENT).await;

    let sandbox = sandbox_against(&server);
    assert!(sandbox.state().is_idle());

    let mut rx = sandbox.watch();
    let observer = tokio::spawn(async move {
        let mut seen = vec![rx.borrow().clone()];
        while rx.changed().await.is_ok() {
            let state = rx.borrow().clone();
            let done = !state.is_loading();
            seen.push(state);
            if done {
                break;
            }
        }
        seen
    });

    sandbox.submit("anything at all").await;
    let seen = observer.await.unwrap();

    assert!(seen.first().map(|s| s.is_idle()).unwrap_or(false));
    assert!(seen.iter().any(|s| s.is_loading()), "saw {seen:?}");
    assert!(seen.last().map(|s| s.is_rendering()).unwrap_or(false), "saw {seen:?}");
    assert!(sandbox.target().is_mounted());
}

#[tokio::test(flavor = "multi_thread")]
async fn an_unavailable_generator_ends_in_the_error_state() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ui/code"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sandbox = sandbox_against(&server);
    sandbox.submit("show inventory").await;

    let state = sandbox.state();
    let message = state.error_message().unwrap_or_default();
    assert!(message.contains("status 503"), "got {message}");
    assert!(!sandbox.target().is_mounted());
}

#[tokio::test(flavor = "multi_thread")]
async fn an_empty_code_payload_ends_in_the_error_state() {
    setup_test_logging();
    let server = MockServer::start().await;
    stub_generation(&server, "   ").await;

    let sandbox = sandbox_against(&server);
    sandbox.submit("anything").await;

    let state = sandbox.state();
    let message = state.error_message().unwrap_or_default();
    assert!(message.contains("empty"), "got {message}");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_component_that_throws_reports_its_message() {
    setup_test_logging();
    let server = MockServer::start().await;
    stub_generation(
        &server,
        "export default () => { throw new Error(\"nope\"); };",
    )
    .await;

    let sandbox = sandbox_against(&server);
    sandbox.submit("anything").await;

    let state = sandbox.state();
    let message = state.error_message().unwrap_or_default();
    assert!(message.contains("nope"), "got {message}");
    assert!(!sandbox.target().is_mounted());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_rendered_view_draws_its_data_from_the_api() {
    setup_test_logging();
    let server = MockServer::start().await;
    stub_generation(
        &server,
        r#"
        export default async function Page({ api }) {
            const me = await api.get("/api/me");
            return <h1>Hello, {me.name}</h1>;
        }
        "#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Ada" })))
        .mount(&server)
        .await;

    let sandbox = sandbox_against(&server);
    sandbox.submit("greet me").await;

    assert!(sandbox.state().is_rendering());
    assert_eq!(
        sandbox.target().html().as_deref(),
        Some("<h1>Hello, Ada</h1>")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_after_an_error_returns_to_idle() {
    setup_test_logging();
    let server = MockServer::start().await;
    stub_generation(&server, "import fs from 'fs';").await;

    let sandbox = sandbox_against(&server);
    sandbox.submit("read my disk").await;
    assert!(sandbox.state().error_message().is_some());

    sandbox.reset().await;
    assert!(sandbox.state().is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_while_loading_discards_the_delayed_payload() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ui/code"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": "export default () => <b>stale</b>;" }))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let sandbox = sandbox_against(&server);
    let submission = {
        let sandbox = sandbox.clone();
        tokio::spawn(async move { sandbox.submit("slow prompt").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sandbox.state().is_loading());

    sandbox.reset().await;
    assert!(sandbox.state().is_idle());

    // The delayed payload resolves into a dead epoch: no transition, no mount.
    submission.await.unwrap();
    assert!(sandbox.state().is_idle());
    assert!(!sandbox.target().is_mounted());
}

#[tokio::test(flavor = "multi_thread")]
async fn only_the_newest_prompt_reaches_the_target() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ui/code"))
        .and(body_partial_json(json!({ "prompt": "slow prompt" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": "export default () => <b>stale</b>;" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ui/code"))
        .and(body_partial_json(json!({ "prompt": "fast prompt" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": "export default () => <i>fresh</i>;" })),
        )
        .mount(&server)
        .await;

    let sandbox = sandbox_against(&server);
    let slow = {
        let sandbox = sandbox.clone();
        tokio::spawn(async move { sandbox.submit("slow prompt").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    sandbox.reset().await;

    sandbox.submit("fast prompt").await;
    assert_eq!(sandbox.target().html().as_deref(), Some("<i>fresh</i>"));

    slow.await.unwrap();
    assert!(sandbox.state().is_rendering());
    assert_eq!(sandbox.target().html().as_deref(), Some("<i>fresh</i>"));
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmission_replaces_the_mounted_view() {
    setup_test_logging();
    let server = MockServer::start().await;
    stub_generation(&server, "export default () => <b>first</b>;").await;

    let sandbox = sandbox_against(&server);
    sandbox.submit("first view").await;
    assert_eq!(sandbox.target().html().as_deref(), Some("<b>first</b>"));

    server.reset().await;
    stub_generation(&server, "export default () => <i>second</i>;").await;

    sandbox.submit("second view").await;
    assert!(sandbox.state().is_rendering());
    assert_eq!(sandbox.target().html().as_deref(), Some("<i>second</i>"));
}
