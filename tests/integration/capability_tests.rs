//! Capability client semantics against a live HTTP server.

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aiui_common::SandboxError;

use crate::common::{capability_client, setup_test_logging};

#[tokio::test]
async fn get_returns_parsed_json() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/inventory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1, "name": "Bolt" }])))
        .mount(&server)
        .await;

    let value = capability_client(&server).get("/api/inventory").await.unwrap();
    assert_eq!(value[0]["name"], "Bolt");
}

#[tokio::test]
async fn get_on_error_status_is_a_request_error() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = capability_client(&server).get("/api/broken").await.unwrap_err();
    assert_matches!(err, SandboxError::Request { .. });
    assert!(err.to_string().contains("status 500"), "got {err}");
    assert!(err.is_capability_error());
}

#[tokio::test]
async fn get_on_non_json_body_is_a_parse_error() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = capability_client(&server).get("/api/page").await.unwrap_err();
    assert_matches!(err, SandboxError::Parse { .. });
    assert!(err.to_string().starts_with("ParseError:"));
}

#[tokio::test]
async fn post_sends_an_empty_object_when_no_body_is_given() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ping"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pong": true })))
        .expect(1)
        .mount(&server)
        .await;

    let value = capability_client(&server).post("/api/ping", None).await.unwrap();
    assert_eq!(value["pong"], true);
}

#[tokio::test]
async fn post_with_an_empty_success_body_resolves_to_an_empty_object() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/me/change-password"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let value = capability_client(&server)
        .post("/api/me/change-password", Some(json!({ "next": "hunter2" })))
        .await
        .unwrap();
    assert_eq!(value, json!({}));
}

#[tokio::test]
async fn post_on_error_status_is_a_request_error() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = capability_client(&server)
        .post("/api/forbidden", None)
        .await
        .unwrap_err();
    assert_matches!(err, SandboxError::Request { .. });
    assert!(err.to_string().contains("status 403"));
}
