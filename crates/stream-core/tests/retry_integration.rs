//! Retry behaviour of the reqwest-backed signaling client

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talkstream_core::signaling::{HttpRequest, ReqwestTransport, RetryPolicy, RetryingClient};
use talkstream_core::StreamError;

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        max_jitter: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_error_status_is_returned_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/talks/streams"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "kind": "InternalServerError" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RetryingClient::new(Arc::new(ReqwestTransport::new()), quick_policy());
    let request = HttpRequest::new(Method::POST, format!("{}/talks/streams", server.uri()))
        .json(json!({ "stream_warmup": true }));

    let response = client.send(&request).await.expect("a status response is not a failure");

    assert_eq!(response.status, 500);
    assert!(!response.is_success());
    let err = response.error_for_status().unwrap_err();
    assert!(matches!(err, StreamError::HttpStatus { status: 500, .. }));
    server.verify().await;
}

#[tokio::test]
async fn test_unreachable_service_exhausts_retries() {
    // Bind then drop a listener so the port is known to refuse connections.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RetryingClient::new(Arc::new(ReqwestTransport::new()), quick_policy());
    let request = HttpRequest::new(Method::POST, format!("http://{}/talks/streams", addr));

    let err = client.send(&request).await.unwrap_err();

    match err {
        StreamError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, StreamError::NetworkError { .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_success_passes_body_through() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/talks/streams/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "deleted" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RetryingClient::new(Arc::new(ReqwestTransport::new()), quick_policy());
    let request = HttpRequest::new(Method::DELETE, format!("{}/talks/streams/s1", server.uri()))
        .json(json!({ "session_id": "sess1" }));

    let response = client.send_once(&request).await.unwrap();
    let body: serde_json::Value = response.json().unwrap();

    assert_eq!(body["status"], "deleted");
    server.verify().await;
}
