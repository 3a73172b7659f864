//! End-to-end session tests against a mock signaling service
//!
//! HTTP goes over the real reqwest transport to a wiremock server; the peer
//! connection is the scripted transport from `talkstream_core::testing`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talkstream_core::testing::{host_candidate, RecordingSink, ScriptedFactory, SinkCall};
use talkstream_core::transport::{IceConnectionState, RemoteTrack, TrackKind};
use talkstream_core::{
    ApiConfig, ClientEvent, CloseReason, RetryPolicy, ServiceVariant, SessionPhase,
    StatusCategory, StreamClient, StreamConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn created_body(stream_id: &str, session_id: &str) -> serde_json::Value {
    json!({
        "id": stream_id,
        "session_id": session_id,
        "offer": { "type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\n" },
        "ice_servers": [{ "urls": ["stun:stun.example.com:3478"] }]
    })
}

fn fast_config() -> StreamConfig {
    StreamConfig::default()
        .with_ready_settle_delay(Duration::from_millis(50))
        .with_stats_interval(Duration::from_millis(20))
        .with_retry(RetryPolicy::none())
}

fn client_for(
    server: &MockServer,
    service: ServiceVariant,
    factory: Arc<ScriptedFactory>,
    sink: Arc<RecordingSink>,
) -> StreamClient {
    StreamClient::builder()
        .api(ApiConfig::new("test-key", server.uri(), service))
        .config(fast_config())
        .transport_factory(factory)
        .sink(sink)
        .build()
        .unwrap()
}

async fn wait_for<F>(events: &mut broadcast::Receiver<ClientEvent>, mut predicate: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

#[tokio::test]
async fn test_connect_ready_speak_teardown() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/talks/streams"))
        .and(header("Authorization", "Basic test-key"))
        .and(body_partial_json(json!({ "stream_warmup": true })))
        .respond_with(ResponseTemplate::new(201).set_body_json(created_body("s1", "sess1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/talks/streams/s1/sdp"))
        .and(body_partial_json(json!({ "session_id": "sess1", "answer": { "type": "answer" } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/talks/streams/s1/ice"))
        .and(body_partial_json(json!({ "session_id": "sess1", "sdpMid": "0" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/talks/streams/s1"))
        .and(body_partial_json(json!({
            "script": { "type": "text", "input": "test" },
            "config": { "stitch": true },
            "session_id": "sess1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "started" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/talks/streams/s1"))
        .and(body_partial_json(json!({ "session_id": "sess1" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let factory = Arc::new(ScriptedFactory::new().with_local_candidates(vec![host_candidate(54400)]));
    let sink = Arc::new(RecordingSink::new());
    let client = client_for(&server, ServiceVariant::Talks, factory.clone(), sink.clone());
    let mut events = client.subscribe();

    let service = client.connect().await.expect("connect should succeed");
    assert_eq!(service, ServiceVariant::Talks);
    assert_eq!(client.phase(), SessionPhase::Connected);
    assert_eq!(client.stream_id().as_deref(), Some("s1"));
    assert!(!client.is_ready(), "warm-up sessions start not ready");

    let transport = factory.latest().unwrap();
    transport.push_video_bytes([4_000, 9_000, 15_000, 22_000]);
    transport.add_track(RemoteTrack {
        id: "video0".to_string(),
        kind: TrackKind::Video,
        stream_id: None,
    });
    transport.deliver_message("stream/ready:1");

    wait_for(&mut events, |e| matches!(e, ClientEvent::ReadinessChanged { ready: true })).await;
    assert!(client.is_ready());
    assert_eq!(
        client.status().get(StatusCategory::StreamEvent).class_name,
        "streamEvent-ready"
    );

    assert!(client.send_utterance("test").await.unwrap());

    client.teardown().await;
    assert_eq!(client.phase(), SessionPhase::Closed);
    assert!(transport.is_closed());
    assert!(client.status().is_empty());
    assert!(sink.calls().contains(&SinkCall::DetachAndStop));

    server.verify().await;
}

#[tokio::test]
async fn test_clips_session_uses_video_presenter_and_background() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/clips/streams"))
        .and(body_partial_json(json!({
            "presenter_id": "v2_public_alex@qcvo4gupoy",
            "driver_id": "e3nbserss8"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(created_body("c1", "csess")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/clips/streams/c1/sdp"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/clips/streams/c1"))
        .and(body_partial_json(json!({ "background": { "color": "#FFFFFF" } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let factory = Arc::new(ScriptedFactory::new());
    let client = StreamClient::builder()
        .api(ApiConfig::new("test-key", server.uri(), ServiceVariant::Clips))
        .config(fast_config().with_warmup(false))
        .transport_factory(factory)
        .build()
        .unwrap();

    assert_eq!(client.connect().await.unwrap(), ServiceVariant::Clips);
    assert!(client.is_ready(), "sessions without warm-up start ready");
    assert!(client.send_utterance("hello from clips").await.unwrap());

    client.stop().await;
    server.verify().await;
}

#[tokio::test]
async fn test_failed_creation_surfaces_session_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/talks/streams"))
        .respond_with(
            ResponseTemplate::new(402).set_body_json(json!({ "kind": "InsufficientCreditsError" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let factory = Arc::new(ScriptedFactory::new());
    let client = client_for(
        &server,
        ServiceVariant::Talks,
        factory.clone(),
        Arc::new(RecordingSink::new()),
    );

    let err = client.connect().await.unwrap_err();

    assert_eq!(err.category(), "signaling");
    assert!(err.to_string().contains("402"));
    assert!(factory.created().is_empty());
    assert_eq!(client.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_ice_failure_closes_session_without_delete() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/talks/streams"))
        .respond_with(ResponseTemplate::new(201).set_body_json(created_body("s9", "sess9")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/talks/streams/s9/sdp"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let factory = Arc::new(ScriptedFactory::new());
    let client = client_for(
        &server,
        ServiceVariant::Talks,
        factory.clone(),
        Arc::new(RecordingSink::new()),
    );
    let mut events = client.subscribe();
    client.connect().await.unwrap();

    factory
        .latest()
        .unwrap()
        .set_ice_connection_state(IceConnectionState::Disconnected);
    factory
        .latest()
        .unwrap()
        .set_ice_connection_state(IceConnectionState::Closed);

    let closed = wait_for(&mut events, |e| matches!(e, ClientEvent::SessionClosed { .. })).await;
    assert!(matches!(
        closed,
        ClientEvent::SessionClosed {
            reason: CloseReason::TransportFailed(IceConnectionState::Closed)
        }
    ));
    assert_eq!(client.phase(), SessionPhase::Closed);
    assert!(!client.send_utterance("anyone there?").await.unwrap());

    server.verify().await;
}
