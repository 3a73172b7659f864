//! Test doubles for the HTTP, transport and presentation seams
//!
//! Enabled for unit tests and, through the `test-util` feature, for
//! integration tests and downstream crates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::error::{StreamError, StreamResult};
use crate::signaling::retry::{HttpRequest, HttpResponse, HttpTransport};
use crate::sink::MediaSink;
use crate::transport::{
    IceCandidate, IceConnectionState, IceGatheringState, PeerConnectionState, PeerTransport,
    RemoteTrack, SessionDescription, SignalingState, TransportConfig, TransportEvent,
    TransportEventSender, TransportFactory,
};

struct Route {
    method: Method,
    path_suffix: String,
    status: u16,
    body: String,
}

/// Holds matching requests in flight until released
pub struct RequestGate {
    holding: AtomicBool,
    open: Semaphore,
}

impl Default for RequestGate {
    fn default() -> Self {
        Self {
            holding: AtomicBool::new(false),
            open: Semaphore::new(0),
        }
    }
}

impl RequestGate {
    /// A matching request is suspended at the gate
    pub fn is_holding(&self) -> bool {
        self.holding.load(Ordering::Acquire)
    }

    /// Let held and future requests through
    pub fn release(&self) {
        self.open.add_permits(1);
    }

    async fn pass(&self) {
        self.holding.store(true, Ordering::Release);
        // The permit goes back on drop, so one release opens the gate for good.
        let _ = self.open.acquire().await;
        self.holding.store(false, Ordering::Release);
    }
}

struct Gate {
    method: Method,
    path_suffix: String,
    gate: Arc<RequestGate>,
}

#[derive(Default)]
struct RecordingState {
    requests: Vec<HttpRequest>,
    attempts: usize,
    connection_failures: usize,
    routes: Vec<Route>,
    gates: Vec<Gate>,
    fallback: Option<(u16, String)>,
}

/// In-memory [`HttpTransport`] that records every attempt.
///
/// Unmatched requests get `200 {}`.
#[derive(Default)]
pub struct RecordingHttp {
    state: Mutex<RecordingState>,
}

impl RecordingHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` attempts with a connection error
    pub fn fail_connections(&self, count: usize) {
        self.state.lock().connection_failures = count;
    }

    /// Answer every unmatched request with `status`
    pub fn respond_with_status(&self, status: u16, body: &str) {
        self.state.lock().fallback = Some((status, body.to_string()));
    }

    /// Answer `method` requests whose URL ends with `path_suffix`
    pub fn respond(&self, method: Method, path_suffix: &str, status: u16, body: &str) {
        self.state.lock().routes.push(Route {
            method,
            path_suffix: path_suffix.to_string(),
            status,
            body: body.to_string(),
        });
    }

    /// Suspend `method` requests whose URL ends with `path_suffix` until the
    /// returned gate is released
    pub fn hold(&self, method: Method, path_suffix: &str) -> Arc<RequestGate> {
        let gate = Arc::new(RequestGate::default());
        self.state.lock().gates.push(Gate {
            method,
            path_suffix: path_suffix.to_string(),
            gate: gate.clone(),
        });
        gate
    }

    /// Session-creation response body with two ICE servers
    pub fn created_stream_body(stream_id: &str, session_id: &str) -> String {
        json!({
            "id": stream_id,
            "session_id": session_id,
            "offer": { "type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\n" },
            "ice_servers": [
                { "urls": ["stun:stun.example.com:3478"] },
                { "urls": "turn:turn.example.com:3478", "username": "u", "credential": "p" }
            ]
        })
        .to_string()
    }

    /// Requests that reached the responder, connection failures excluded
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_to(&self, method: Method, path_suffix: &str) -> Vec<HttpRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(path_suffix))
            .cloned()
            .collect()
    }

    /// Every attempt, connection failures included
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

#[async_trait]
impl HttpTransport for RecordingHttp {
    async fn execute(&self, request: &HttpRequest) -> StreamResult<HttpResponse> {
        let gate = self
            .state
            .lock()
            .gates
            .iter()
            .find(|g| g.method == request.method && request.url.ends_with(&g.path_suffix))
            .map(|g| g.gate.clone());
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut state = self.state.lock();
        state.attempts += 1;

        if state.connection_failures > 0 {
            state.connection_failures -= 1;
            return Err(StreamError::network_error("connection refused"));
        }

        state.requests.push(request.clone());
        let matched = state
            .routes
            .iter()
            .find(|route| route.method == request.method && request.url.ends_with(&route.path_suffix))
            .map(|route| (route.status, route.body.clone()));

        let (status, body) = matched
            .or_else(|| state.fallback.clone())
            .unwrap_or_else(|| (200, "{}".to_string()));
        Ok(HttpResponse { status, body })
    }
}

struct ScriptedState {
    remote: Option<SessionDescription>,
    local: Option<SessionDescription>,
    video_bytes: VecDeque<u64>,
    stats_reads: usize,
    signaling: SignalingState,
    ice: IceConnectionState,
    peer: PeerConnectionState,
    closed: bool,
    close_calls: usize,
    local_candidates: Vec<IceCandidate>,
    fail_remote_description: bool,
    events: Option<TransportEventSender>,
}

/// [`PeerTransport`] whose statistics and state changes are driven by the test
pub struct ScriptedTransport {
    config: Option<TransportConfig>,
    state: Mutex<ScriptedState>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    fn build(config: Option<TransportConfig>, events: Option<TransportEventSender>) -> Self {
        Self {
            config,
            state: Mutex::new(ScriptedState {
                remote: None,
                local: None,
                video_bytes: VecDeque::new(),
                stats_reads: 0,
                signaling: SignalingState::Stable,
                ice: IceConnectionState::New,
                peer: PeerConnectionState::New,
                closed: false,
                close_calls: 0,
                local_candidates: Vec::new(),
                fail_remote_description: false,
                events,
            }),
        }
    }

    /// Queue cumulative inbound video counters, one per statistics read
    pub fn push_video_bytes(&self, samples: impl IntoIterator<Item = u64>) {
        self.state.lock().video_bytes.extend(samples);
    }

    pub fn stats_reads(&self) -> usize {
        self.state.lock().stats_reads
    }

    pub fn config(&self) -> Option<&TransportConfig> {
        self.config.as_ref()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Deliver `event` as if raised by the connection; false once closed
    pub fn emit(&self, event: TransportEvent) -> bool {
        let state = self.state.lock();
        match &state.events {
            Some(events) if !state.closed => events.send(event).is_ok(),
            _ => false,
        }
    }

    pub fn set_ice_connection_state(&self, ice: IceConnectionState) -> bool {
        self.state.lock().ice = ice;
        self.emit(TransportEvent::IceConnectionChanged(ice))
    }

    pub fn set_connection_state(&self, peer: PeerConnectionState) -> bool {
        self.state.lock().peer = peer;
        self.emit(TransportEvent::PeerConnectionChanged(peer))
    }

    pub fn set_signaling_state(&self, signaling: SignalingState) {
        self.state.lock().signaling = signaling;
    }

    /// Deliver a side-channel text message on an open channel
    pub fn deliver_message(&self, data: &str) -> bool {
        self.emit(TransportEvent::SideChannelMessage {
            open: true,
            data: data.to_string(),
        })
    }

    pub fn add_track(&self, track: RemoteTrack) -> bool {
        self.emit(TransportEvent::TrackAdded(track))
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn set_remote_description(&self, description: SessionDescription) -> StreamResult<()> {
        let mut state = self.state.lock();
        if state.fail_remote_description {
            return Err(StreamError::transport_error("malformed remote description"));
        }
        state.remote = Some(description);
        state.signaling = SignalingState::HaveRemoteOffer;
        Ok(())
    }

    async fn create_answer(&self) -> StreamResult<SessionDescription> {
        Ok(SessionDescription::answer("v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\ns=scripted\r\n"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> StreamResult<()> {
        let candidates = {
            let mut state = self.state.lock();
            state.local = Some(description);
            state.signaling = SignalingState::Stable;
            state.local_candidates.clone()
        };

        self.emit(TransportEvent::SignalingChanged(SignalingState::Stable));
        if !candidates.is_empty() {
            self.emit(TransportEvent::IceGatheringChanged(IceGatheringState::Gathering));
            for candidate in candidates {
                self.emit(TransportEvent::IceCandidate(Some(candidate)));
            }
            self.emit(TransportEvent::IceCandidate(None));
            self.emit(TransportEvent::IceGatheringChanged(IceGatheringState::Complete));
        }
        Ok(())
    }

    async fn inbound_video_bytes(&self) -> StreamResult<Option<u64>> {
        let mut state = self.state.lock();
        state.stats_reads += 1;
        Ok(state.video_bytes.pop_front())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.state.lock().ice
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().peer
    }

    async fn close(&self) -> StreamResult<()> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.closed = true;
        state.signaling = SignalingState::Closed;
        state.ice = IceConnectionState::Closed;
        state.peer = PeerConnectionState::Closed;
        state.events = None;
        Ok(())
    }
}

/// [`TransportFactory`] handing out [`ScriptedTransport`]s
#[derive(Default)]
pub struct ScriptedFactory {
    created: Mutex<Vec<Arc<ScriptedTransport>>>,
    local_candidates: Mutex<Vec<IceCandidate>>,
    fail_remote_description: AtomicBool,
    fail_create: AtomicBool,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates each new transport gathers after its local description is set
    pub fn with_local_candidates(self, candidates: Vec<IceCandidate>) -> Self {
        *self.local_candidates.lock() = candidates;
        self
    }

    /// Make future transports reject the remote offer
    pub fn fail_remote_description(&self, fail: bool) {
        self.fail_remote_description.store(fail, Ordering::SeqCst);
    }

    /// Make future `create` calls fail
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Arc<ScriptedTransport>> {
        self.created.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<ScriptedTransport>> {
        self.created.lock().last().cloned()
    }

    /// Transports created and not yet closed
    pub fn open_count(&self) -> usize {
        self.created.lock().iter().filter(|t| !t.is_closed()).count()
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create(
        &self,
        config: TransportConfig,
        events: TransportEventSender,
    ) -> StreamResult<Arc<dyn PeerTransport>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StreamError::transport_error("peer connection unavailable"));
        }

        let transport = Arc::new(ScriptedTransport::build(Some(config), Some(events)));
        {
            let mut state = transport.state.lock();
            state.local_candidates = self.local_candidates.lock().clone();
            state.fail_remote_description = self.fail_remote_description.load(Ordering::SeqCst);
        }
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

/// One call observed by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Attach(usize),
    Muted(bool),
    Play,
    Opacity(f32),
    DetachAndStop,
}

/// [`MediaSink`] that records every call
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    /// Most recent opacity set, if any
    pub fn opacity(&self) -> Option<f32> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            SinkCall::Opacity(value) => Some(*value),
            _ => None,
        })
    }

    pub fn muted(&self) -> Option<bool> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            SinkCall::Muted(value) => Some(*value),
            _ => None,
        })
    }
}

impl MediaSink for RecordingSink {
    fn attach(&self, tracks: &[RemoteTrack]) {
        self.calls.lock().push(SinkCall::Attach(tracks.len()));
    }

    fn set_muted(&self, muted: bool) {
        self.calls.lock().push(SinkCall::Muted(muted));
    }

    fn play(&self) {
        self.calls.lock().push(SinkCall::Play);
    }

    fn set_opacity(&self, opacity: f32) {
        self.calls.lock().push(SinkCall::Opacity(opacity));
    }

    fn detach_and_stop(&self) {
        self.calls.lock().push(SinkCall::DetachAndStop);
    }
}

/// Host candidate for tests
pub fn host_candidate(port: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:1 1 udp 2122260223 10.0.0.2 {} typ host", port),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}
