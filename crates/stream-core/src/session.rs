//! Signaling state machine
//!
//! Owns one peer transport at a time and walks it through
//!
//! ```text
//!   Idle ──connect()──► Negotiating ──answer posted──► Connected
//!     │                     │                             │
//!     └──────────────── close()/teardown()/ICE failed ────┴──► Closed
//! ```
//!
//! All transport callbacks, health-monitor edges and the readiness settling
//! timer arrive as [`TransportEvent`]s on one channel and are handled by a
//! single dispatch function. Handlers run one at a time; each checks that the
//! session generation it was started for is still current before acting, so a
//! late callback from a replaced transport is dropped instead of touching the
//! new session.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{ApiConfig, ServiceVariant, StreamConfig};
use crate::error::{StreamError, StreamResult};
use crate::events::{ClientEvent, CloseReason, EventBus};
use crate::monitor::{HealthMonitor, VideoState};
use crate::protocol::{LifecycleEvent, LifecycleMessage};
use crate::signaling::api::{Background, Script, SignalingApi, SpeakOptions, SpeakRequest};
use crate::signaling::retry::{HttpTransport, RetryingClient};
use crate::sink::MediaSink;
use crate::status::{StatusCategory, StatusSnapshot};
use crate::transport::{
    IceCandidate, IceConnectionState, PeerConnectionState, PeerTransport, RemoteTrack,
    SessionDescription, SignalingState, TransportConfig, TransportEvent, TransportEventReceiver,
    TransportFactory,
};

/// Lifecycle phase of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Connected => "connected",
            SessionPhase::Closed => "closed",
        };
        f.write_str(text)
    }
}

/// Who asked for the release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseOrigin {
    /// A public operation; the event loop is aborted
    Caller,
    /// The event loop itself; it exits after the release returns
    EventLoop,
}

/// Resources belonging to the live session
#[derive(Default)]
struct LiveSession {
    stream_id: Option<String>,
    session_id: Option<String>,
    transport: Option<Arc<dyn PeerTransport>>,
    events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    event_loop: Option<JoinHandle<()>>,
    monitor: Option<HealthMonitor>,
    settle_timer: Option<JoinHandle<()>>,
    tracks: Vec<RemoteTrack>,
    video: Option<VideoState>,
}

impl LiveSession {
    fn is_empty(&self) -> bool {
        self.stream_id.is_none() && self.transport.is_none() && self.event_loop.is_none()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(timer) = self.settle_timer.take() {
            timer.abort();
        }
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.abort();
        }
    }
}

struct SessionState {
    phase: SessionPhase,
    /// Bumped on every release; handlers bound to an older value are stale
    generation: u64,
    ready: bool,
    live: LiveSession,
}

impl SessionState {
    fn opacity(&self) -> f32 {
        if self.ready && self.live.video == Some(VideoState::Playing) {
            1.0
        } else {
            0.0
        }
    }
}

struct Inner {
    api_config: ApiConfig,
    api: SignalingApi,
    config: StreamConfig,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn MediaSink>,
    status: StatusSnapshot,
    events: EventBus,
    state: Mutex<SessionState>,
}

/// The signaling state machine for a single streaming session
#[derive(Clone)]
pub struct SignalingSession {
    inner: Arc<Inner>,
}

impl SignalingSession {
    pub fn new(
        api_config: ApiConfig,
        config: StreamConfig,
        http: Arc<dyn HttpTransport>,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn MediaSink>,
        events: EventBus,
    ) -> Self {
        let api = SignalingApi::new(&api_config, RetryingClient::new(http, config.retry.clone()));
        let state = SessionState {
            phase: SessionPhase::Idle,
            generation: 0,
            ready: config.initial_readiness(),
            live: LiveSession::default(),
        };

        Self {
            inner: Arc::new(Inner {
                api_config,
                api,
                config,
                factory,
                sink,
                status: StatusSnapshot::new(),
                events,
                state: Mutex::new(state),
            }),
        }
    }

    /// Create a stream session and negotiate its transport.
    ///
    /// Any previous session is closed first. Returns the service variant so
    /// the caller can choose presentation assets.
    pub async fn connect(&self) -> StreamResult<ServiceVariant> {
        let inner = &self.inner;
        let service = inner.api.service();

        inner.api_config.validate().map_err(|e| {
            error!(error = %e, "Refusing to connect with an unconfigured descriptor");
            e
        })?;

        if let Some(transport) = inner.current_transport() {
            if transport.connection_state() == PeerConnectionState::Connected {
                warn!("Peer connection already connected, ignoring connect()");
                return Ok(service);
            }
        }

        inner.release(CloseReason::Replaced, ReleaseOrigin::Caller).await;

        let generation = {
            let mut state = inner.state.lock();
            state.phase = SessionPhase::Negotiating;
            state.generation
        };

        info!(service = %service, "Requesting new stream session");
        let presenter = inner.config.presenter.for_service(service);
        let created = match inner.api.create_stream(presenter, inner.config.stream_warmup).await {
            Ok(created) => created,
            Err(e) => {
                error!(error = %e, "Stream session creation failed");
                inner.abandon_negotiation(generation);
                return Err(e);
            }
        };
        info!(stream_id = %created.id, "Stream session created");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = {
            let mut state = inner.state.lock();
            if state.generation == generation {
                state.live.stream_id = Some(created.id.clone());
                state.live.session_id = Some(created.session_id.clone());
                state.live.events_tx = Some(events_tx.clone());
                state.live.event_loop = Some(tokio::spawn(run_event_loop(
                    Arc::downgrade(inner),
                    events_rx,
                    generation,
                )));
            }
            state.generation != generation
        };
        if closed {
            // Nobody else knows these identifiers; drop the stream remotely.
            warn!(stream_id = %created.id, "Session closed while the stream was being created");
            if let Err(e) = inner.api.delete_stream(&created.id, &created.session_id).await {
                warn!(stream_id = %created.id, error = %e, "Failed to delete abandoned stream session");
            }
            return Err(closed_during_negotiation());
        }

        let transport_config = TransportConfig {
            ice_servers: created.ice_servers.clone(),
            data_channel_label: inner.config.data_channel_label.clone(),
        };
        let transport = match inner.factory.create(transport_config, events_tx).await {
            Ok(transport) => transport,
            Err(e) => return Err(inner.fail_negotiation(generation, e).await),
        };
        if !inner.install_transport(generation, transport.clone()) {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "Failed to close orphaned transport");
            }
            return Err(closed_during_negotiation());
        }

        let answer = match exchange_descriptions(transport.as_ref(), created.offer).await {
            Ok(answer) => answer,
            Err(e) => return Err(inner.fail_negotiation(generation, e).await),
        };

        debug!(stream_id = %created.id, "Sending SDP answer");
        if let Err(e) = inner
            .api
            .post_sdp_answer(&created.id, &created.session_id, &answer)
            .await
        {
            return Err(inner.fail_negotiation(generation, e).await);
        }

        {
            let mut state = inner.state.lock();
            if state.generation != generation {
                return Err(closed_during_negotiation());
            }
            state.phase = SessionPhase::Connected;
        }

        info!(stream_id = %created.id, service = %service, "Stream negotiated");
        inner.events.emit(ClientEvent::SessionStarted {
            stream_id: created.id,
            service,
        });
        Ok(service)
    }

    /// Speak free text with the configured voice
    pub async fn send_utterance(&self, text: &str) -> StreamResult<bool> {
        let script = Script::text(text, self.inner.config.voice.clone(), self.inner.config.ssml);
        self.send_script(script).await
    }

    /// Ask the avatar to render `script`.
    ///
    /// Returns `Ok(false)` without any network call when the session cannot
    /// take an utterance yet (empty script, not negotiated, not ready).
    pub async fn send_script(&self, script: Script) -> StreamResult<bool> {
        let inner = &self.inner;

        if script.is_empty() {
            warn!("Cannot start stream: no text provided");
            return Ok(false);
        }

        let target = {
            let state = inner.state.lock();
            match (&state.live.transport, &state.live.stream_id, &state.live.session_id) {
                (Some(transport), Some(stream_id), Some(session_id)) => {
                    let usable = transport.signaling_state() == SignalingState::Stable
                        || transport.ice_connection_state() == IceConnectionState::Connected;
                    if !usable {
                        Err(StreamError::precondition_not_met("connection not stable"))
                    } else if !state.ready {
                        Err(StreamError::precondition_not_met("stream not ready"))
                    } else {
                        Ok((stream_id.clone(), session_id.clone()))
                    }
                }
                _ => Err(StreamError::precondition_not_met("no active stream session")),
            }
        };

        let (stream_id, session_id) = match target {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Cannot start stream");
                return Ok(false);
            }
        };

        let background = match inner.api.service() {
            ServiceVariant::Clips => Some(Background {
                color: inner.config.clips_background_color.clone(),
            }),
            ServiceVariant::Talks => None,
        };
        let request = SpeakRequest {
            script,
            config: SpeakOptions {
                stitch: inner.config.stitch,
            },
            session_id,
            background,
        };

        info!(stream_id = %stream_id, "Sending speak request");
        inner.api.speak(&stream_id, &request).await?;
        Ok(true)
    }

    /// Delete the remote session (best effort) and release everything local.
    ///
    /// Safe to call at any time, any number of times.
    pub async fn teardown(&self) {
        let ids = {
            let state = self.inner.state.lock();
            (state.live.stream_id.clone(), state.live.session_id.clone())
        };

        match ids {
            (Some(stream_id), Some(session_id)) => {
                info!(stream_id = %stream_id, "Deleting stream session");
                if let Err(e) = self.inner.api.delete_stream(&stream_id, &session_id).await {
                    warn!(stream_id = %stream_id, error = %e, "Failed to delete stream session");
                }
            }
            _ => debug!("No stream session to delete"),
        }

        self.inner.release(CloseReason::Requested, ReleaseOrigin::Caller).await;
    }

    /// Release the transport and every local resource without contacting the service
    pub async fn close(&self) {
        self.inner.release(CloseReason::Requested, ReleaseOrigin::Caller).await;
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    /// 1 while video is playing and the stream is ready, else 0
    pub fn video_opacity(&self) -> f32 {
        self.inner.state.lock().opacity()
    }

    pub fn video_state(&self) -> Option<VideoState> {
        self.inner.state.lock().live.video
    }

    pub fn stream_id(&self) -> Option<String> {
        self.inner.state.lock().live.stream_id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().live.session_id.clone()
    }

    pub fn has_transport(&self) -> bool {
        self.inner.state.lock().live.transport.is_some()
    }

    pub fn service(&self) -> ServiceVariant {
        self.inner.api.service()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn current_transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.state.lock().live.transport.clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn install_transport(&self, generation: u64, transport: Arc<dyn PeerTransport>) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.live.transport = Some(transport);
        true
    }

    /// Creation failed before anything was allocated
    fn abandon_negotiation(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation && state.live.is_empty() {
            state.phase = SessionPhase::Idle;
        }
    }

    /// Tear down a half-built session and normalise the error
    async fn fail_negotiation(&self, generation: u64, err: StreamError) -> StreamError {
        error!(error = %err, "Negotiation failed");
        if self.is_current(generation) {
            self.release(CloseReason::NegotiationFailed, ReleaseOrigin::Caller).await;
        }
        match err {
            StreamError::NegotiationFailed { .. } => err,
            other => StreamError::negotiation_failed(other.to_string()),
        }
    }

    fn record(&self, category: StatusCategory, text: &str) {
        let entry = self.status.set(category, text);
        self.events.emit(ClientEvent::StatusChanged { category, entry });
    }

    async fn dispatch(&self, generation: u64, event: TransportEvent) -> ControlFlow<()> {
        if !self.is_current(generation) {
            debug!(generation, "Dropping event for a closed session");
            return ControlFlow::Break(());
        }

        match event {
            TransportEvent::IceGatheringChanged(state) => {
                debug!(state = %state, "ICE gathering state changed");
                self.record(StatusCategory::IceGathering, state.as_str());
            }
            TransportEvent::IceCandidate(Some(candidate)) => self.post_candidate(candidate).await,
            TransportEvent::IceCandidate(None) => debug!("Local ICE candidate gathering finished"),
            TransportEvent::IceConnectionChanged(state) => {
                info!(state = %state, "ICE connection state changed");
                self.record(StatusCategory::Ice, state.as_str());
                if state.is_fatal() {
                    warn!(state = %state, "ICE connection failed or closed, closing session");
                    self.release(CloseReason::TransportFailed(state), ReleaseOrigin::EventLoop)
                        .await;
                    return ControlFlow::Break(());
                }
            }
            TransportEvent::PeerConnectionChanged(state) => {
                debug!(state = %state, "Peer connection state changed");
                self.record(StatusCategory::Peer, state.as_str());
            }
            TransportEvent::SignalingChanged(state) => {
                debug!(state = %state, "Signaling state changed");
                self.record(StatusCategory::Signaling, state.as_str());
            }
            TransportEvent::SideChannelMessage { open, data } => self.on_side_channel(open, &data),
            TransportEvent::TrackAdded(track) => self.on_track(track),
            TransportEvent::VideoStateChanged(video) => self.on_video_state(video),
            TransportEvent::ReadySettled => self.on_ready(),
        }

        ControlFlow::Continue(())
    }

    async fn post_candidate(&self, candidate: IceCandidate) {
        let ids = {
            let state = self.state.lock();
            (state.live.stream_id.clone(), state.live.session_id.clone())
        };
        let (Some(stream_id), Some(session_id)) = ids else {
            debug!("Dropping ICE candidate gathered before the session was created");
            return;
        };

        debug!(stream_id = %stream_id, "Sending ICE candidate");
        if let Err(e) = self
            .api
            .post_ice_candidate(&stream_id, &session_id, &candidate)
            .await
        {
            warn!(stream_id = %stream_id, error = %e, "Failed to post ICE candidate");
        }
    }

    fn on_side_channel(&self, open: bool, data: &str) {
        debug!(data = %data, "Side-channel message received");
        if !open {
            debug!("Side-channel not open, ignoring message");
            return;
        }

        let Some(message) = LifecycleMessage::parse(data) else {
            debug!(data = %data, "Ignoring unrecognised side-channel message");
            return;
        };

        match message.event() {
            LifecycleEvent::Ready => self.schedule_ready(),
            LifecycleEvent::Status(keyword) => self.record(StatusCategory::StreamEvent, &keyword),
        }
    }

    fn schedule_ready(&self) {
        let mut state = self.state.lock();
        let Some(events) = state.live.events_tx.clone() else {
            return;
        };
        if let Some(previous) = state.live.settle_timer.take() {
            previous.abort();
        }

        let delay = self.config.ready_settle_delay;
        debug!(delay_ms = delay.as_millis() as u64, "Stream ready reported, settling");
        state.live.settle_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(TransportEvent::ReadySettled);
        }));
    }

    fn on_track(&self, track: RemoteTrack) {
        debug!(track_id = %track.id, kind = ?track.kind, "Inbound track attached");
        let mut state = self.state.lock();
        state.live.tracks.push(track);

        if state.live.monitor.is_some() {
            return;
        }
        if let (Some(transport), Some(events)) =
            (state.live.transport.clone(), state.live.events_tx.clone())
        {
            state.live.monitor = Some(HealthMonitor::spawn(
                transport,
                self.config.stats_interval,
                self.config.stall_tolerance,
                events,
            ));
            info!("Transport health monitor started");
        }
    }

    fn on_video_state(&self, video: VideoState) {
        let (opacity, ready, tracks) = {
            let mut state = self.state.lock();
            state.live.video = Some(video);
            (state.opacity(), state.ready, state.live.tracks.clone())
        };
        info!(state = %video, "Video status changed");

        if video.is_playing() {
            self.sink.attach(&tracks);
            self.sink.set_muted(!ready);
            self.sink.play();
        }
        self.sink.set_opacity(opacity);

        self.record(StatusCategory::Streaming, video.status_text());
        self.events.emit(ClientEvent::VideoStateChanged {
            state: video,
            opacity,
        });
    }

    fn on_ready(&self) {
        let (changed, video, opacity) = {
            let mut state = self.state.lock();
            state.live.settle_timer = None;
            let changed = !state.ready;
            state.ready = true;
            (changed, state.live.video, state.opacity())
        };

        self.record(StatusCategory::StreamEvent, "ready");
        if !changed {
            return;
        }

        info!("Stream ready");
        self.events.emit(ClientEvent::ReadinessChanged { ready: true });
        if video == Some(VideoState::Playing) {
            self.sink.set_muted(false);
            self.sink.set_opacity(opacity);
            self.events.emit(ClientEvent::VideoStateChanged {
                state: VideoState::Playing,
                opacity,
            });
        }
    }

    /// Release the transport, timers, tracks and identifiers; idempotent
    async fn release(&self, reason: CloseReason, origin: ReleaseOrigin) {
        let initial_ready = self.config.initial_readiness();
        let (mut live, had_session, was_ready) = {
            let mut state = self.state.lock();
            let live = std::mem::take(&mut state.live);
            let had_session = !live.is_empty()
                || matches!(state.phase, SessionPhase::Negotiating | SessionPhase::Connected);
            state.generation += 1;
            let was_ready = state.ready;
            state.ready = initial_ready;
            if had_session {
                state.phase = SessionPhase::Closed;
            }
            (live, had_session, was_ready)
        };

        if had_session {
            info!(reason = ?reason, "Closing stream session");
        }

        if let Some(monitor) = live.monitor.take() {
            monitor.cancel();
        }
        if let Some(timer) = live.settle_timer.take() {
            timer.abort();
        }
        if let Some(event_loop) = live.event_loop.take() {
            if origin == ReleaseOrigin::Caller {
                event_loop.abort();
            }
        }
        let transport = live.transport.take();
        let had_tracks = !live.tracks.is_empty();
        drop(live);

        if had_tracks {
            self.sink.detach_and_stop();
        }
        if had_session {
            self.sink.set_opacity(0.0);
        }
        self.status.reset();

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Failed to close peer transport");
            }
        }

        if had_session {
            self.events.emit(ClientEvent::SessionClosed { reason });
        }
        if was_ready != initial_ready {
            self.events.emit(ClientEvent::ReadinessChanged {
                ready: initial_ready,
            });
        }
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut events: TransportEventReceiver, generation: u64) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.dispatch(generation, event).await.is_break() {
            break;
        }
    }
    debug!(generation, "Transport event loop finished");
}

async fn exchange_descriptions(
    transport: &dyn PeerTransport,
    offer: SessionDescription,
) -> StreamResult<SessionDescription> {
    transport
        .set_remote_description(offer)
        .await
        .map_err(|e| StreamError::negotiation_failed(format!("set remote description: {}", e)))?;
    debug!("Set remote description OK");

    let answer = transport
        .create_answer()
        .await
        .map_err(|e| StreamError::negotiation_failed(format!("create answer: {}", e)))?;

    transport
        .set_local_description(answer.clone())
        .await
        .map_err(|e| StreamError::negotiation_failed(format!("set local description: {}", e)))?;
    debug!("Set local description OK");

    Ok(answer)
}

fn closed_during_negotiation() -> StreamError {
    StreamError::negotiation_failed("session closed during negotiation")
}
