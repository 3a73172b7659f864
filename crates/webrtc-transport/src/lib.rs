//! webrtc-rs peer transport for talkstream sessions
//!
//! [`WebRtcTransportFactory`] builds one `RTCPeerConnection` per session with
//! the default codecs and interceptors, opens the ordered side-channel and
//! forwards every connection callback to the session as a
//! [`TransportEvent`]. Inbound video counters come from the connection's
//! statistics report. webrtc-rs only counts packets the application reads, so
//! every remote track gets a reader task that drains it until the track ends
//! or the transport closes.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use talkstream_core::{ApiConfig, StreamClient};
//! use talkstream_webrtc::WebRtcTransportFactory;
//!
//! # fn build() -> talkstream_core::StreamResult<StreamClient> {
//! let client = StreamClient::builder()
//!     .api(ApiConfig::load("./api.json")?)
//!     .transport_factory(Arc::new(WebRtcTransportFactory::new()))
//!     .build()?;
//! # Ok(client)
//! # }
//! ```

mod convert;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use talkstream_core::transport::{
    IceConnectionState, PeerConnectionState, PeerTransport, RemoteTrack, SessionDescription,
    SignalingState, TransportConfig, TransportEvent, TransportEventSender, TransportFactory,
};
use talkstream_core::{StreamError, StreamResult};

/// Event sink shared by every callback of one connection; silent once closed
#[derive(Clone)]
struct EventForwarder {
    events: TransportEventSender,
    closed: Arc<AtomicBool>,
}

impl EventForwarder {
    fn send(&self, event: TransportEvent) {
        if self.closed.load(Ordering::Acquire) {
            trace!(event = ?event, "Transport closed, dropping event");
            return;
        }
        if self.events.send(event).is_err() {
            trace!("Session gone, dropping transport event");
        }
    }
}

fn transport_error(context: &str, err: webrtc::Error) -> StreamError {
    StreamError::transport_error(format!("{}: {}", context, err))
}

/// Builds [`WebRtcTransport`]s
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        config: TransportConfig,
        events: TransportEventSender,
    ) -> StreamResult<Arc<dyn PeerTransport>> {
        let transport = WebRtcTransport::connect(config, events).await?;
        Ok(Arc::new(transport))
    }
}

type TrackReaders = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// One webrtc-rs peer connection plus its side-channel
pub struct WebRtcTransport {
    peer: Arc<RTCPeerConnection>,
    side_channel: Arc<RTCDataChannel>,
    readers: TrackReaders,
    closed: Arc<AtomicBool>,
}

impl WebRtcTransport {
    /// Create the connection, register callbacks and open the side-channel
    pub async fn connect(config: TransportConfig, events: TransportEventSender) -> StreamResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| transport_error("register codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| transport_error("register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(convert::ice_server).collect(),
            ..Default::default()
        };
        debug!(ice_servers = rtc_config.ice_servers.len(), "Creating peer connection");

        let peer = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| transport_error("create peer connection", e))?,
        );

        let closed = Arc::new(AtomicBool::new(false));
        let forwarder = EventForwarder {
            events,
            closed: closed.clone(),
        };
        let readers = TrackReaders::default();
        register_callbacks(&peer, &forwarder, &readers, &config.data_channel_label);

        let side_channel = peer
            .create_data_channel(&config.data_channel_label, None)
            .await
            .map_err(|e| transport_error("create data channel", e))?;
        forward_messages(&side_channel, &forwarder);
        info!(label = %config.data_channel_label, "Peer connection created");

        Ok(Self {
            peer,
            side_channel,
            readers,
            closed,
        })
    }

    pub fn side_channel_open(&self) -> bool {
        self.side_channel.ready_state() == RTCDataChannelState::Open
    }

    /// Reader tasks still attached to remote tracks
    pub fn active_track_readers(&self) -> usize {
        self.readers.lock().iter().filter(|r| !r.is_finished()).count()
    }
}

fn register_callbacks(
    peer: &Arc<RTCPeerConnection>,
    forwarder: &EventForwarder,
    readers: &TrackReaders,
    label: &str,
) {
    let fwd = forwarder.clone();
    peer.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        fwd.send(TransportEvent::IceGatheringChanged(convert::gathering_state(state)));
        Box::pin(async {})
    }));

    let fwd = forwarder.clone();
    peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let fwd = fwd.clone();
        Box::pin(async move {
            match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => fwd.send(TransportEvent::IceCandidate(Some(convert::candidate(init)))),
                    Err(e) => warn!(error = %e, "Failed to serialise local ICE candidate"),
                },
                None => fwd.send(TransportEvent::IceCandidate(None)),
            }
        })
    }));

    let fwd = forwarder.clone();
    peer.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        fwd.send(TransportEvent::IceConnectionChanged(convert::ice_connection_state(state)));
        Box::pin(async {})
    }));

    let fwd = forwarder.clone();
    peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        fwd.send(TransportEvent::PeerConnectionChanged(convert::peer_connection_state(state)));
        Box::pin(async {})
    }));

    let fwd = forwarder.clone();
    peer.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        fwd.send(TransportEvent::SignalingChanged(convert::signaling_state(state)));
        Box::pin(async {})
    }));

    let fwd = forwarder.clone();
    let readers = readers.clone();
    peer.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            if !fwd.closed.load(Ordering::Acquire) {
                let reader = spawn_track_reader(track.clone(), fwd.closed.clone());
                readers.lock().push(reader);
            }
            match convert::track_kind(track.kind()) {
                Some(kind) => {
                    let stream_id = track.stream_id();
                    fwd.send(TransportEvent::TrackAdded(RemoteTrack {
                        id: track.id(),
                        kind,
                        stream_id: (!stream_id.is_empty()).then_some(stream_id),
                    }));
                }
                None => debug!("Ignoring track of unknown kind"),
            }
            Box::pin(async {})
        },
    ));

    // The service may open the channel from its side as well.
    let fwd = forwarder.clone();
    let label = label.to_string();
    peer.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        if channel.label() == label {
            debug!(label = %label, "Remote opened the side-channel");
            forward_messages(&channel, &fwd);
        }
        Box::pin(async {})
    }));
}

/// Drain `track` so its inbound RTP statistics keep counting
fn spawn_track_reader(track: Arc<TrackRemote>, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let track_id = track.id();
        debug!(track_id = %track_id, ssrc = track.ssrc(), "Reading inbound track");

        let mut packets: u64 = 0;
        while !closed.load(Ordering::Acquire) {
            match track.read_rtp().await {
                Ok(_) => packets += 1,
                Err(e) => {
                    debug!(track_id = %track_id, packets, error = %e, "Inbound track ended");
                    return;
                }
            }
        }
        trace!(track_id = %track_id, packets, "Transport closed, track reader stopped");
    })
}

fn forward_messages(channel: &Arc<RTCDataChannel>, forwarder: &EventForwarder) {
    let fwd = forwarder.clone();
    let weak = Arc::downgrade(channel);
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let open = weak
            .upgrade()
            .map(|channel| channel.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false);
        match String::from_utf8(message.data.to_vec()) {
            Ok(data) => fwd.send(TransportEvent::SideChannelMessage { open, data }),
            Err(_) => debug!(len = message.data.len(), "Ignoring binary side-channel message"),
        }
        Box::pin(async {})
    }));
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn set_remote_description(&self, description: SessionDescription) -> StreamResult<()> {
        let description = convert::to_rtc_description(description)?;
        self.peer
            .set_remote_description(description)
            .await
            .map_err(|e| transport_error("set remote description", e))
    }

    async fn create_answer(&self) -> StreamResult<SessionDescription> {
        let answer = self
            .peer
            .create_answer(None)
            .await
            .map_err(|e| transport_error("create answer", e))?;
        convert::from_rtc_description(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> StreamResult<()> {
        let description = convert::to_rtc_description(description)?;
        self.peer
            .set_local_description(description)
            .await
            .map_err(|e| transport_error("set local description", e))
    }

    async fn inbound_video_bytes(&self) -> StreamResult<Option<u64>> {
        let report = self.peer.get_stats().await;
        let bytes = report
            .reports
            .values()
            .filter_map(|stats| match stats {
                StatsReportType::InboundRTP(inbound) if inbound.kind == "video" => {
                    Some(inbound.bytes_received)
                }
                _ => None,
            })
            .max();
        Ok(bytes)
    }

    fn signaling_state(&self) -> SignalingState {
        convert::signaling_state(self.peer.signaling_state())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        convert::ice_connection_state(self.peer.ice_connection_state())
    }

    fn connection_state(&self) -> PeerConnectionState {
        convert::peer_connection_state(self.peer.connection_state())
    }

    async fn close(&self) -> StreamResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing peer connection");
        for reader in self.readers.lock().drain(..) {
            reader.abort();
        }
        if let Err(e) = self.side_channel.close().await {
            debug!(error = %e, "Failed to close side-channel");
        }
        self.peer
            .close()
            .await
            .map_err(|e| transport_error("close peer connection", e))
    }
}
