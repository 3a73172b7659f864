//! Peer transport boundary
//!
//! The signaling state machine never touches a media stack directly. It drives
//! a [`PeerTransport`] built by a [`TransportFactory`], and every native
//! callback of that transport is funnelled into a single channel of
//! [`TransportEvent`]s consumed by one dispatch function.
//!
//! ```text
//!  native callbacks ──► TransportEvent ──► mpsc ──► SignalingSession::dispatch
//!  health monitor   ──┘                    ▲
//!  settling timer   ───────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;

use crate::error::StreamResult;
use crate::monitor::VideoState;

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as exchanged with the service (`{"type": .., "sdp": ..}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Relay/reflexive server handed out by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::One(url) => vec![url],
        Urls::Many(urls) => urls,
    })
}

/// Local candidate as trickled to the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Generates the browser-style lowercase `Display` used for status text
macro_rules! state_display {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

state_display!(IceGatheringState {
    New => "new",
    Gathering => "gathering",
    Complete => "complete",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

state_display!(IceConnectionState {
    New => "new",
    Checking => "checking",
    Connected => "connected",
    Completed => "completed",
    Disconnected => "disconnected",
    Failed => "failed",
    Closed => "closed",
});

impl IceConnectionState {
    /// States after which the media path cannot recover
    pub fn is_fatal(&self) -> bool {
        matches!(self, IceConnectionState::Failed | IceConnectionState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

state_display!(PeerConnectionState {
    New => "new",
    Connecting => "connecting",
    Connected => "connected",
    Disconnected => "disconnected",
    Failed => "failed",
    Closed => "closed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

state_display!(SignalingState {
    Stable => "stable",
    HaveLocalOffer => "have-local-offer",
    HaveRemoteOffer => "have-remote-offer",
    HaveLocalPranswer => "have-local-pranswer",
    HaveRemotePranswer => "have-remote-pranswer",
    Closed => "closed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Inbound media track attached to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    /// Media stream the track belongs to, if the remote announced one
    pub stream_id: Option<String>,
}

/// Everything the state machine reacts to
#[derive(Debug, Clone)]
pub enum TransportEvent {
    IceGatheringChanged(IceGatheringState),
    /// `None` marks the end of candidates
    IceCandidate(Option<IceCandidate>),
    IceConnectionChanged(IceConnectionState),
    PeerConnectionChanged(PeerConnectionState),
    SignalingChanged(SignalingState),
    TrackAdded(RemoteTrack),
    /// Text received on the side-channel; `open` is the channel state at receipt
    SideChannelMessage { open: bool, data: String },
    /// Edge reported by the health monitor
    VideoStateChanged(VideoState),
    /// The readiness settling delay elapsed
    ReadySettled,
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Parameters for building a transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
    /// Label of the ordered, reliable side-channel
    pub data_channel_label: String,
}

/// One peer connection with its side-channel
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn set_remote_description(&self, description: SessionDescription) -> StreamResult<()>;

    async fn create_answer(&self) -> StreamResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> StreamResult<()>;

    /// Cumulative bytes received on inbound video, `None` until a report exists
    async fn inbound_video_bytes(&self) -> StreamResult<Option<u64>>;

    fn signaling_state(&self) -> SignalingState;

    fn ice_connection_state(&self) -> IceConnectionState;

    fn connection_state(&self) -> PeerConnectionState;

    /// Close the connection; no events are delivered afterwards
    async fn close(&self) -> StreamResult<()>;
}

/// Builds transports and wires their callbacks into `events`
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        config: TransportConfig,
        events: TransportEventSender,
    ) -> StreamResult<Arc<dyn PeerTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_accept_single_or_list_urls() {
        let servers: Vec<IceServer> = serde_json::from_str(
            r#"[
                {"urls": ["stun:stun.example.com:3478"]},
                {"urls": "turn:turn.example.com:443?transport=tcp", "username": "u", "credential": "c"}
            ]"#,
        )
        .unwrap();

        assert_eq!(servers[0].urls, vec!["stun:stun.example.com:3478"]);
        assert_eq!(servers[1].urls.len(), 1);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn states_render_like_the_browser() {
        assert_eq!(SignalingState::HaveRemoteOffer.to_string(), "have-remote-offer");
        assert_eq!(IceGatheringState::Complete.to_string(), "complete");
        assert!(IceConnectionState::Failed.is_fatal());
        assert!(IceConnectionState::Closed.is_fatal());
        assert!(!IceConnectionState::Disconnected.is_fatal());
    }

    #[test]
    fn session_description_round_trips_type_field() {
        let offer: SessionDescription =
            serde_json::from_str(r#"{"type": "offer", "sdp": "v=0\r\n"}"#).unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);

        let answer = serde_json::to_value(SessionDescription::answer("v=0\r\n")).unwrap();
        assert_eq!(answer["type"], "answer");
    }
}
