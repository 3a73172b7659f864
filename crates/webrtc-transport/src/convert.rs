//! Mapping between webrtc-rs types and the transport boundary types

use talkstream_core::transport::{
    IceCandidate, IceConnectionState, IceGatheringState, IceServer, PeerConnectionState,
    SdpType, SessionDescription, SignalingState, TrackKind,
};
use talkstream_core::{StreamError, StreamResult};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

pub(crate) fn ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

pub(crate) fn to_rtc_description(description: SessionDescription) -> StreamResult<RTCSessionDescription> {
    let result = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        other => {
            return Err(StreamError::transport_error(format!(
                "unsupported description type {:?}",
                other
            )))
        }
    };
    result.map_err(|e| StreamError::transport_error(format!("invalid SDP: {}", e)))
}

pub(crate) fn from_rtc_description(description: &RTCSessionDescription) -> StreamResult<SessionDescription> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp.clone())),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp.clone())),
        other => Err(StreamError::transport_error(format!(
            "unexpected local description type {:?}",
            other
        ))),
    }
}

pub(crate) fn candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
    }
}

pub(crate) fn gathering_state(state: RTCIceGathererState) -> IceGatheringState {
    match state {
        RTCIceGathererState::Gathering => IceGatheringState::Gathering,
        RTCIceGathererState::Complete | RTCIceGathererState::Closed => IceGatheringState::Complete,
        _ => IceGatheringState::New,
    }
}

pub(crate) fn ice_connection_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

pub(crate) fn peer_connection_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

pub(crate) fn signaling_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

pub(crate) fn track_kind(kind: RTPCodecType) -> Option<TrackKind> {
    match kind {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_server_credentials_default_to_empty() {
        let server = ice_server(&IceServer {
            urls: vec!["stun:stun.example.com:3478".to_string()],
            username: None,
            credential: None,
        });

        assert_eq!(server.urls, vec!["stun:stun.example.com:3478"]);
        assert!(server.username.is_empty());
        assert!(server.credential.is_empty());
    }

    #[test]
    fn terminal_ice_states_stay_fatal() {
        assert!(ice_connection_state(RTCIceConnectionState::Failed).is_fatal());
        assert!(ice_connection_state(RTCIceConnectionState::Closed).is_fatal());
        assert_eq!(
            ice_connection_state(RTCIceConnectionState::Unspecified),
            IceConnectionState::New
        );
    }

    #[test]
    fn signaling_states_map_by_name() {
        assert_eq!(signaling_state(RTCSignalingState::Stable), SignalingState::Stable);
        assert_eq!(
            signaling_state(RTCSignalingState::HaveRemoteOffer).as_str(),
            "have-remote-offer"
        );
        assert_eq!(gathering_state(RTCIceGathererState::Complete), IceGatheringState::Complete);
        assert_eq!(track_kind(RTPCodecType::Video), Some(TrackKind::Video));
        assert_eq!(track_kind(RTPCodecType::Unspecified), None);
    }

    #[test]
    fn candidate_keeps_browser_fields() {
        let converted = candidate(RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        });

        assert_eq!(converted.sdp_mid.as_deref(), Some("0"));
        assert_eq!(converted.sdp_mline_index, Some(0));
    }
}
