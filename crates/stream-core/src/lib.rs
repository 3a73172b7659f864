//! talkstream-core: signaling for real-time talking-avatar streams
//!
//! A remote service renders a speaking avatar and streams it to this client
//! over a peer connection. This crate drives the client side of that exchange:
//!
//! ```text
//! StreamClient -> SignalingSession -> {SignalingApi -> RetryingClient, PeerTransport, HealthMonitor}
//! ```
//!
//! - [`signaling`]: the retrying HTTP client and the typed service calls
//! - [`session`]: the state machine owning the peer transport
//! - [`monitor`]: inbound-video health sampling
//! - [`client`]: the application-facing facade
//!
//! The peer connection itself sits behind [`transport::PeerTransport`]; the
//! `talkstream-webrtc` crate supplies the production implementation.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod status;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{StreamClient, StreamClientBuilder};
pub use config::{ApiConfig, Presenter, PresenterConfig, ServiceVariant, StreamConfig, VoiceConfig};
pub use error::{StreamError, StreamResult};
pub use events::{ClientEvent, CloseReason, EventBus};
pub use monitor::{HealthMonitor, PlaybackDetector, VideoState};
pub use session::{SessionPhase, SignalingSession};
pub use signaling::{RetryPolicy, Script};
pub use sink::{MediaSink, NullSink};
pub use status::{StatusCategory, StatusEntry, StatusSnapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
