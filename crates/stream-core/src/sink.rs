//! Presentation hand-off
//!
//! The state machine decides *when* the avatar video becomes visible; a
//! [`MediaSink`] decides *how*. A browser build would bind this to a video
//! element, a native player to its renderer.

use crate::transport::RemoteTrack;

pub trait MediaSink: Send + Sync {
    /// Bind inbound tracks to the visible output
    fn attach(&self, tracks: &[RemoteTrack]);

    fn set_muted(&self, muted: bool);

    /// Start playback if paused
    fn play(&self);

    /// Visibility in `[0, 1]`
    fn set_opacity(&self, opacity: f32);

    /// Stop every attached track and unbind the output
    fn detach_and_stop(&self);
}

/// Sink for headless use
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MediaSink for NullSink {
    fn attach(&self, _tracks: &[RemoteTrack]) {}

    fn set_muted(&self, _muted: bool) {}

    fn play(&self) {}

    fn set_opacity(&self, _opacity: f32) {}

    fn detach_and_stop(&self) {}
}
