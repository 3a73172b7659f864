//! Transport health monitor
//!
//! The side-channel `ready` event only says negotiation finished; it says
//! nothing about frames actually arriving. The monitor samples the cumulative
//! inbound video byte counter at a fixed period and reports edges of a binary
//! "is media flowing" signal.
//!
//! A sample counts as flowing when its counter is strictly greater than the
//! previous sample's. The detector starts out `Empty` and reports only
//! changes, so a flat first sample is silent. With the default tolerance of
//! zero every flat sample ends playback; a non-zero `stall_tolerance` absorbs
//! that many consecutive flat samples while playing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::transport::{PeerTransport, TransportEvent, TransportEventSender};

/// Whether inbound video is flowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoState {
    Playing,
    Empty,
}

impl VideoState {
    pub fn is_playing(&self) -> bool {
        matches!(self, VideoState::Playing)
    }

    /// Status text used for the `streaming` category
    pub fn status_text(&self) -> &'static str {
        match self {
            VideoState::Playing => "streaming",
            VideoState::Empty => "empty",
        }
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoState::Playing => f.write_str("playing"),
            VideoState::Empty => f.write_str("empty"),
        }
    }
}

/// Edge detector over the cumulative byte counter
#[derive(Debug, Clone)]
pub struct PlaybackDetector {
    state: VideoState,
    last_bytes_received: u64,
    stalled_samples: u32,
    stall_tolerance: u32,
}

impl PlaybackDetector {
    pub fn new(stall_tolerance: u32) -> Self {
        Self {
            state: VideoState::Empty,
            last_bytes_received: 0,
            stalled_samples: 0,
            stall_tolerance,
        }
    }

    /// Current state; `Empty` until bytes are seen to grow
    pub fn state(&self) -> VideoState {
        self.state
    }

    pub fn last_bytes_received(&self) -> u64 {
        self.last_bytes_received
    }

    /// Feed one sample; returns the new state when it changed
    pub fn observe(&mut self, bytes_received: u64) -> Option<VideoState> {
        let flowing = bytes_received > self.last_bytes_received;
        self.last_bytes_received = bytes_received;

        let next = if flowing {
            self.stalled_samples = 0;
            VideoState::Playing
        } else {
            self.stalled_samples = self.stalled_samples.saturating_add(1);
            match self.state {
                VideoState::Playing if self.stalled_samples <= self.stall_tolerance => {
                    VideoState::Playing
                }
                _ => VideoState::Empty,
            }
        };

        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// Periodic sampling task bound to one transport.
///
/// Dropping the monitor cancels the task.
pub struct HealthMonitor {
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start sampling `transport` every `period`, first sample one period from now
    pub fn spawn(
        transport: Arc<dyn PeerTransport>,
        period: Duration,
        stall_tolerance: u32,
        events: TransportEventSender,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut detector = PlaybackDetector::new(stall_tolerance);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let bytes = match transport.inbound_video_bytes().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => {
                        trace!("No inbound video report yet");
                        continue;
                    }
                    Err(e) => {
                        debug!(error = %e, "Failed to read transport statistics");
                        continue;
                    }
                };

                if let Some(state) = detector.observe(bytes) {
                    debug!(state = %state, bytes_received = bytes, "Video state changed");
                    if events.send(TransportEvent::VideoStateChanged(state)).is_err() {
                        break;
                    }
                }
            }
        });

        Self { task }
    }

    /// Stop sampling
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
