//! Session facade
//!
//! [`StreamClient`] is what an application holds: a handle that delegates to
//! one [`SignalingSession`] and exposes readiness and video visibility for
//! rendering.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use talkstream_core::{ApiConfig, StreamClient, StreamConfig};
//! # use talkstream_core::transport::TransportFactory;
//! # async fn run(factory: Arc<dyn TransportFactory>) -> talkstream_core::StreamResult<()> {
//! let client = StreamClient::builder()
//!     .api(ApiConfig::load("./api.json")?)
//!     .config(StreamConfig::default())
//!     .transport_factory(factory)
//!     .build()?;
//!
//! client.connect().await?;
//! client.send_utterance("Hello there").await?;
//! client.teardown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::{ApiConfig, ServiceVariant, StreamConfig};
use crate::error::{StreamError, StreamResult};
use crate::events::{ClientEvent, EventBus};
use crate::monitor::VideoState;
use crate::session::{SessionPhase, SignalingSession};
use crate::signaling::api::Script;
use crate::signaling::retry::{HttpTransport, ReqwestTransport};
use crate::sink::{MediaSink, NullSink};
use crate::status::StatusSnapshot;
use crate::transport::TransportFactory;

/// Fluent builder for [`StreamClient`]
///
/// Only the API descriptor and the transport factory are required. HTTP
/// defaults to reqwest, presentation to [`NullSink`].
pub struct StreamClientBuilder {
    api: Option<ApiConfig>,
    config: StreamConfig,
    http: Option<Arc<dyn HttpTransport>>,
    factory: Option<Arc<dyn TransportFactory>>,
    sink: Arc<dyn MediaSink>,
    event_capacity: usize,
}

impl StreamClientBuilder {
    pub fn new() -> Self {
        Self {
            api: None,
            config: StreamConfig::default(),
            http: None,
            factory: None,
            sink: Arc::new(NullSink),
            event_capacity: 64,
        }
    }

    pub fn api(mut self, api: ApiConfig) -> Self {
        self.api = Some(api);
        self
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn http_transport(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Buffer size of the client event channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> StreamResult<StreamClient> {
        let api = self
            .api
            .ok_or_else(|| StreamError::invalid_configuration("api", "no API descriptor supplied"))?;
        let factory = self.factory.ok_or_else(|| {
            StreamError::invalid_configuration("transport", "no transport factory supplied")
        })?;
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()) as Arc<dyn HttpTransport>);

        let session = SignalingSession::new(
            api,
            self.config,
            http,
            factory,
            self.sink,
            EventBus::new(self.event_capacity),
        );
        Ok(StreamClient { session })
    }
}

impl Default for StreamClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Application-facing handle to one streaming session
#[derive(Clone)]
pub struct StreamClient {
    session: SignalingSession,
}

impl StreamClient {
    pub fn builder() -> StreamClientBuilder {
        StreamClientBuilder::new()
    }

    /// Open a session; returns the service variant for presentation assets
    pub async fn connect(&self) -> StreamResult<ServiceVariant> {
        self.session.connect().await
    }

    /// Speak `text`; `Ok(false)` when the session could not take it
    pub async fn send_utterance(&self, text: &str) -> StreamResult<bool> {
        self.session.send_utterance(text).await
    }

    pub async fn send_script(&self, script: Script) -> StreamResult<bool> {
        self.session.send_script(script).await
    }

    /// Close locally, leaving the remote session to expire
    pub async fn stop(&self) {
        self.session.close().await;
    }

    /// Delete the remote session and close locally
    pub async fn teardown(&self) {
        self.session.teardown().await;
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn video_opacity(&self) -> f32 {
        self.session.video_opacity()
    }

    pub fn video_state(&self) -> Option<VideoState> {
        self.session.video_state()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn stream_id(&self) -> Option<String> {
        self.session.stream_id()
    }

    pub fn service(&self) -> ServiceVariant {
        self.session.service()
    }

    /// Idle loop to show while no stream video is visible
    pub fn idle_video_asset(&self) -> &'static str {
        self.session.service().idle_video_asset()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.session.status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingHttp, ScriptedFactory};

    #[test]
    fn build_requires_descriptor_and_factory() {
        let err = StreamClient::builder()
            .transport_factory(Arc::new(ScriptedFactory::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration_error());

        let err = StreamClient::builder()
            .api(ApiConfig::new("key", "https://api.example.com", ServiceVariant::Talks))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::InvalidConfiguration { ref field, .. } if field == "transport"));
    }

    #[tokio::test]
    async fn placeholder_key_fails_fast_without_network() {
        let http = Arc::new(RecordingHttp::new());
        let client = StreamClient::builder()
            .api(ApiConfig::new("🤫", "https://api.example.com", ServiceVariant::Clips))
            .http_transport(http.clone())
            .transport_factory(Arc::new(ScriptedFactory::new()))
            .build()
            .unwrap();

        let err = client.connect().await.unwrap_err();

        assert!(err.is_configuration_error());
        assert_eq!(http.attempts(), 0);
        assert_eq!(client.phase(), SessionPhase::Idle);
        assert_eq!(client.idle_video_asset(), "alex_v2_idle.mp4");
    }
}
