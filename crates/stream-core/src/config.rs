//! Bootstrap descriptor and stream settings
//!
//! Two layers of configuration drive a session:
//!
//! - [`ApiConfig`] is the credential descriptor (`api.json`) loaded once before the
//!   first `connect()`: the service key, its base url and the service variant.
//! - [`StreamConfig`] holds everything else (presenter selection, voice, speak
//!   flags, timing constants, retry policy) with builder-style setters.
//!
//! # Usage
//!
//! ```rust
//! use talkstream_core::config::{StreamConfig, VoiceConfig};
//! use std::time::Duration;
//!
//! let config = StreamConfig::default()
//!     .with_warmup(false)
//!     .with_ssml(true)
//!     .with_voice(VoiceConfig::new("microsoft", "en-US-JennyNeural"))
//!     .with_ready_settle_delay(Duration::from_millis(250));
//!
//! assert!(config.initial_readiness());
//! assert!(config.ssml);
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};
use crate::signaling::retry::RetryPolicy;

/// Key value shipped in the sample descriptor; means "not configured yet"
pub const PLACEHOLDER_KEY: &str = "🤫";

/// Default location of the bootstrap descriptor
pub const DEFAULT_API_CONFIG_PATH: &str = "./api.json";

/// Remote rendering service flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceVariant {
    /// Still-image presenters animated per utterance
    Talks,
    /// Pre-recorded video presenters
    Clips,
}

impl ServiceVariant {
    /// Path segment used in every signaling url
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceVariant::Talks => "talks",
            ServiceVariant::Clips => "clips",
        }
    }

    /// Idle loop shown by the presentation layer before the stream plays
    pub fn idle_video_asset(&self) -> &'static str {
        match self {
            ServiceVariant::Talks => "emma_idle.mp4",
            ServiceVariant::Clips => "alex_v2_idle.mp4",
        }
    }
}

impl fmt::Display for ServiceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential descriptor for the remote service
#[derive(Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Credential sent in the `Authorization` header
    pub key: String,
    /// Base url, e.g. `https://api.d-id.com`
    pub url: String,
    /// Service variant selecting presenter payloads and url paths
    pub service: ServiceVariant,
}

// Keep the credential out of logs.
impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("key", &"<redacted>")
            .field("url", &self.url)
            .field("service", &self.service)
            .finish()
    }
}

impl ApiConfig {
    pub fn new(key: impl Into<String>, url: impl Into<String>, service: ServiceVariant) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            service,
        }
    }

    /// Load the descriptor from a JSON file.
    ///
    /// Only I/O and parse problems are reported here; call [`ApiConfig::validate`]
    /// to reject placeholder credentials.
    pub fn load(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| StreamError::ConfigurationLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw).map_err(|e| StreamError::ConfigurationLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Parse the descriptor from a JSON document
    pub fn from_json(raw: &str) -> StreamResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reject descriptors that cannot possibly authenticate
    pub fn validate(&self) -> StreamResult<()> {
        let key = self.key.trim();
        if key.is_empty() || key == PLACEHOLDER_KEY {
            return Err(StreamError::invalid_configuration(
                "key",
                "API key is not configured; put your key inside api.json",
            ));
        }
        if self.url.trim().is_empty() {
            return Err(StreamError::invalid_configuration("url", "service url is empty"));
        }
        Ok(())
    }

    /// Base url without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Presenter selection sent with the session-creation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Presenter {
    /// Image-based presenter used by the `talks` service
    Image { source_url: String },
    /// Video presenter used by the `clips` service
    Video { presenter_id: String, driver_id: String },
}

/// Presenter per service variant
#[derive(Debug, Clone, PartialEq)]
pub struct PresenterConfig {
    pub talks: Presenter,
    pub clips: Presenter,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            talks: Presenter::Image {
                source_url:
                    "https://create-images-results.d-id.com/DefaultPresenters/Emma_f/v1_image.jpeg"
                        .to_string(),
            },
            clips: Presenter::Video {
                presenter_id: "v2_public_alex@qcvo4gupoy".to_string(),
                driver_id: "e3nbserss8".to_string(),
            },
        }
    }
}

impl PresenterConfig {
    pub fn for_service(&self, service: ServiceVariant) -> &Presenter {
        match service {
            ServiceVariant::Talks => &self.talks,
            ServiceVariant::Clips => &self.clips,
        }
    }
}

/// Text-to-speech voice used for text scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Provider name, e.g. `microsoft`
    #[serde(rename = "type")]
    pub provider: String,
    pub voice_id: String,
}

impl VoiceConfig {
    pub fn new(provider: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            voice_id: voice_id.into(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self::new("microsoft", "en-US-AndrewNeural")
    }
}

/// Settings for one streaming client
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Ask the service to pre-build the rendering pipeline before any utterance
    pub stream_warmup: bool,
    pub presenter: PresenterConfig,
    pub voice: VoiceConfig,
    /// Whether text scripts are interpreted as SSML
    pub ssml: bool,
    /// Concatenate new speech onto the running stream
    pub stitch: bool,
    /// Background colour sent with `clips` speak requests
    pub clips_background_color: String,
    /// Delay between the side-channel `ready` event and the readiness flip
    pub ready_settle_delay: Duration,
    /// Health-monitor sampling period
    pub stats_interval: Duration,
    /// Consecutive stalled samples tolerated before reporting `empty`; zero
    /// reports every stall
    pub stall_tolerance: u32,
    /// Label of the side-channel created on the transport
    pub data_channel_label: String,
    pub retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_warmup: true,
            presenter: PresenterConfig::default(),
            voice: VoiceConfig::default(),
            ssml: false,
            stitch: true,
            clips_background_color: "#FFFFFF".to_string(),
            ready_settle_delay: Duration::from_secs(1),
            stats_interval: Duration::from_millis(500),
            stall_tolerance: 0,
            data_channel_label: "JanusDataChannel".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readiness value at start-up and after every close
    pub fn initial_readiness(&self) -> bool {
        !self.stream_warmup
    }

    pub fn with_warmup(mut self, warmup: bool) -> Self {
        self.stream_warmup = warmup;
        self
    }

    pub fn with_presenter(mut self, service: ServiceVariant, presenter: Presenter) -> Self {
        match service {
            ServiceVariant::Talks => self.presenter.talks = presenter,
            ServiceVariant::Clips => self.presenter.clips = presenter,
        }
        self
    }

    pub fn with_voice(mut self, voice: VoiceConfig) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_ssml(mut self, ssml: bool) -> Self {
        self.ssml = ssml;
        self
    }

    pub fn with_stitch(mut self, stitch: bool) -> Self {
        self.stitch = stitch;
        self
    }

    pub fn with_clips_background_color(mut self, color: impl Into<String>) -> Self {
        self.clips_background_color = color.into();
        self
    }

    pub fn with_ready_settle_delay(mut self, delay: Duration) -> Self {
        self.ready_settle_delay = delay;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn with_stall_tolerance(mut self, samples: u32) -> Self {
        self.stall_tolerance = samples;
        self
    }

    pub fn with_data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = label.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_key_fails_validation() {
        let config = ApiConfig::new(PLACEHOLDER_KEY, "https://api.example.com", ServiceVariant::Talks);
        match config.validate() {
            Err(StreamError::InvalidConfiguration { field, .. }) => assert_eq!(field, "key"),
            other => panic!("expected configuration error, got {:?}", other),
        }

        let blank = ApiConfig::new("  ", "https://api.example.com", ServiceVariant::Talks);
        assert!(blank.validate().is_err());
    }

    #[test]
    fn descriptor_parses_from_json() {
        let config = ApiConfig::from_json(
            r#"{"key": "abc123", "url": "https://api.example.com/", "service": "clips"}"#,
        )
        .unwrap();

        assert_eq!(config.service, ServiceVariant::Clips);
        assert_eq!(config.base_url(), "https://api.example.com");
        assert!(config.validate().is_ok());
        assert!(!format!("{:?}", config).contains("abc123"));
    }

    #[test]
    fn unknown_service_is_a_parse_error() {
        let err = ApiConfig::from_json(r#"{"key": "k", "url": "u", "service": "movies"}"#).unwrap_err();
        assert_eq!(err.category(), "protocol");
    }

    #[test]
    fn missing_descriptor_file_reports_path() {
        let err = ApiConfig::load("/definitely/not/here/api.json").unwrap_err();
        match err {
            StreamError::ConfigurationLoad { path, .. } => assert!(path.ends_with("api.json")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn presenter_serializes_without_tag() {
        let talks = serde_json::to_value(&PresenterConfig::default().talks).unwrap();
        assert!(talks.get("source_url").is_some());

        let clips = serde_json::to_value(PresenterConfig::default().for_service(ServiceVariant::Clips)).unwrap();
        assert_eq!(clips["driver_id"], "e3nbserss8");
    }

    #[test]
    fn warmup_controls_initial_readiness() {
        assert!(!StreamConfig::default().initial_readiness());
        assert!(StreamConfig::default().with_warmup(false).initial_readiness());
    }
}
