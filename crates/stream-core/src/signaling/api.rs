//! Typed calls against the remote streaming service
//!
//! | Call               | Method | Path                               | Retried |
//! |--------------------|--------|------------------------------------|---------|
//! | create session     | POST   | `/{service}/streams`               | yes     |
//! | post SDP answer    | POST   | `/{service}/streams/{id}/sdp`      | no      |
//! | post ICE candidate | POST   | `/{service}/streams/{id}/ice`      | no      |
//! | speak request      | POST   | `/{service}/streams/{id}`          | yes     |
//! | delete session     | DELETE | `/{service}/streams/{id}`          | no      |
//!
//! Every request carries `Authorization: Basic <key>` and a JSON body.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::{ApiConfig, Presenter, ServiceVariant, VoiceConfig};
use crate::error::{StreamError, StreamResult};
use crate::transport::{IceCandidate, IceServer, SessionDescription};

use super::retry::{HttpRequest, HttpResponse, RetryingClient};

/// Fields of the session-creation response the client relies on
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedStream {
    /// Stream identifier, used in every per-stream path
    pub id: String,
    pub offer: SessionDescription,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    pub session_id: String,
}

/// What the avatar should say
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Script {
    /// Synthesised speech from text
    Text {
        provider: VoiceConfig,
        input: String,
        ssml: bool,
    },
    /// Pre-recorded audio fetched by the service
    Audio { audio_url: String },
}

impl Script {
    pub fn text(input: impl Into<String>, provider: VoiceConfig, ssml: bool) -> Self {
        Script::Text {
            provider,
            input: input.into(),
            ssml,
        }
    }

    pub fn audio(audio_url: impl Into<String>) -> Self {
        Script::Audio {
            audio_url: audio_url.into(),
        }
    }

    /// True when there is nothing to render
    pub fn is_empty(&self) -> bool {
        match self {
            Script::Text { input, .. } => input.trim().is_empty(),
            Script::Audio { audio_url } => audio_url.trim().is_empty(),
        }
    }
}

/// Body of the speak request
#[derive(Debug, Clone, Serialize)]
pub struct SpeakRequest {
    pub script: Script,
    pub config: SpeakOptions,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpeakOptions {
    pub stitch: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Background {
    pub color: String,
}

#[derive(Serialize)]
struct CreateStreamBody<'a> {
    #[serde(flatten)]
    presenter: &'a Presenter,
    stream_warmup: bool,
}

#[derive(Serialize)]
struct IceCandidateBody<'a> {
    #[serde(flatten)]
    candidate: &'a IceCandidate,
    session_id: &'a str,
}

/// Client for the streaming endpoints of one service variant
#[derive(Clone)]
pub struct SignalingApi {
    client: RetryingClient,
    base_url: String,
    service: ServiceVariant,
    authorization: String,
}

impl SignalingApi {
    pub fn new(api: &ApiConfig, client: RetryingClient) -> Self {
        Self {
            client,
            base_url: api.base_url().to_string(),
            service: api.service,
            authorization: format!("Basic {}", api.key),
        }
    }

    pub fn service(&self) -> ServiceVariant {
        self.service
    }

    fn streams_url(&self) -> String {
        format!("{}/{}/streams", self.base_url, self.service)
    }

    fn stream_url(&self, stream_id: &str) -> String {
        format!("{}/{}", self.streams_url(), stream_id)
    }

    fn request(&self, method: Method, url: String, body: serde_json::Value) -> HttpRequest {
        HttpRequest::new(method, url)
            .header("Authorization", self.authorization.clone())
            .header("Content-Type", "application/json")
            .json(body)
    }

    /// Create a stream session and receive the server offer
    pub async fn create_stream(
        &self,
        presenter: &Presenter,
        stream_warmup: bool,
    ) -> StreamResult<CreatedStream> {
        let body = serde_json::to_value(CreateStreamBody {
            presenter,
            stream_warmup,
        })?;
        let request = self.request(Method::POST, self.streams_url(), body);

        let response = self
            .client
            .send(&request)
            .await
            .map_err(|e| StreamError::session_creation_failed(e.to_string()))?;
        let response = ensure_success(response)
            .map_err(|e| StreamError::session_creation_failed(e.to_string()))?;

        let created: CreatedStream = response
            .json()
            .map_err(|e| StreamError::session_creation_failed(e.to_string()))?;
        debug!(stream_id = %created.id, ice_servers = created.ice_servers.len(), "Stream session created");
        Ok(created)
    }

    /// Post the local answer for `stream_id`
    pub async fn post_sdp_answer(
        &self,
        stream_id: &str,
        session_id: &str,
        answer: &SessionDescription,
    ) -> StreamResult<()> {
        let body = json!({ "answer": answer, "session_id": session_id });
        let request = self.request(Method::POST, format!("{}/sdp", self.stream_url(stream_id)), body);

        let response = self
            .client
            .send_once(&request)
            .await
            .map_err(|e| StreamError::negotiation_failed(e.to_string()))?;
        ensure_success(response).map_err(|e| StreamError::negotiation_failed(e.to_string()))?;
        Ok(())
    }

    /// Trickle one local candidate
    pub async fn post_ice_candidate(
        &self,
        stream_id: &str,
        session_id: &str,
        candidate: &IceCandidate,
    ) -> StreamResult<()> {
        let body = serde_json::to_value(IceCandidateBody {
            candidate,
            session_id,
        })?;
        let request = self.request(Method::POST, format!("{}/ice", self.stream_url(stream_id)), body);

        ensure_success(self.client.send_once(&request).await?)?;
        Ok(())
    }

    /// Ask the avatar to render a script
    pub async fn speak(&self, stream_id: &str, request: &SpeakRequest) -> StreamResult<()> {
        let body = serde_json::to_value(request)?;
        let request = self.request(Method::POST, self.stream_url(stream_id), body);

        ensure_success(self.client.send(&request).await?)?;
        Ok(())
    }

    /// Delete the stream session on the service
    pub async fn delete_stream(&self, stream_id: &str, session_id: &str) -> StreamResult<()> {
        let body = json!({ "session_id": session_id });
        let request = self.request(Method::DELETE, self.stream_url(stream_id), body);

        ensure_success(self.client.send_once(&request).await?)?;
        Ok(())
    }
}

fn ensure_success(response: HttpResponse) -> StreamResult<HttpResponse> {
    response.error_for_status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresenterConfig;
    use crate::signaling::retry::RetryPolicy;
    use crate::testing::RecordingHttp;
    use std::sync::Arc;

    fn api(http: Arc<RecordingHttp>, service: ServiceVariant) -> SignalingApi {
        let config = ApiConfig::new("secret", "https://api.example.com/", service);
        SignalingApi::new(&config, RetryingClient::new(http, RetryPolicy::none()))
    }

    #[tokio::test]
    async fn create_stream_sends_presenter_and_warmup() {
        let http = Arc::new(RecordingHttp::new());
        http.respond(Method::POST, "/talks/streams", 201, &RecordingHttp::created_stream_body("s1", "sess1"));

        let created = api(http.clone(), ServiceVariant::Talks)
            .create_stream(&PresenterConfig::default().talks, true)
            .await
            .unwrap();

        assert_eq!(created.id, "s1");
        assert_eq!(created.session_id, "sess1");
        assert_eq!(created.ice_servers.len(), 2);

        let request = &http.requests()[0];
        assert_eq!(request.url, "https://api.example.com/talks/streams");
        let body = request.body.as_ref().unwrap();
        assert_eq!(body["stream_warmup"], true);
        assert!(body["source_url"].as_str().unwrap().ends_with("v1_image.jpeg"));
        assert!(request
            .headers
            .iter()
            .any(|(name, value)| name == "Authorization" && value == "Basic secret"));
    }

    #[tokio::test]
    async fn create_stream_maps_error_status() {
        let http = Arc::new(RecordingHttp::new());
        http.respond(Method::POST, "/clips/streams", 401, r#"{"kind":"AuthorizationError"}"#);

        let err = api(http, ServiceVariant::Clips)
            .create_stream(&PresenterConfig::default().clips, true)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::SessionCreationFailed { .. }));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn ice_candidate_body_uses_browser_field_names() {
        let http = Arc::new(RecordingHttp::new());
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        api(http.clone(), ServiceVariant::Talks)
            .post_ice_candidate("s1", "sess1", &candidate)
            .await
            .unwrap();

        let request = &http.requests()[0];
        assert_eq!(request.url, "https://api.example.com/talks/streams/s1/ice");
        let body = request.body.as_ref().unwrap();
        assert_eq!(body["sdpMid"], "0");
        assert_eq!(body["sdpMLineIndex"], 0);
        assert_eq!(body["session_id"], "sess1");
        assert!(body["candidate"].as_str().unwrap().starts_with("candidate:"));
    }

    #[tokio::test]
    async fn clips_speak_request_carries_background() {
        let http = Arc::new(RecordingHttp::new());
        let request = SpeakRequest {
            script: Script::text("hello", VoiceConfig::default(), false),
            config: SpeakOptions { stitch: true },
            session_id: "sess1".to_string(),
            background: Some(Background {
                color: "#FFFFFF".to_string(),
            }),
        };

        api(http.clone(), ServiceVariant::Clips).speak("s1", &request).await.unwrap();

        let sent = &http.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.url, "https://api.example.com/clips/streams/s1");
        let body = sent.body.as_ref().unwrap();
        assert_eq!(body["script"]["type"], "text");
        assert_eq!(body["script"]["provider"]["type"], "microsoft");
        assert_eq!(body["script"]["input"], "hello");
        assert_eq!(body["config"]["stitch"], true);
        assert_eq!(body["background"]["color"], "#FFFFFF");
    }

    #[tokio::test]
    async fn delete_stream_posts_session_id() {
        let http = Arc::new(RecordingHttp::new());

        api(http.clone(), ServiceVariant::Talks).delete_stream("s1", "sess1").await.unwrap();

        let sent = &http.requests()[0];
        assert_eq!(sent.method, Method::DELETE);
        assert_eq!(sent.body.as_ref().unwrap()["session_id"], "sess1");
    }

    #[test]
    fn audio_script_serializes_with_type_tag() {
        let value = serde_json::to_value(Script::audio("https://cdn.example.com/hello.mp3")).unwrap();
        assert_eq!(value["type"], "audio");
        assert_eq!(value["audio_url"], "https://cdn.example.com/hello.mp3");
        assert!(Script::audio(" ").is_empty());
    }
}
