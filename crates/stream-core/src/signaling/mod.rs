//! HTTP side of signaling: the retrying client and the typed service calls

pub mod api;
pub mod retry;

pub use api::{Background, CreatedStream, Script, SignalingApi, SpeakOptions, SpeakRequest};
pub use retry::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RetryPolicy, RetryingClient,
};
