//! Side-channel lifecycle messages
//!
//! The service reports stream lifecycle over the data channel as short text
//! messages. Grammar:
//!
//! ```text
//! message   = event [ ":" payload ]
//! event     = namespace "/" keyword
//! namespace = 1*char            ; may itself contain "/"
//! keyword   = 1*char            ; no "/" and no ":"
//! payload   = *char             ; opaque, never interpreted
//! ```
//!
//! Only the keyword after the last `/` is meaningful; `ready` is special.
//! Anything that does not match is ignored rather than guessed at.

/// A parsed side-channel message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleMessage<'a> {
    pub namespace: &'a str,
    pub keyword: &'a str,
    pub payload: Option<&'a str>,
}

/// Interpreted lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Negotiation finished on the service side
    Ready,
    /// Any other keyword, passed through verbatim as status text
    Status(String),
}

impl<'a> LifecycleMessage<'a> {
    /// Parse a raw message, `None` when it does not follow the grammar
    pub fn parse(raw: &'a str) -> Option<Self> {
        let (event, payload) = match raw.split_once(':') {
            Some((event, payload)) => (event, Some(payload)),
            None => (raw, None),
        };

        let (namespace, keyword) = event.rsplit_once('/')?;
        if namespace.trim().is_empty() || keyword.trim().is_empty() {
            return None;
        }
        if keyword.chars().any(char::is_whitespace) {
            return None;
        }

        Some(Self {
            namespace,
            keyword,
            payload,
        })
    }

    pub fn event(&self) -> LifecycleEvent {
        if self.keyword == "ready" {
            LifecycleEvent::Ready
        } else {
            LifecycleEvent::Status(self.keyword.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_message_is_recognised() {
        let msg = LifecycleMessage::parse("stream/ready:1").unwrap();
        assert_eq!(msg.namespace, "stream");
        assert_eq!(msg.keyword, "ready");
        assert_eq!(msg.payload, Some("1"));
        assert_eq!(msg.event(), LifecycleEvent::Ready);
    }

    #[test]
    fn other_keywords_pass_through() {
        let msg = LifecycleMessage::parse(r#"stream/started:{"metadata":{"videoId":"v1"}}"#).unwrap();
        assert_eq!(msg.event(), LifecycleEvent::Status("started".to_string()));
        assert_eq!(msg.payload, Some(r#"{"metadata":{"videoId":"v1"}}"#));
    }

    #[test]
    fn payload_is_optional_and_namespace_may_nest() {
        let msg = LifecycleMessage::parse("agent/stream/done").unwrap();
        assert_eq!(msg.namespace, "agent/stream");
        assert_eq!(msg.keyword, "done");
        assert_eq!(msg.payload, None);
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(LifecycleMessage::parse("ready").is_none());
        assert!(LifecycleMessage::parse("stream/:1").is_none());
        assert!(LifecycleMessage::parse("/ready:1").is_none());
        assert!(LifecycleMessage::parse("").is_none());
        assert!(LifecycleMessage::parse("stream/not ready:1").is_none());
    }
}
