//! Externally readable status snapshot
//!
//! A small map from status category to `(text, class name)`, written by the
//! signaling state machine and the health monitor and read by whatever renders
//! the session. Writes are last-write-wins per category; a reset empties it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Named status categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusCategory {
    IceGathering,
    Ice,
    Peer,
    Signaling,
    Streaming,
    StreamEvent,
}

impl StatusCategory {
    pub const ALL: [StatusCategory; 6] = [
        StatusCategory::IceGathering,
        StatusCategory::Ice,
        StatusCategory::Peer,
        StatusCategory::Signaling,
        StatusCategory::Streaming,
        StatusCategory::StreamEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::IceGathering => "iceGathering",
            StatusCategory::Ice => "ice",
            StatusCategory::Peer => "peer",
            StatusCategory::Signaling => "signaling",
            StatusCategory::Streaming => "streaming",
            StatusCategory::StreamEvent => "streamEvent",
        }
    }

    /// Prefix of the classification tag, e.g. `iceConnectionState-failed`
    pub fn class_prefix(&self) -> &'static str {
        match self {
            StatusCategory::IceGathering => "iceGatheringState",
            StatusCategory::Ice => "iceConnectionState",
            StatusCategory::Peer => "peerConnectionState",
            StatusCategory::Signaling => "signalingState",
            StatusCategory::Streaming => "streamingState",
            StatusCategory::StreamEvent => "streamEvent",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text and classification tag of one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub text: String,
    #[serde(rename = "className")]
    pub class_name: String,
}

impl StatusEntry {
    pub fn for_category(category: StatusCategory, text: impl Into<String>) -> Self {
        let text = text.into();
        let class_name = format!("{}-{}", category.class_prefix(), text);
        Self { text, class_name }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.class_name.is_empty()
    }
}

/// Shared, cheaply clonable status map
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    entries: Arc<RwLock<BTreeMap<StatusCategory, StatusEntry>>>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `text` for `category`, deriving the class name; returns the entry written
    pub fn set(&self, category: StatusCategory, text: impl Into<String>) -> StatusEntry {
        let entry = StatusEntry::for_category(category, text);
        self.entries.write().insert(category, entry.clone());
        entry
    }

    /// Entry for `category`, empty when never written since the last reset
    pub fn get(&self, category: StatusCategory) -> StatusEntry {
        self.entries.read().get(&category).cloned().unwrap_or_default()
    }

    /// Point-in-time copy of every category
    pub fn entries(&self) -> BTreeMap<StatusCategory, StatusEntry> {
        StatusCategory::ALL
            .iter()
            .map(|category| (*category, self.get(*category)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().values().all(StatusEntry::is_empty)
    }

    pub fn reset(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_derives_class_name() {
        let status = StatusSnapshot::new();
        status.set(StatusCategory::Ice, "checking");

        let entry = status.get(StatusCategory::Ice);
        assert_eq!(entry.text, "checking");
        assert_eq!(entry.class_name, "iceConnectionState-checking");
        assert!(!status.is_empty());
    }

    #[test]
    fn last_write_wins_and_reset_empties() {
        let status = StatusSnapshot::new();
        let reader = status.clone();
        status.set(StatusCategory::StreamEvent, "started");
        status.set(StatusCategory::StreamEvent, "done");
        assert_eq!(reader.get(StatusCategory::StreamEvent).class_name, "streamEvent-done");

        status.reset();
        assert!(reader.is_empty());
        assert!(reader.entries().values().all(StatusEntry::is_empty));
        assert_eq!(reader.entries().len(), 6);
    }

    #[test]
    fn snapshot_serializes_with_camel_case_keys() {
        let status = StatusSnapshot::new();
        status.set(StatusCategory::IceGathering, "gathering");

        let value = serde_json::to_value(status.entries()).unwrap();
        assert_eq!(value["iceGathering"]["className"], "iceGatheringState-gathering");
        assert_eq!(value["streamEvent"]["text"], "");
    }
}
