//! `Clip` and the wire message that carries it between trusted peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipType {
    Text,
    Url,
    Image,
    File,
}

/// An immutable clipboard item, once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ClipType,
    /// UTF-8 text, or base64 for binary variants (image/file).
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: DeviceId,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Clip {
    pub fn text(content: impl Into<String>, sender_id: DeviceId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: ClipType::Text,
            content: content.into(),
            timestamp,
            sender_id,
            expires_at: None,
        }
    }
}

/// Wire envelope for clip fan-out over `/clipboard/clip/1.0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipMessage {
    #[serde(rename = "type")]
    pub kind: ClipMessageKind,
    pub from: DeviceId,
    pub clip: Clip,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipMessageKind {
    #[serde(rename = "CLIP")]
    Clip,
}

impl ClipMessage {
    pub fn new(from: DeviceId, clip: Clip, sent_at: DateTime<Utc>) -> Self {
        Self {
            kind: ClipMessageKind::Clip,
            from,
            clip,
            sent_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_message_round_trips_through_json() {
        let clip = Clip::text("hello", DeviceId::from("abc"), Utc::now());
        let msg = ClipMessage::new(DeviceId::from("abc"), clip, Utc::now());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"CLIP\""));
        let back: ClipMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.clip.content, "hello");
    }
}
