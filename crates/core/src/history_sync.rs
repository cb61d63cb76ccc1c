//! Wire envelope for the (optional) history channel, `/clipboard/history/1.0.0`.
//!
//! Spec §9 Open Questions flags this channel as "declared but never flushed
//! or consumed consistently" in the original design, with the choice
//! between full resync and delta sync left unresolved. This crate resolves
//! it as full resync (see DESIGN.md "Open Question Decisions"): a
//! `HistorySyncMessage::Snapshot` carries the sender's complete exported
//! history, and a requester asks for one with `HistorySyncMessage::Request`.
//! Nothing in `clipmesh-app` drives this automatically yet — the binder
//! wiring exists so a host application can opt in, matching the "declared
//! but not consumed" assumption the spec asks implementers to preserve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clip::Clip;
use crate::ids::DeviceId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HistorySyncMessage {
    #[serde(rename = "HISTORY_REQUEST")]
    Request { from: DeviceId, sent_at: DateTime<Utc> },
    #[serde(rename = "HISTORY_SNAPSHOT")]
    Snapshot {
        from: DeviceId,
        clips: Vec<Clip>,
        sent_at: DateTime<Utc>,
    },
}

impl HistorySyncMessage {
    pub fn from_device(&self) -> &DeviceId {
        match self {
            HistorySyncMessage::Request { from, .. } => from,
            HistorySyncMessage::Snapshot { from, .. } => from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let from = DeviceId::from("dev-a");
        let msg = HistorySyncMessage::Snapshot {
            from: from.clone(),
            clips: Vec::new(),
            sent_at: Utc::now(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"HISTORY_SNAPSHOT\""));
        let back: HistorySyncMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.from_device(), &from);
    }
}
