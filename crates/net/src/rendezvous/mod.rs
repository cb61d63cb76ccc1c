//! 4.8 Rendezvous — a minimal length-prefixed JSON protocol over
//! `/rendezvous/1.0.0`, used to discover a trusted peer's current addresses
//! through a relay without a central directory.

pub mod client;
pub mod server;

pub use client::RendezvousClient;
pub use server::RendezvousServer;

use serde::{Deserialize, Serialize};

/// Wire shape for both verbs (spec §6 "Rendezvous: JSON
/// `{action:"register"|"list", topic, addrs?}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RendezvousRequest {
    Register { topic: String, addrs: Vec<String> },
    List { topic: String },
}

/// `{ok, peer?|peers?, error?}` — `peer` is unused by either verb today but
/// kept to match the wire shape spec.md names explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RendezvousReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<PeerRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub addrs: Vec<String>,
}
