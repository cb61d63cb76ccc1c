//! Stream protocol identifiers (spec §6).

use libp2p::StreamProtocol;

pub const CLIP_PROTOCOL: StreamProtocol = StreamProtocol::new("/clipboard/clip/1.0.0");
pub const TRUST_PROTOCOL: StreamProtocol = StreamProtocol::new("/clipboard/trust/1.0.0");
pub const HISTORY_PROTOCOL: StreamProtocol = StreamProtocol::new("/clipboard/history/1.0.0");
pub const RENDEZVOUS_PROTOCOL: StreamProtocol = StreamProtocol::new("/rendezvous/1.0.0");
