//! Swarm behaviour composition. `libp2p_stream` gives per-protocol raw
//! duplex streams — the shape spec §4.5's `send`/`onMessage` contract
//! actually needs, rather than a request-that-awaits-one-response RPC.

use libp2p::swarm::NetworkBehaviour;
use libp2p::{identify, relay};

/// Behaviour for an agent node: dials directly or through relays, accepts
/// circuit-relay reservations as a client, and exchanges per-protocol
/// streams via `libp2p_stream`.
#[derive(NetworkBehaviour)]
pub struct ClipmeshBehaviour {
    pub stream: libp2p_stream::Behaviour,
    pub relay_client: relay::client::Behaviour,
    pub identify: identify::Behaviour,
}

/// Behaviour for the standalone relay server binary: forwards circuit
/// traffic between peers and serves the rendezvous protocol (also a plain
/// `libp2p_stream` protocol, not libp2p's own rendezvous spec — spec §4.8
/// asks for "a single simple request/reply protocol", which this crate
/// implements by hand in `rendezvous`).
#[derive(NetworkBehaviour)]
pub struct RelayServerBehaviour {
    pub relay: relay::Behaviour,
    pub stream: libp2p_stream::Behaviour,
    pub identify: identify::Behaviour,
}
