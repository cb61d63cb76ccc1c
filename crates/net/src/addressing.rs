//! Address parsing/classification shared by the connectivity engine and the
//! messaging transport (spec §4.8 step 2: split direct vs. relay, dedupe
//! while preserving input order, extract `peerId`).

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};

pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

pub fn is_relay_addr(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

#[derive(Debug, Clone, Default)]
pub struct ClassifiedAddrs {
    pub direct: Vec<Multiaddr>,
    pub relay: Vec<Multiaddr>,
}

/// Splits into direct (no `/p2p-circuit`) and relay (containing
/// `/p2p-circuit`) addresses, deduplicating while preserving input order
/// (spec §4.8).
pub fn classify_and_dedupe(addrs: impl IntoIterator<Item = Multiaddr>) -> ClassifiedAddrs {
    let mut out = ClassifiedAddrs::default();
    let mut seen = std::collections::HashSet::new();
    for addr in addrs {
        if !seen.insert(addr.clone()) {
            continue;
        }
        if is_relay_addr(&addr) {
            out.relay.push(addr);
        } else {
            out.direct.push(addr);
        }
    }
    out
}

/// Synthesizes `<relay>/p2p-circuit/p2p/<peer_id>` when the target has no
/// explicit relay addresses (spec §4.8 step 4).
pub fn synthesize_relay_addr(relay: &Multiaddr, peer_id: PeerId) -> Multiaddr {
    let mut addr = relay.clone();
    addr.push(Protocol::P2pCircuit);
    addr.push(Protocol::P2p(peer_id));
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::from(libp2p_identity::Keypair::generate_ed25519().public())
    }

    #[test]
    fn classifies_direct_vs_relay() {
        let p = peer();
        let direct: Multiaddr = "/ip4/1.2.3.4/tcp/4001".parse().unwrap();
        let relay: Multiaddr = format!("/ip4/5.6.7.8/tcp/4001/p2p-circuit/p2p/{p}")
            .parse()
            .unwrap();
        let classified = classify_and_dedupe(vec![direct.clone(), relay.clone()]);
        assert_eq!(classified.direct, vec![direct]);
        assert_eq!(classified.relay, vec![relay]);
    }

    #[test]
    fn dedupes_preserving_order() {
        let a: Multiaddr = "/ip4/1.2.3.4/tcp/4001".parse().unwrap();
        let b: Multiaddr = "/ip4/5.6.7.8/tcp/4001".parse().unwrap();
        let classified = classify_and_dedupe(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(classified.direct, vec![a, b]);
    }

    #[test]
    fn synthesizes_relay_circuit_address() {
        let relay: Multiaddr = "/ip4/9.9.9.9/tcp/4001".parse().unwrap();
        let p = peer();
        let synthesized = synthesize_relay_addr(&relay, p);
        assert!(is_relay_addr(&synthesized));
        assert_eq!(extract_peer_id(&synthesized), Some(p));
    }
}
