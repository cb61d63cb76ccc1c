use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A device's stable identifier: the base58 encoding of the multihash of its
/// public key, i.e. a libp2p `PeerId` rendered as text. Acts as both the
/// application-level device id and the networking peer id — deviceId is a
/// deterministic function of publicKey.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Derive a `DeviceId` from a public key. This is the one place the
    /// deviceId-from-publicKey invariant is established.
    pub fn from_public_key(public_key: &libp2p_identity::PublicKey) -> Self {
        Self(public_key.to_peer_id().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// The libp2p `PeerId` this device id encodes, for dialing/stream APIs.
    pub fn to_peer_id(&self) -> Result<libp2p_identity::PeerId, libp2p_identity::ParseError> {
        libp2p_identity::PeerId::from_str(&self.0)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<libp2p_identity::PeerId> for DeviceId {
    fn from(id: libp2p_identity::PeerId) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_deterministically_from_public_key() {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let a = DeviceId::from_public_key(&keypair.public());
        let b = DeviceId::from_public_key(&keypair.public());
        assert_eq!(a, b);
    }

    #[test]
    fn round_trips_through_peer_id() {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let id = DeviceId::from_public_key(&keypair.public());
        let peer_id = id.to_peer_id().unwrap();
        assert_eq!(DeviceId::from(peer_id), id);
    }

    #[test]
    fn different_keys_yield_different_ids() {
        let a = DeviceId::from_public_key(&libp2p_identity::Keypair::generate_ed25519().public());
        let b = DeviceId::from_public_key(&libp2p_identity::Keypair::generate_ed25519().public());
        assert_ne!(a, b);
    }
}
