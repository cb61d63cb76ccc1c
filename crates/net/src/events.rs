//! Connection lifecycle events raised by the messaging transport (spec
//! §4.5). The node distinguishes *relay* connections (to configured relay
//! peers) from *peer* connections; only the latter raise connected/
//! disconnected. Relay connections raise a separate relay-status signal.

use clipmesh_core::ids::DeviceId;
use multiaddr::Multiaddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    ReservationGranted,
    ReservationLost,
    ReservationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    PeerConnected {
        device_id: DeviceId,
        via_relay: bool,
    },
    PeerDisconnected {
        device_id: DeviceId,
    },
    RelayStatusChanged {
        relay: Multiaddr,
        status: RelayStatus,
    },
    /// Fires whenever the node's announced addresses change; duplicates are
    /// suppressed by the transport (content-hash comparison) before this
    /// event is raised.
    SelfAddressesChanged {
        addrs: Vec<Multiaddr>,
    },
}
