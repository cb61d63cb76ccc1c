//! # clipmesh-net
//!
//! Peer networking and trust subsystem: a single libp2p node per process
//! that dials directly or through relays, exchanges typed messages over
//! dedicated stream protocols, and binds the wire-level trust-request/ack
//! exchange into the trust manager in `clipmesh-core`.

pub mod addressing;
pub mod behaviour;
pub mod binder;
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod events;
pub mod messenger;
pub mod protocol_ids;
pub mod rendezvous;
pub mod stream_io;
pub mod transport;

pub use binder::{BinderHandles, TrustProtocolBinder, TrustRequestOrAck};
pub use config::NetworkConfig;
pub use connectivity::{ConnectivityEngine, PairResult, PairingTarget, RestoreResult, Via};
pub use errors::{ConnectivityError, MessengerError, RendezvousError};
pub use events::{NetworkEvent, RelayStatus};
pub use messenger::{IsTrustedFn, Messenger, TrustGated};
pub use rendezvous::{RendezvousClient, RendezvousServer};
pub use transport::{MessagingTransport, SendTarget};
