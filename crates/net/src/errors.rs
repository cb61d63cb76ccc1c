use std::time::Duration;
use thiserror::Error;

/// Error kinds surfaced to pairing/restore callers (spec §7).
#[derive(Debug, Error, Clone)]
pub enum ConnectivityError {
    #[error("pairing payload did not decode to a valid pairing record")]
    InvalidPairingPayload,

    #[error("no dialable address after parsing and relay synthesis")]
    NoTarget,

    #[error("all direct and relay addresses exhausted")]
    DialFailed,

    #[error("dial attempt exceeded its deadline of {0:?}")]
    DialTimeout(Duration),

    #[error("relay has not granted a reservation for the target yet")]
    NoReservation,

    #[error("peer is not connected")]
    PeerNotConnected,

    #[error("trust-ack was negative")]
    Rejected,

    #[error("operation issued before start()")]
    MessagingNotStarted,

    #[error("operation was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error("rendezvous server returned an error: {0}")]
    Server(String),

    #[error("malformed rendezvous message: {0}")]
    Malformed(String),
}
