//! Trust subsystem: store (§4.2), manager (§4.3), and wire protocol (§4.4).

pub mod manager;
pub mod protocol;
pub mod store;

pub use manager::{
    HandleOutcome, PendingRequest, RejectionReason, SubscriptionHandle, TrustEvent, TrustManager,
    PENDING_EXPIRY,
};
pub use protocol::{TrustAck, TrustAckPayload, TrustRequest};
pub use store::{TrustStore, TrustedDevice};
