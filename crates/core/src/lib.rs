//! # clipmesh-core
//!
//! Domain model, trust protocol, and port contracts for the clipmesh peer
//! trust subsystem. Pure business logic — no transport, no storage
//! implementation.

pub mod clip;
pub mod history_sync;
pub mod identity;
pub mod ids;
pub mod pairing;
pub mod ports;
pub mod trust;

pub use clip::{Clip, ClipMessage, ClipType};
pub use history_sync::HistorySyncMessage;
pub use identity::{DeviceIdentity, DeviceIdentityPayload, IdentityStore};
pub use ids::DeviceId;
pub use pairing::{decode_pairing, encode_pairing, PairingCodecError};
