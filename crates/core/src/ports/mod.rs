//! Port interfaces consumed by the core from outside: `StoragePort`,
//! `ClipboardPort`, `HistoryPort`. Each is specified only as a contract; no
//! production implementation ships in this crate (spec §1, §6).

pub mod clipboard;
pub mod errors;
pub mod history;
pub mod storage;

pub use clipboard::ClipboardPort;
pub use errors::{IdentityError, StorageError, TrustError};
pub use history::HistoryPort;
pub use storage::StoragePort;
