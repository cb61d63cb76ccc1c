//! Use cases: thin orchestration over `Core`'s ports and messengers.

pub mod pairing;
pub mod start_app;
pub mod sync_clipboard;

pub use pairing::PairDevice;
pub use start_app::{AppHandle, StartApp};
pub use sync_clipboard::SyncClipboard;
