//! `ClipboardPort` — local clipboard polling/OS integration.
//!
//! Out of scope as an implementation (external collaborator); only the
//! contract the core consumes is defined here.

use async_trait::async_trait;

use crate::clip::Clip;

/// Default polling interval for `ClipboardPort` implementations, per spec.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;

#[async_trait]
pub trait ClipboardPort: Send + Sync {
    async fn read_text(&self) -> anyhow::Result<String>;
    async fn write_text(&self, text: &str) -> anyhow::Result<()>;

    /// Register a callback invoked for every locally produced clip.
    fn on_local_clip(&self, cb: Box<dyn Fn(Clip) + Send + Sync>);

    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mockall::mock! {
    pub Clipboard {}

    #[async_trait]
    impl ClipboardPort for Clipboard {
        async fn read_text(&self) -> anyhow::Result<String>;
        async fn write_text(&self, text: &str) -> anyhow::Result<()>;
        fn on_local_clip(&self, cb: Box<dyn Fn(Clip) + Send + Sync>);
        async fn start(&self) -> anyhow::Result<()>;
        async fn stop(&self) -> anyhow::Result<()>;
    }
}
