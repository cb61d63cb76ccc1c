//! `HistoryPort` — the clip history store.
//!
//! Out of scope as an implementation (external collaborator); only the
//! contract the core consumes is defined here.

use async_trait::async_trait;
use uuid::Uuid;

use crate::clip::Clip;
use crate::ids::DeviceId;

#[async_trait]
pub trait HistoryPort: Send + Sync {
    async fn add(&self, clip: &Clip, from_device_id: &DeviceId, is_local: bool)
        -> anyhow::Result<()>;
    async fn remove(&self, id: Uuid) -> anyhow::Result<()>;
    async fn export_all(&self) -> anyhow::Result<Vec<Clip>>;

    /// Register a callback invoked whenever an entry is added.
    fn on_new(&self, cb: Box<dyn Fn(Clip) + Send + Sync>);
}

#[cfg(test)]
mockall::mock! {
    pub History {}

    #[async_trait]
    impl HistoryPort for History {
        async fn add(&self, clip: &Clip, from_device_id: &DeviceId, is_local: bool) -> anyhow::Result<()>;
        async fn remove(&self, id: Uuid) -> anyhow::Result<()>;
        async fn export_all(&self) -> anyhow::Result<Vec<Clip>>;
        fn on_new(&self, cb: Box<dyn Fn(Clip) + Send + Sync>);
    }
}
