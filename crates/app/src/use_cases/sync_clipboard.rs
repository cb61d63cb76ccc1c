//! SyncClipboard use case — bridges the local `ClipboardPort`/`HistoryPort`
//! to the trust-gated clip messenger (spec §2 "control flow": clipboard port
//! pushes local clips -> clip messenger broadcasts -> remote clip messenger
//! receives, trust-gate checks, history store absorbs, clipboard port writes
//! back).

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use clipmesh_core::clip::{Clip, ClipMessage};
use clipmesh_core::ports::{ClipboardPort, HistoryPort, StoragePort};
use clipmesh_net::SendTarget;

use crate::core::Core;

pub struct SyncClipboard<S, C, H>
where
    S: StoragePort + 'static,
    C: ClipboardPort,
    H: HistoryPort,
{
    core: Core<S>,
    clipboard: Arc<C>,
    history: Arc<H>,
}

impl<S, C, H> SyncClipboard<S, C, H>
where
    S: StoragePort + 'static,
    C: ClipboardPort,
    H: HistoryPort,
{
    pub fn new(core: Core<S>, clipboard: Arc<C>, history: Arc<H>) -> Self {
        Self {
            core,
            clipboard,
            history,
        }
    }

    /// A clip produced locally: record it in history and broadcast it to
    /// every currently connected trusted peer (spec §4.6 `broadcast`).
    pub async fn on_local_change(&self, clip: Clip) -> Result<()> {
        info!(clip_id = %clip.id, "local clipboard changed");
        self.history
            .add(&clip, &self.core.local_identity.device_id, true)
            .await?;

        let message = ClipMessage::new(self.core.local_identity.device_id.clone(), clip, Utc::now());
        let peers = self.core.transport.connected_peers().await;
        self.core.clip_messenger.broadcast(&message, &peers).await;
        Ok(())
    }

    /// A clip message received from a trusted peer (the trust gate already
    /// ran before this is called — spec §4.6 "trust-gated variants"):
    /// record it in history and write it into the local clipboard.
    pub async fn on_remote_message(&self, message: ClipMessage) -> Result<()> {
        info!(from = %message.from, clip_id = %message.clip.id, "remote clip received");
        if self.is_duplicate(&message.clip).await? {
            debug!(clip_id = %message.clip.id, "duplicate clip, ignoring");
            return Ok(());
        }
        self.history.add(&message.clip, &message.from, false).await?;
        self.clipboard.write_text(&message.clip.content).await?;
        Ok(())
    }

    /// Sends a clip directly to one peer rather than broadcasting, e.g. a
    /// retry after a dropped connection.
    pub async fn send_to(&self, peer: libp2p_identity::PeerId, clip: Clip) -> Result<()> {
        let message = ClipMessage::new(self.core.local_identity.device_id.clone(), clip, Utc::now());
        self.core
            .clip_messenger
            .send(SendTarget::Peer(peer), &message)
            .await?;
        Ok(())
    }

    async fn is_duplicate(&self, clip: &Clip) -> Result<bool> {
        Ok(self
            .history
            .export_all()
            .await?
            .iter()
            .any(|existing| existing.id == clip.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmesh_core::ids::DeviceId;
    use clipmesh_core::ports::storage::memory::MemoryStorage;
    use clipmesh_net::NetworkConfig;
    use tokio::sync::Mutex as TokioMutex;

    use crate::core::CoreBuilder;

    struct FakeClipboard {
        written: TokioMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ClipboardPort for FakeClipboard {
        async fn read_text(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn write_text(&self, text: &str) -> Result<()> {
            self.written.lock().await.push(text.to_string());
            Ok(())
        }
        fn on_local_clip(&self, _cb: Box<dyn Fn(Clip) + Send + Sync>) {}
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeHistory {
        entries: TokioMutex<Vec<Clip>>,
    }

    #[async_trait::async_trait]
    impl HistoryPort for FakeHistory {
        async fn add(&self, clip: &Clip, _from: &DeviceId, _is_local: bool) -> Result<()> {
            self.entries.lock().await.push(clip.clone());
            Ok(())
        }
        async fn remove(&self, id: uuid::Uuid) -> Result<()> {
            self.entries.lock().await.retain(|c| c.id != id);
            Ok(())
        }
        async fn export_all(&self) -> Result<Vec<Clip>> {
            Ok(self.entries.lock().await.clone())
        }
        fn on_new(&self, _cb: Box<dyn Fn(Clip) + Send + Sync>) {}
    }

    async fn build_sync() -> SyncClipboard<MemoryStorage, FakeClipboard, FakeHistory> {
        let core = CoreBuilder::new(MemoryStorage::new(), NetworkConfig::default())
            .build()
            .await
            .unwrap();
        let clipboard = Arc::new(FakeClipboard {
            written: TokioMutex::new(Vec::new()),
        });
        let history = Arc::new(FakeHistory::default());
        SyncClipboard::new(core, clipboard, history)
    }

    #[tokio::test]
    async fn local_change_is_recorded_in_history() {
        let sync = build_sync().await;
        let clip = Clip::text("hello", sync.core.local_identity.device_id.clone(), Utc::now());
        sync.on_local_change(clip.clone()).await.unwrap();
        let all = sync.history.export_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "hello");
    }

    #[tokio::test]
    async fn duplicate_remote_clip_is_ignored() {
        let sync = build_sync().await;
        let remote_id = DeviceId::from("remote-device");
        let clip = Clip::text("hi", remote_id.clone(), Utc::now());
        let message = ClipMessage::new(remote_id.clone(), clip, Utc::now());

        sync.on_remote_message(message.clone()).await.unwrap();
        sync.on_remote_message(message).await.unwrap();

        let all = sync.history.export_all().await.unwrap();
        assert_eq!(all.len(), 1, "duplicate clip id must not be recorded twice");
        let written = sync.clipboard.written.lock().await;
        assert_eq!(written.len(), 1, "duplicate clip must not be written to the clipboard twice");
    }
}
