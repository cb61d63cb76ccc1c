//! StartApp use case — builds the `Core` aggregate, wires the clipboard and
//! history ports to clip sync, restores previously trusted peers, and hands
//! back the running handles a host application drives (spec §9, §4.8
//! "restore trusted peers on startup").

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use clipmesh_core::clip::ClipMessage;
use clipmesh_core::ports::{ClipboardPort, HistoryPort, StoragePort};
use clipmesh_net::NetworkConfig;

use crate::core::{Core, CoreBuilder};
use crate::use_cases::pairing::PairDevice;
use crate::use_cases::sync_clipboard::SyncClipboard;

/// Everything a host application needs after startup completes: the shared
/// `Core`, the pairing use case, and the running clip-sync wiring.
pub struct AppHandle<S, C, H>
where
    S: StoragePort + 'static,
    C: ClipboardPort + 'static,
    H: HistoryPort + 'static,
{
    pub core: Core<S>,
    pub pairing: PairDevice<S>,
    pub sync: Arc<SyncClipboard<S, C, H>>,
}

pub struct StartApp<S, C, H>
where
    S: StoragePort + 'static,
    C: ClipboardPort + 'static,
    H: HistoryPort + 'static,
{
    storage: S,
    clipboard: Arc<C>,
    history: Arc<H>,
    config: NetworkConfig,
    rendezvous_topic: String,
}

impl<S, C, H> StartApp<S, C, H>
where
    S: StoragePort + 'static,
    C: ClipboardPort + 'static,
    H: HistoryPort + 'static,
{
    pub fn new(storage: S, clipboard: Arc<C>, history: Arc<H>, config: NetworkConfig, rendezvous_topic: String) -> Self {
        Self {
            storage,
            clipboard,
            history,
            config,
            rendezvous_topic,
        }
    }

    /// Runs the startup sequence: build `Core`, wire local clipboard changes
    /// to the clip messenger, wire inbound clip messages to history/
    /// clipboard, start clipboard monitoring, then restore trusted peers.
    pub async fn execute(self) -> Result<AppHandle<S, C, H>> {
        info!("starting application");

        let core = CoreBuilder::new(self.storage, self.config).build().await?;
        let pairing = PairDevice::new(core.clone());
        let sync = Arc::new(SyncClipboard::new(core.clone(), Arc::clone(&self.clipboard), Arc::clone(&self.history)));

        let sync_for_local = Arc::clone(&sync);
        self.clipboard.on_local_clip(Box::new(move |clip| {
            let sync = Arc::clone(&sync_for_local);
            tokio::spawn(async move {
                if let Err(err) = sync.on_local_change(clip).await {
                    warn!(%err, "failed to handle local clipboard change");
                }
            });
        }));
        self.clipboard.start().await?;
        info!("clipboard monitoring started");

        let sync_for_remote = Arc::clone(&sync);
        core.clip_messenger
            .on_message(
                |msg: &ClipMessage| msg.from.clone(),
                Arc::new(move |_device_id, msg: ClipMessage| {
                    let sync = Arc::clone(&sync_for_remote);
                    tokio::spawn(async move {
                        if let Err(err) = sync.on_remote_message(msg).await {
                            warn!(%err, "failed to handle remote clip message");
                        }
                    });
                }),
            )
            .await;

        let restored = pairing.restore_trusted_peers(&self.rendezvous_topic).await?;
        let reconnected = restored.iter().filter(|r| r.connected).count();
        info!(total = restored.len(), reconnected, "restored trusted peers");

        Ok(AppHandle { core, pairing, sync })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmesh_core::clip::Clip;
    use clipmesh_core::ids::DeviceId;
    use clipmesh_core::ports::storage::memory::MemoryStorage;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct NoopClipboard;

    #[async_trait::async_trait]
    impl ClipboardPort for NoopClipboard {
        async fn read_text(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn write_text(&self, _text: &str) -> Result<()> {
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
    struct NoopHistory {
        entries: TokioMutex<Vec<Clip>>,
    }

    #[async_trait::async_trait]
    impl HistoryPort for NoopHistory {
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

    #[tokio::test]
    async fn starting_with_fresh_storage_restores_nothing() {
        let app = StartApp::new(
            MemoryStorage::new(),
            Arc::new(NoopClipboard),
            Arc::new(NoopHistory::default()),
            NetworkConfig::default(),
            "clipmesh".to_string(),
        );
        let handle = app.execute().await.unwrap();
        assert_eq!(
            handle.core.local_identity.device_id,
            handle.core.identity.get().await.unwrap().device_id
        );
    }
}
