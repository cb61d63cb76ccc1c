//! The `Core` aggregate (spec §9 "Global node and module-level singletons:
//! lift into a Core aggregate constructed at startup, passed by shared
//! reference") and its builder.
//!
//! Startup order is fixed: Storage → Identity → Trust → Transport →
//! Messengers → Binder → ConnectivityEngine (spec §9). `CoreBuilder` runs
//! exactly that sequence in `build()`, following the teacher's
//! `AppBuilder`/`.build() -> Result<App, _>` shape rather than a bare
//! constructor, so a caller that gets a `Core` back knows every stage
//! actually completed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use clipmesh_core::history_sync::HistorySyncMessage;
use clipmesh_core::identity::{DeviceIdentity, IdentityStore};
use clipmesh_core::ids::DeviceId;
use clipmesh_core::ports::errors::IdentityError;
use clipmesh_core::ports::StoragePort;
use clipmesh_core::trust::store::TrustStore;
use clipmesh_core::trust::TrustManager;
use clipmesh_core::ClipMessage;
use clipmesh_net::binder::{BinderHandles, TrustProtocolBinder, TrustRequestOrAck};
use clipmesh_net::connectivity::ConnectivityEngine;
use clipmesh_net::messenger::{Messenger, TrustGated};
use clipmesh_net::protocol_ids::{CLIP_PROTOCOL, HISTORY_PROTOCOL, TRUST_PROTOCOL};
use clipmesh_net::rendezvous::RendezvousClient;
use clipmesh_net::transport::MessagingTransport;
use clipmesh_net::NetworkConfig;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to load or create the local device identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("failed to initialize the messaging transport: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("failed to register the {protocol} protocol messenger: {source}")]
    Messenger {
        protocol: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Everything a running agent needs, wired together in the fixed startup
/// order spec §9 names. Every field is itself an `Arc` or an `Arc`-backed
/// handle, so `Core` is cheap to clone for handing to multiple use cases —
/// implemented by hand rather than derived, since `S` never needs to be
/// `Clone` itself (it only ever appears behind an `Arc`).
pub struct Core<S: StoragePort + 'static> {
    pub local_identity: DeviceIdentity,
    pub identity: Arc<IdentityStore<Arc<S>>>,
    pub trust: Arc<TrustManager<Arc<S>>>,
    pub transport: MessagingTransport,
    pub trust_messenger: Messenger<TrustRequestOrAck>,
    pub clip_messenger: TrustGated<ClipMessage>,
    pub history_messenger: TrustGated<HistorySyncMessage>,
    pub rendezvous: Arc<RendezvousClient>,
    pub connectivity: Arc<ConnectivityEngine<Arc<S>>>,
    pub config: NetworkConfig,
    binder_handles: Arc<BinderHandles>,
}

impl<S: StoragePort + 'static> Clone for Core<S> {
    fn clone(&self) -> Self {
        Self {
            local_identity: self.local_identity.clone(),
            identity: Arc::clone(&self.identity),
            trust: Arc::clone(&self.trust),
            transport: self.transport.clone(),
            trust_messenger: self.trust_messenger.clone(),
            clip_messenger: self.clip_messenger.clone(),
            history_messenger: self.history_messenger.clone(),
            rendezvous: Arc::clone(&self.rendezvous),
            connectivity: Arc::clone(&self.connectivity),
            config: self.config.clone(),
            binder_handles: Arc::clone(&self.binder_handles),
        }
    }
}

pub struct CoreBuilder<S: StoragePort + 'static> {
    storage: Arc<S>,
    config: NetworkConfig,
}

impl<S: StoragePort + 'static> CoreBuilder<S> {
    pub fn new(storage: S, config: NetworkConfig) -> Self {
        Self {
            storage: Arc::new(storage),
            config,
        }
    }

    /// Runs Storage → Identity → Trust → Transport → Messengers → Binder →
    /// ConnectivityEngine in order, failing fast with the stage that broke.
    pub async fn build(self) -> Result<Core<S>, BuildError> {
        // Every sub-store below is parameterized over `Arc<S>` (not bare
        // `S`), since `self.storage` is already shared and each of
        // `IdentityStore`/`TrustStore` needs its own clone of the handle.
        // Storage -> Identity.
        let identity = Arc::new(IdentityStore::new(Arc::clone(&self.storage)));
        let local_identity = identity.get().await?;

        // Identity -> Trust.
        let trust_store = Arc::new(TrustStore::new(Arc::clone(&self.storage)));
        let trust = TrustManager::new(
            trust_store,
            local_identity.device_id.clone(),
            self.config.pending_expiry,
        );

        // Trust -> Transport.
        let keypair = local_identity.keypair()?;
        let transport = MessagingTransport::new(keypair).map_err(BuildError::Transport)?;

        // Transport -> Messengers.
        let trust_messenger = Messenger::<TrustRequestOrAck>::register(TRUST_PROTOCOL, transport.clone())
            .await
            .map_err(|source| BuildError::Messenger {
                protocol: "trust",
                source,
            })?;
        let clip_inner = Messenger::<ClipMessage>::register(CLIP_PROTOCOL, transport.clone())
            .await
            .map_err(|source| BuildError::Messenger {
                protocol: "clip",
                source,
            })?;
        let history_inner = Messenger::<HistorySyncMessage>::register(HISTORY_PROTOCOL, transport.clone())
            .await
            .map_err(|source| BuildError::Messenger {
                protocol: "history",
                source,
            })?;

        // Clip and history are trust-gated (spec §4.6); trust itself is not.
        let clip_messenger = TrustGated::new(clip_inner, is_trusted_predicate(Arc::clone(&trust)));
        let history_messenger = TrustGated::new(history_inner, is_trusted_predicate(Arc::clone(&trust)));

        // Messengers -> Binder.
        let binder = TrustProtocolBinder::new(
            trust_messenger.clone(),
            Arc::clone(&trust),
            Arc::clone(&identity),
        );
        let binder_handles = binder.spawn().await;

        // Binder -> ConnectivityEngine.
        let rendezvous = Arc::new(RendezvousClient::new(transport.clone()));
        let connectivity = ConnectivityEngine::new(
            transport.clone(),
            trust_messenger.clone(),
            Arc::clone(&identity),
            Arc::clone(&rendezvous),
            self.config.clone(),
        )
        .await;

        Ok(Core {
            local_identity,
            identity,
            trust,
            transport,
            trust_messenger,
            clip_messenger,
            history_messenger,
            rendezvous,
            connectivity,
            config: self.config,
            binder_handles: Arc::new(binder_handles),
        })
    }
}

fn is_trusted_predicate<S: StoragePort + 'static>(
    trust: Arc<TrustManager<Arc<S>>>,
) -> Arc<dyn Fn(DeviceId) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync> {
    Arc::new(move |device_id: DeviceId| {
        let trust = Arc::clone(&trust);
        Box::pin(async move { trust.is_trusted(&device_id).await.unwrap_or(false) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmesh_core::ports::storage::memory::MemoryStorage;

    #[tokio::test]
    async fn builds_a_core_from_fresh_storage() {
        let core = CoreBuilder::new(MemoryStorage::new(), NetworkConfig::default())
            .build()
            .await
            .unwrap();
        assert_eq!(
            core.local_identity.device_id,
            core.identity.get().await.unwrap().device_id
        );
    }

    #[tokio::test]
    async fn local_device_is_not_self_trusted_by_default() {
        let core = CoreBuilder::new(MemoryStorage::new(), NetworkConfig::default())
            .build()
            .await
            .unwrap();
        assert!(!core
            .trust
            .is_trusted(&core.local_identity.device_id)
            .await
            .unwrap());
    }
}
