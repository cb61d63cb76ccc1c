//! PairDevice use case — drives the pairing and restore flows a host
//! application triggers directly (spec §4.8), plus the trust decisions a
//! user makes in response to an inbound `request` event (spec §4.3).

use anyhow::Result;
use tracing::info;

use clipmesh_core::ids::DeviceId;
use clipmesh_core::ports::StoragePort;
use clipmesh_net::{PairResult, PairingTarget, RestoreResult};

use crate::core::Core;

pub struct PairDevice<S: StoragePort + 'static> {
    core: Core<S>,
}

impl<S: StoragePort + 'static> PairDevice<S> {
    pub fn new(core: Core<S>) -> Self {
        Self { core }
    }

    /// Initiate pairing with a peer: direct-first, relay-fallback (spec §4.8
    /// "pair with peer").
    pub async fn pair_with_peer(&self, target: PairingTarget) -> Result<PairResult> {
        info!(peer_id = ?target.peer_id, "initiating pairing");
        Ok(self.core.connectivity.pair_with_peer(target).await?)
    }

    /// Reconnect to every previously trusted device on startup, without
    /// re-verifying signatures (spec §4.8 "restore trusted peers").
    pub async fn restore_trusted_peers(&self, topic: &str) -> Result<Vec<RestoreResult>> {
        let devices = self.core.trust.list_trusted().await?;
        info!(count = devices.len(), "restoring trusted peers");
        Ok(self.core.connectivity.restore_trusted_peers(&devices, topic).await)
    }

    /// Approve a pending trust request (spec §4.3 `approve`). The
    /// trust-protocol binder sends the positive ack once this resolves.
    pub async fn approve_trust_request(&self, device_id: &DeviceId) -> Result<()> {
        info!(%device_id, "approving trust request");
        Ok(self.core.trust.approve(device_id).await?)
    }

    /// Reject a pending trust request (spec §4.3 `reject`). The
    /// trust-protocol binder sends the negative ack once this resolves.
    pub async fn reject_trust_request(&self, device_id: &DeviceId) {
        info!(%device_id, "rejecting trust request");
        self.core.trust.reject(device_id).await;
    }

    /// Unpair an already-trusted device (spec §4.3 `remove`).
    pub async fn unpair_device(&self, device_id: &DeviceId) -> Result<()> {
        info!(%device_id, "unpairing device");
        Ok(self.core.trust.remove(device_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmesh_core::ports::storage::memory::MemoryStorage;
    use clipmesh_net::NetworkConfig;

    use crate::core::CoreBuilder;

    #[tokio::test]
    async fn restore_with_no_trusted_devices_returns_empty() {
        let core = CoreBuilder::new(MemoryStorage::new(), NetworkConfig::default())
            .build()
            .await
            .unwrap();
        let pairing = PairDevice::new(core);
        let results = pairing.restore_trusted_peers("clipmesh").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn rejecting_an_unknown_device_is_a_no_op() {
        let core = CoreBuilder::new(MemoryStorage::new(), NetworkConfig::default())
            .build()
            .await
            .unwrap();
        let pairing = PairDevice::new(core);
        pairing.reject_trust_request(&DeviceId::from("nobody")).await;
    }
}
