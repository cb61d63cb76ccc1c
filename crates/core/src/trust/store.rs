//! 4.2 Trust store — persists the set of trusted devices.

use chrono::{DateTime, Utc};
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::ids::DeviceId;
use crate::ports::errors::TrustError;
use crate::ports::storage::{StoragePort, KEY_TRUSTED_DEVICES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub device_id: DeviceId,
    pub device_name: String,
    pub public_key: Vec<u8>,
    pub multiaddrs: Vec<Multiaddr>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl TrustedDevice {
    /// Merge non-empty fields from `other` into `self` and refresh
    /// `last_seen` — the upsert-on-existing semantics from spec §4.2.
    fn merge_from(&mut self, other: &TrustedDevice) {
        if !other.device_name.is_empty() {
            self.device_name = other.device_name.clone();
        }
        if !other.multiaddrs.is_empty() {
            self.multiaddrs = other.multiaddrs.clone();
        }
        self.last_seen = other.last_seen;
    }
}

/// Persistence through `StoragePort` under a single key holding the full
/// list (spec §4.2).
pub struct TrustStore<S: StoragePort> {
    storage: S,
    cached: RwLock<Option<Vec<TrustedDevice>>>,
}

impl<S: StoragePort> TrustStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            cached: RwLock::new(None),
        }
    }

    async fn load(&self) -> Result<Vec<TrustedDevice>, TrustError> {
        if let Some(devices) = self.cached.read().await.as_ref() {
            return Ok(devices.clone());
        }
        let devices = match self.storage.get(KEY_TRUSTED_DEVICES).await? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            None => Vec::new(),
        };
        *self.cached.write().await = Some(devices.clone());
        Ok(devices)
    }

    async fn save(&self, devices: Vec<TrustedDevice>) -> Result<(), TrustError> {
        let bytes = serde_json::to_vec(&devices).unwrap_or_default();
        self.storage.set(KEY_TRUSTED_DEVICES, &bytes).await?;
        *self.cached.write().await = Some(devices);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<TrustedDevice>, TrustError> {
        self.load().await
    }

    pub async fn get(&self, id: &DeviceId) -> Result<Option<TrustedDevice>, TrustError> {
        Ok(self.load().await?.into_iter().find(|d| &d.device_id == id))
    }

    pub async fn is_trusted(&self, id: &DeviceId) -> Result<bool, TrustError> {
        Ok(self.get(id).await?.is_some())
    }

    /// Insert by `deviceId` if absent, otherwise merge non-empty fields and
    /// refresh `lastSeen`.
    pub async fn upsert(&self, device: TrustedDevice) -> Result<(), TrustError> {
        let mut devices = self.load().await?;
        match devices.iter_mut().find(|d| d.device_id == device.device_id) {
            Some(existing) => existing.merge_from(&device),
            None => devices.push(device),
        }
        self.save(devices).await
    }

    pub async fn remove(&self, id: &DeviceId) -> Result<(), TrustError> {
        let mut devices = self.load().await?;
        devices.retain(|d| &d.device_id != id);
        self.save(devices).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::storage::memory::MemoryStorage;

    fn device(id: &str, name: &str) -> TrustedDevice {
        let now = Utc::now();
        TrustedDevice {
            device_id: DeviceId::from(id),
            device_name: name.to_string(),
            public_key: vec![1, 2, 3],
            multiaddrs: Vec::new(),
            created_at: now,
            last_seen: now,
        }
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let store = TrustStore::new(MemoryStorage::new());
        let d = device("dev-a", "laptop");
        store.upsert(d.clone()).await.unwrap();
        store.upsert(d).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_merges_nonempty_fields_on_existing() {
        let store = TrustStore::new(MemoryStorage::new());
        store.upsert(device("dev-a", "laptop")).await.unwrap();
        let mut update = device("dev-a", "");
        update.device_name = String::new();
        store.upsert(update).await.unwrap();
        let stored = store.get(&DeviceId::from("dev-a")).await.unwrap().unwrap();
        assert_eq!(stored.device_name, "laptop");
    }

    #[tokio::test]
    async fn remove_deletes_the_device() {
        let store = TrustStore::new(MemoryStorage::new());
        store.upsert(device("dev-a", "laptop")).await.unwrap();
        store.remove(&DeviceId::from("dev-a")).await.unwrap();
        assert!(!store.is_trusted(&DeviceId::from("dev-a")).await.unwrap());
    }

    #[tokio::test]
    async fn no_duplicates_by_device_id() {
        let store = TrustStore::new(MemoryStorage::new());
        store.upsert(device("dev-a", "laptop")).await.unwrap();
        store.upsert(device("dev-a", "phone")).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].device_name, "phone");
    }
}
