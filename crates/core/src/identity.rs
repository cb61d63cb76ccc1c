//! 4.1 Identity store — generates and persists a device's long-lived key
//! pair, name, and last-known reachable addresses.

use chrono::{DateTime, Utc};
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ids::DeviceId;
use crate::ports::errors::IdentityError;
use crate::ports::storage::{StoragePort, KEY_LOCAL_DEVICE_IDENTITY};

/// A device's long-lived identity. Created once on first launch; mutated
/// only to update `device_name` or `multiaddrs`; never destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: DeviceId,
    pub device_name: String,
    pub public_key: Vec<u8>,
    /// Raw private key bytes. Never serialized onto the wire — only ever
    /// persisted locally through `StoragePort`, and dropped from any payload
    /// derived for transmission (see `DeviceIdentityPayload`).
    pub private_key: Vec<u8>,
    pub multiaddrs: Vec<Multiaddr>,
    pub created_at: DateTime<Utc>,
}

/// `DeviceIdentity` with the private key stripped — what actually goes out
/// on the wire (trust-request payload, pairing QR code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentityPayload {
    pub device_id: DeviceId,
    pub device_name: String,
    pub public_key: Vec<u8>,
    pub multiaddrs: Vec<Multiaddr>,
    pub created_at: DateTime<Utc>,
}

impl DeviceIdentity {
    pub fn to_payload(&self) -> DeviceIdentityPayload {
        DeviceIdentityPayload {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            public_key: self.public_key.clone(),
            multiaddrs: self.multiaddrs.clone(),
            created_at: self.created_at,
        }
    }

    /// Decodes the persisted private key back into a signing keypair, for
    /// use by anything that needs to sign on this device's behalf (the
    /// trust-request signer in the connectivity engine).
    pub fn keypair(&self) -> Result<libp2p_identity::Keypair, IdentityError> {
        libp2p_identity::Keypair::from_protobuf_encoding(&self.private_key)
            .map_err(|e| IdentityError::Corrupt(e.to_string()))
    }

    /// The deviceId-from-publicKey invariant, checked against an arbitrary
    /// payload (spec invariant 1 / TrustRequest invariant).
    pub fn payload_is_self_consistent(payload: &DeviceIdentityPayload) -> bool {
        libp2p_identity::PublicKey::try_decode_protobuf(&payload.public_key)
            .map(|pk| DeviceId::from_public_key(&pk) == payload.device_id)
            .unwrap_or(false)
    }

    fn generate(now: DateTime<Utc>) -> Self {
        let keypair = libp2p_identity::Keypair::generate_ed25519();
        let public_key = keypair.public();
        Self {
            device_id: DeviceId::from_public_key(&public_key),
            device_name: String::new(),
            public_key: public_key.encode_protobuf(),
            private_key: keypair
                .to_protobuf_encoding()
                .expect("ed25519 keypair always encodes"),
            multiaddrs: Vec::new(),
            created_at: now,
        }
    }
}

/// Operations are serialized: concurrent `get()` calls return the same
/// identity without re-creating it (spec §4.1).
pub struct IdentityStore<S: StoragePort> {
    storage: S,
    cached: Mutex<Option<DeviceIdentity>>,
}

impl<S: StoragePort> IdentityStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            cached: Mutex::new(None),
        }
    }

    /// Returns the current identity, generating and persisting one on first
    /// call.
    pub async fn get(&self) -> Result<DeviceIdentity, IdentityError> {
        let mut guard = self.cached.lock().await;
        if let Some(identity) = guard.as_ref() {
            return Ok(identity.clone());
        }

        if let Some(bytes) = self.storage.get(KEY_LOCAL_DEVICE_IDENTITY).await? {
            let identity: DeviceIdentity = serde_json::from_slice(&bytes)
                .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
            *guard = Some(identity.clone());
            return Ok(identity);
        }

        let identity = DeviceIdentity::generate(Utc::now());
        self.persist(&identity).await?;
        *guard = Some(identity.clone());
        Ok(identity)
    }

    /// Replace the cached address list, deduplicating while preserving
    /// order.
    pub async fn update_multiaddrs(&self, addrs: Vec<Multiaddr>) -> Result<(), IdentityError> {
        let mut identity = self.get().await?;
        let mut seen = std::collections::HashSet::new();
        identity.multiaddrs = addrs.into_iter().filter(|a| seen.insert(a.clone())).collect();
        self.persist(&identity).await?;
        *self.cached.lock().await = Some(identity);
        Ok(())
    }

    pub async fn set_device_name(&self, name: String) -> Result<(), IdentityError> {
        let mut identity = self.get().await?;
        identity.device_name = name;
        self.persist(&identity).await?;
        *self.cached.lock().await = Some(identity);
        Ok(())
    }

    async fn persist(&self, identity: &DeviceIdentity) -> Result<(), IdentityError> {
        let bytes = serde_json::to_vec(identity)
            .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
        self.storage.set(KEY_LOCAL_DEVICE_IDENTITY, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::storage::memory::MemoryStorage;

    #[tokio::test]
    async fn get_creates_once_and_is_stable() {
        let store = IdentityStore::new(MemoryStorage::new());
        let a = store.get().await.unwrap();
        let b = store.get().await.unwrap();
        assert_eq!(a.device_id, b.device_id);
    }

    #[tokio::test]
    async fn deviceid_is_a_function_of_public_key() {
        let store = IdentityStore::new(MemoryStorage::new());
        let identity = store.get().await.unwrap();
        assert!(DeviceIdentity::payload_is_self_consistent(&identity.to_payload()));
    }

    #[tokio::test]
    async fn survives_reload_from_storage() {
        let storage = MemoryStorage::new();
        let a = {
            let store = IdentityStore::new(storage);
            store.get().await.unwrap()
        };
        // Re-open against freshly loaded storage contents.
        let storage2 = MemoryStorage::new();
        storage2
            .set(
                KEY_LOCAL_DEVICE_IDENTITY,
                &serde_json::to_vec(&a).unwrap(),
            )
            .await
            .unwrap();
        let store2 = IdentityStore::new(storage2);
        let b = store2.get().await.unwrap();
        assert_eq!(a.device_id, b.device_id);
    }

    #[tokio::test]
    async fn update_multiaddrs_dedupes_preserving_order() {
        let store = IdentityStore::new(MemoryStorage::new());
        store.get().await.unwrap();
        let a: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let b: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        store
            .update_multiaddrs(vec![a.clone(), b.clone(), a.clone()])
            .await
            .unwrap();
        let identity = store.get().await.unwrap();
        assert_eq!(identity.multiaddrs, vec![a, b]);
    }
}
