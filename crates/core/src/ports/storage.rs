//! `StoragePort` — platform key/value persistence.
//!
//! Out of scope per the spec as an implementation (it is an external
//! collaborator); this module defines only the contract the core consumes.
//! Well-known keys: `localDeviceIdentity`, `trustedDevices`, `pinnedIds`.

use async_trait::async_trait;

use super::errors::StorageError;

pub const KEY_LOCAL_DEVICE_IDENTITY: &str = "localDeviceIdentity";
pub const KEY_TRUSTED_DEVICES: &str = "trustedDevices";
pub const KEY_PINNED_IDS: &str = "pinnedIds";

#[async_trait]
pub trait StoragePort: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// `IdentityStore` and `TrustStore` each take `S: StoragePort` by value, so
/// sharing one backing store between them (spec §3 "singletons guarded by
/// an internal mutex") means instantiating both over `Arc<dyn StoragePort>`
/// or a concrete `Arc<S>` — this blanket impl makes either work.
#[async_trait]
impl<T: StoragePort + ?Sized> StoragePort for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).set(key, bytes).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key).await
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// In-memory `StoragePort`, for this crate's own tests and as a smoke-test
    /// fixture for downstream adapters. Not a production persistence layer.
    #[derive(Default)]
    pub struct MemoryStorage {
        data: RwLock<HashMap<String, Vec<u8>>>,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StoragePort for MemoryStorage {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.data.read().await.get(key).cloned())
        }

        async fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
            self.data
                .write()
                .await
                .insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.data.write().await.remove(key);
            Ok(())
        }
    }
}

#[cfg(test)]
mockall::mock! {
    pub Storage {}

    #[async_trait]
    impl StoragePort for Storage {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
        async fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
        async fn remove(&self, key: &str) -> Result<(), StorageError>;
    }
}
