use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("identity data corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}
