//! Collaborators the manager is handed by its embedder.
//!
//! The manager never looks inside these. It only checks that the storage
//! is transactional, asks the glue for a domain, and tears everything
//! down in order on close.

use std::sync::Arc;
use std::time::Duration;

/// A lock left behind by an unfinished transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub key: Vec<u8>,
    pub primary: Vec<u8>,
    pub start_ts: u64,
    pub ttl_ms: u64,
}

/// Resolves locks encountered while reading.
#[tonic::async_trait]
pub trait LockResolver: Send + Sync {
    /// Try to resolve `locks` on behalf of a reader started at
    /// `caller_start_ts`. Returns how long the caller should wait before
    /// retrying; zero means every lock was resolved.
    async fn resolve_locks(&self, caller_start_ts: u64, locks: Vec<Lock>)
    -> anyhow::Result<Duration>;
}

/// Key-value storage handle.
#[tonic::async_trait]
pub trait Storage: Send + Sync {
    /// The transactional layer, if this is a transactional store.
    fn lock_resolver(&self) -> Option<Arc<dyn LockResolver>>;

    /// Mark the store as shutting down so background work can stop early.
    fn set_shutting_down(&self);

    async fn close(&self) -> anyhow::Result<()>;
}

/// Schema/session domain layered on top of a storage handle.
#[tonic::async_trait]
pub trait Domain: Send + Sync {
    async fn close(&self);
}

/// Glue between the manager and the embedding process.
#[tonic::async_trait]
pub trait Glue: Send + Sync {
    /// Resolve the domain for `storage`. `None` when the embedder runs
    /// without one.
    async fn domain(&self, storage: &Arc<dyn Storage>) -> anyhow::Result<Option<Arc<dyn Domain>>>;

    /// Whether closing the manager should also close the domain and the
    /// storage.
    fn owns_storage(&self) -> bool;
}

/// Who is responsible for closing the storage and domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOwnership {
    OwnedByManager,
    BorrowedFromCaller,
}

impl StorageOwnership {
    pub fn from_glue(glue: &dyn Glue) -> Self {
        if glue.owns_storage() {
            StorageOwnership::OwnedByManager
        } else {
            StorageOwnership::BorrowedFromCaller
        }
    }

    pub fn is_owned(self) -> bool {
        self == StorageOwnership::OwnedByManager
    }
}
