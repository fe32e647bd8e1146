//! shardline-conn — cluster connection management for Shardline.
//!
//! Discovers storage members through the metadata service, validates the
//! cluster, and hands out backup RPC stubs over cached per-member gRPC
//! channels.
//!
//! # Architecture
//!
//! ```text
//! ConnManager
//!   ├── construction
//!   │   ├── storage must be transactional (lock resolver present)
//!   │   ├── version check against `required_version`
//!   │   ├── get_all_stores() → filtered by StoreBehavior
//!   │   ├── health check (no plausible quorum → error)
//!   │   └── Glue::domain() + storage ownership
//!   ├── backup_client()       → cached channel per member, dialed once
//!   ├── reset_backup_client() → drop + redial with linear backoff
//!   ├── member_channel_pool() → ChannelPool fanning out to one member
//!   └── close()               → channels, domain, storage, metadata
//!
//! ChannelPool
//!   └── grows lazily to capacity, then round-robins
//! ```

pub mod config;
pub mod dial;
pub mod error;
pub mod manager;
pub mod pool;
pub mod retry;
pub mod storage;
pub mod stores;
pub mod version;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("shardline.backup");
}

pub use config::ConnConfig;
pub use dial::{Dialer, GrpcChannel, GrpcDialer, Transport};
pub use error::{ConnError, ConnResult};
pub use manager::{BackupClient, ConnManager};
pub use pool::ChannelPool;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use storage::{Domain, Glue, Lock, LockResolver, Storage, StorageOwnership};
pub use stores::{ClusterHealth, StoreBehavior};
