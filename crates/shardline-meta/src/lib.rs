//! shardline-meta — cluster metadata access for Shardline.
//!
//! Wraps the cluster-metadata service behind the [`MetadataClient`]
//! trait so the connection manager can discover members and resolve
//! their addresses without knowing how the metadata service is reached.
//!
//! # Architecture
//!
//! ```text
//! MetadataClient (trait)
//!   ├── get_all_members() → Vec<Member>, optionally without tombstones
//!   ├── get_member()      → Member (address lookup by ID)
//!   └── close()
//!
//! MetaClient (tonic)
//!   ├── Tries each metadata address in order, keeps the first channel
//!   └── Optional TLS from SecurityConfig
//! ```

pub mod client;
pub mod error;
pub mod member;
pub mod security;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("shardline.meta");
}

pub use client::{MetaClient, MetadataClient};
pub use error::{MetaError, MetaResult};
pub use member::{Member, MemberState, AUXILIARY_ENGINE, ENGINE_LABEL};
pub use security::SecurityConfig;
