//! A distributed in-memory key/value cache with append-only persistence.
//!
//! The keyspace is partitioned across a fixed peer set with consistent
//! hashing. Each node serves named [`Group`]s backed by a byte-bounded LRU
//! and, optionally, an append-only log that supports replay on startup,
//! compaction, and point-in-time backups. Concurrent misses for one key
//! are coalesced into a single upstream load.

pub mod byteview;
pub mod client;
pub mod error;
pub mod group;
pub mod lru;
pub mod peers;
pub mod persistence;
pub mod ring;
pub mod server;
pub mod shard;
pub mod singleflight;

pub mod proto {
    tonic::include_proto!("cachepb");
}

pub use byteview::ByteView;
pub use client::{PeerClient, RpcPool, DEFAULT_REPLICAS};
pub use error::{Error, Result};
pub use group::{get_group, new_group, FnLoader, Group, GroupConfig, Loader};
pub use peers::{PeerGetter, PeerPicker};
pub use server::NodeServer;
pub use shard::CacheInfo;
