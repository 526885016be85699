use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Chooses the node responsible for a key.
///
/// Returns `None` exactly when the key belongs to the local node (or no
/// peers are configured), in which case the group loads locally.
pub trait PeerPicker: Send + Sync {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches a value from one remote node. Transport and framing are up to
/// the implementation; the crate ships a gRPC-backed one.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    async fn get(&self, group: &str, key: &str) -> Result<Vec<u8>>;
}
