//! Named cache namespaces and the read/miss/load pipeline.
//!
//! A [`Group`] owns one shard, one single-flight coordinator, an optional
//! peer picker, and the caller's source-of-truth loader. Groups register
//! themselves in a process-wide registry at construction and live for the
//! life of the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::byteview::ByteView;
use crate::error::{Error, Result};
use crate::peers::{PeerGetter, PeerPicker};
use crate::persistence::WriteSequence;
use crate::shard::{CacheInfo, Shard};
use crate::singleflight::Flight;

/// Source of truth consulted on a local cache miss.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, key: &str) -> Result<Vec<u8>>;
}

/// Adapter turning a plain function into a [`Loader`].
pub struct FnLoader<F>(pub F);

#[async_trait]
impl<F> Loader for FnLoader<F>
where
    F: Fn(&str) -> Result<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        (self.0)(key)
    }
}

/// Construction parameters for [`new_group`].
///
/// Persistence is enabled when `persistence_dir` is set; the group's data
/// lives under `<persistence_dir>/<name>/`. A `seed_file` bootstraps the
/// log from an earlier backup and hydrates the cache from it.
#[derive(Debug, Default)]
pub struct GroupConfig {
    pub name: String,
    pub cache_bytes: u64,
    pub persistence_dir: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
}

/// A named cache namespace on this node.
pub struct Group {
    name: String,
    loader: Box<dyn Loader>,
    shard: Shard,
    flight: Flight<Result<ByteView>>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("name", &self.name).finish()
    }
}

static GROUPS: OnceLock<RwLock<HashMap<String, Arc<Group>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, Arc<Group>>> {
    GROUPS.get_or_init(Default::default)
}

/// Create a group and register it under its name.
pub fn new_group(config: GroupConfig, loader: impl Loader + 'static) -> Result<Arc<Group>> {
    if config.name.is_empty() {
        return Err(Error::EmptyGroupName);
    }
    let log = match &config.persistence_dir {
        Some(root) => Some(WriteSequence::open(
            root.join(&config.name),
            config.seed_file.as_deref(),
        )?),
        None => None,
    };
    let group = Arc::new(Group {
        name: config.name.clone(),
        loader: Box::new(loader),
        shard: Shard::new(config.cache_bytes, log),
        flight: Flight::new(),
        peers: OnceLock::new(),
    });
    if config.seed_file.is_some() {
        group.shard.init()?;
    }
    registry()
        .write()
        .expect("group registry lock poisoned")
        .insert(config.name, group.clone());
    Ok(group)
}

/// Look up a previously created group.
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    registry()
        .read()
        .expect("group registry lock poisoned")
        .get(name)
        .cloned()
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire up peer routing. May be called at most once per group.
    pub fn register_peers(&self, picker: Arc<dyn PeerPicker>) -> Result<()> {
        self.peers
            .set(picker)
            .map_err(|_| Error::PickerAlreadyRegistered)
    }

    /// Fetch a value: shard hit, else coalesced load (remote peer or local
    /// source).
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if let Some(value) = self.shard.get(key) {
            debug!(group = %self.name, %key, "cache hit");
            return Ok(value);
        }
        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        self.flight
            .run(key, || async {
                if let Some(picker) = self.peers.get() {
                    if let Some(peer) = picker.pick_peer(key) {
                        match self.load_from_peer(peer.as_ref(), key).await {
                            Ok(value) => return Ok(value),
                            Err(e) => {
                                warn!(group = %self.name, %key, error = %e,
                                    "remote load failed, falling back to local source");
                            }
                        }
                    }
                }
                self.load_locally(key).await
            })
            .await
    }

    async fn load_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        let bytes = peer.get(&self.name, key).await?;
        Ok(ByteView::from(bytes))
    }

    async fn load_locally(&self, key: &str) -> Result<ByteView> {
        let bytes = self.loader.load(key).await?;
        let value = ByteView::from(bytes);
        self.shard.add(key, value.clone())?;
        Ok(value)
    }

    /// Remove a key from this node's shard (and its log).
    pub fn delete(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.shard.delete(key)
    }

    /// Merge the log and write a timestamped backup; returns its path.
    pub fn backup(&self) -> Result<PathBuf> {
        self.shard.backup()
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.shard.info()
    }
}
