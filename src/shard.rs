use std::path::PathBuf;
use std::sync::RwLock;

use tracing::debug;

use crate::byteview::ByteView;
use crate::error::{Error, Result};
use crate::lru::LruCache;
use crate::persistence::WriteSequence;

const LOCK_MSG: &str = "shard lock poisoned";

/// Point-in-time counters for one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    pub keys_num: u64,
    pub current_used_bytes: u64,
    pub max_used_bytes: u64,
}

struct ShardInner {
    lru: LruCache<ByteView>,
    log: Option<WriteSequence>,
}

/// Thread-safe LRU + log pair backing one group.
///
/// Mutations append to the log before touching the LRU, so a failed append
/// leaves the cache unchanged and every cached key has a live PUT record
/// behind it (the converse does not hold; evicted keys stay in the log).
/// The write-sequence lock nests inside this shard's lock.
pub struct Shard {
    inner: RwLock<ShardInner>,
}

impl Shard {
    pub fn new(max_bytes: u64, log: Option<WriteSequence>) -> Self {
        Self {
            inner: RwLock::new(ShardInner {
                lru: LruCache::new(max_bytes, None),
                log,
            }),
        }
    }

    /// Look up a key.
    ///
    /// Takes the write half of the lock: a hit promotes the entry to most
    /// recently used, which mutates the recency list.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let mut inner = self.inner.write().expect(LOCK_MSG);
        inner.lru.get(key).cloned()
    }

    /// Insert a value, appending to the log first when persistence is
    /// enabled. A rejected oversized entry is not an error; the next `get`
    /// simply misses.
    pub fn add(&self, key: &str, value: ByteView) -> Result<()> {
        let mut inner = self.inner.write().expect(LOCK_MSG);
        if let Some(log) = &inner.log {
            log.put(key, value.as_slice())?;
        }
        inner.lru.add(key, value);
        Ok(())
    }

    /// Remove a key, tombstoning it in the log first.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().expect(LOCK_MSG);
        if let Some(log) = &inner.log {
            log.delete(key)?;
        }
        inner.lru.remove(key);
        Ok(())
    }

    /// Compact the log, then copy it to a timestamped backup file.
    pub fn backup(&self) -> Result<PathBuf> {
        let inner = self.inner.write().expect(LOCK_MSG);
        let log = inner.log.as_ref().ok_or(Error::PersistenceDisabled)?;
        log.merge()?;
        log.backup(None)
    }

    /// Populate the LRU from every key live in the log index. Used when a
    /// group is constructed over an existing (or seeded) log.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.inner.write().expect(LOCK_MSG);
        let hydrated = {
            let Some(log) = &inner.log else {
                return Err(Error::PersistenceDisabled);
            };
            let mut hydrated = Vec::new();
            for key in log.keys() {
                let value = log.get(&key)?;
                hydrated.push((key, ByteView::from(value)));
            }
            hydrated
        };
        for (key, value) in hydrated {
            inner.lru.add(&key, value);
        }
        debug!(keys = inner.lru.len(), "hydrated cache from log");
        Ok(())
    }

    pub fn info(&self) -> CacheInfo {
        let inner = self.inner.read().expect(LOCK_MSG);
        CacheInfo {
            keys_num: inner.lru.len() as u64,
            current_used_bytes: inner.lru.used_bytes(),
            max_used_bytes: inner.lru.max_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_then_get_without_persistence() {
        let shard = Shard::new(0, None);
        shard.add("k", ByteView::from("v")).unwrap();
        assert_eq!(shard.get("k"), Some(ByteView::from("v")));
        assert_eq!(shard.get("missing"), None);

        let info = shard.info();
        assert_eq!(info.keys_num, 1);
        assert_eq!(info.current_used_bytes, 2);
        assert_eq!(info.max_used_bytes, 0);
    }

    #[test]
    fn mutations_reach_the_log_first() {
        let dir = TempDir::new().unwrap();
        let log = WriteSequence::open(dir.path(), None).unwrap();
        let shard = Shard::new(0, Some(log));

        shard.add("k", ByteView::from("v")).unwrap();
        shard.delete("k").unwrap();
        assert_eq!(shard.get("k"), None);

        // A fresh replay of the same directory sees the tombstone.
        let replayed = WriteSequence::open(dir.path(), None).unwrap();
        assert!(!replayed.contains("k"));
    }

    #[test]
    fn init_hydrates_from_existing_log() {
        let dir = TempDir::new().unwrap();
        let log = WriteSequence::open(dir.path(), None).unwrap();
        log.put("a", b"1").unwrap();
        log.put("b", b"2").unwrap();
        log.delete("a").unwrap();

        let shard = Shard::new(0, Some(log));
        shard.init().unwrap();
        assert_eq!(shard.get("a"), None);
        assert_eq!(shard.get("b"), Some(ByteView::from("2")));
    }

    #[test]
    fn backup_requires_persistence() {
        let shard = Shard::new(0, None);
        assert!(matches!(
            shard.backup().unwrap_err(),
            Error::PersistenceDisabled
        ));
    }
}
