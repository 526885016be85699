use std::collections::HashMap;

/// Hash function used to place keys and virtual nodes on the ring.
pub type HashFn = fn(&[u8]) -> u32;

/// Consistent-hash ring mapping keys to peer addresses.
///
/// Each peer is expanded into `replicas` virtual nodes to even out the
/// distribution. The ring is built once at startup and read-only
/// afterwards; mutation requires external exclusion.
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    ring: Vec<u32>,
    nodes: HashMap<u32, String>,
}

impl HashRing {
    /// `hash` defaults to CRC32 (IEEE polynomial) when not supplied.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        assert!(replicas >= 1, "at least one virtual node per peer");
        Self {
            replicas,
            hash: hash.unwrap_or(crc32fast::hash),
            ring: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    /// Place peers on the ring.
    ///
    /// Virtual node `i` of peer `P` hashes the string `"{i}{P}"`. Hash
    /// collisions overwrite the previous assignment and are treated as
    /// benign.
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for peer in peers {
            let peer = peer.into();
            for i in 0..self.replicas {
                let hash = (self.hash)(format!("{i}{peer}").as_bytes());
                self.ring.push(hash);
                self.nodes.insert(hash, peer.clone());
            }
        }
        self.ring.sort_unstable();
    }

    /// Map a key to its owning peer, or `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = (self.hash)(key.as_bytes());
        let idx = self.ring.partition_point(|&placed| placed < hash) % self.ring.len();
        self.nodes.get(&self.ring[idx]).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
