use std::collections::HashMap;

/// Values stored in the cache report their own size so eviction can be
/// accounted in bytes rather than entry counts.
pub trait Measured {
    fn byte_len(&self) -> u64;
}

/// Called after an entry has been evicted or removed; the cache is already
/// in its post-removal state when this runs.
pub type EvictionCallback<V> = Box<dyn Fn(&str, &V) + Send + Sync>;

const NIL: usize = usize::MAX;

struct Node<V> {
    key: String,
    value: V,
    prev: usize,
    next: usize,
}

/// A byte-bounded LRU cache.
///
/// The recency order is a doubly-linked list threaded through a slot arena,
/// with a key → slot index map alongside it. List and map are always
/// mutated together; the enclosing shard lock serializes access. `head` is
/// the most recently used entry, `tail` the next eviction candidate.
///
/// A `max_bytes` of 0 means unbounded.
pub struct LruCache<V> {
    max_bytes: u64,
    used_bytes: u64,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    map: HashMap<String, usize>,
    on_evict: Option<EvictionCallback<V>>,
}

impl<V: Measured> LruCache<V> {
    pub fn new(max_bytes: u64, on_evict: Option<EvictionCallback<V>>) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            map: HashMap::new(),
            on_evict,
        }
    }

    /// Look up a key, promoting it to most recently used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Insert or refresh an entry.
    ///
    /// Returns `false` when the entry alone would exceed `max_bytes`.
    /// Refreshing an existing key promotes it to most recently used whether
    /// or not the value changed. After insertion the cache evicts from the
    /// back until it is within budget again.
    pub fn add(&mut self, key: &str, value: V) -> bool {
        let new_len = value.byte_len();
        if self.max_bytes > 0 && key.len() as u64 + new_len > self.max_bytes {
            return false;
        }
        if let Some(&idx) = self.map.get(key) {
            self.move_to_front(idx);
            let node = self.slots[idx].as_mut().expect("indexed slot is occupied");
            let old_len = node.value.byte_len();
            node.value = value;
            self.used_bytes = self.used_bytes - old_len + new_len;
        } else {
            let idx = self.insert_slot(Node {
                key: key.to_owned(),
                value,
                prev: NIL,
                next: NIL,
            });
            self.attach_front(idx);
            self.map.insert(key.to_owned(), idx);
            self.used_bytes += key.len() as u64 + new_len;
        }
        while self.max_bytes > 0 && self.used_bytes > self.max_bytes {
            self.remove_oldest();
        }
        true
    }

    /// Drop a key if present.
    pub fn remove(&mut self, key: &str) {
        if let Some(idx) = self.map.remove(key) {
            self.evict_slot(idx);
        }
    }

    /// Evict the least recently used entry, if any.
    pub fn remove_oldest(&mut self) {
        if self.tail != NIL {
            self.evict_slot(self.tail);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn evict_slot(&mut self, idx: usize) {
        self.detach(idx);
        self.free.push(idx);
        let node = self.slots[idx].take().expect("indexed slot is occupied");
        self.map.remove(&node.key);
        self.used_bytes -= node.key.len() as u64 + node.value.byte_len();
        if let Some(on_evict) = &self.on_evict {
            on_evict(&node.key, &node.value);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head != idx {
            self.detach(idx);
            self.attach_front(idx);
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.slots[idx].as_ref().expect("indexed slot is occupied");
            (node.prev, node.next)
        };
        match prev {
            NIL => self.head = next,
            _ => self.slots[prev].as_mut().expect("linked slot is occupied").next = next,
        }
        match next {
            NIL => self.tail = prev,
            _ => self.slots[next].as_mut().expect("linked slot is occupied").prev = prev,
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.slots[idx].as_mut().expect("indexed slot is occupied");
            node.prev = NIL;
            node.next = old_head;
        }
        match old_head {
            NIL => self.tail = idx,
            _ => self.slots[old_head].as_mut().expect("linked slot is occupied").prev = idx,
        }
        self.head = idx;
    }

    fn insert_slot(&mut self, node: Node<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    impl Measured for String {
        fn byte_len(&self) -> u64 {
            self.len() as u64
        }
    }

    #[test]
    fn get_promotes_to_front() {
        let mut cache = LruCache::new(0, None);
        assert!(cache.add("a", "1".to_string()));
        assert!(cache.add("b", "2".to_string()));
        assert_eq!(cache.get("a"), Some(&"1".to_string()));

        // "b" is now the oldest entry.
        cache.remove_oldest();
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(&"1".to_string()));
    }

    #[test]
    fn eviction_chain_on_overflow() {
        // Adding 4B + 5B + 6B into a 10B budget forces both earlier
        // entries out before the cache fits again.
        let mut cache = LruCache::new(10, None);
        assert!(cache.add("aaa", "1".to_string()));
        assert!(cache.add("bbb", "22".to_string()));
        assert!(cache.add("ccc", "333".to_string()));

        assert_eq!(cache.get("aaa"), None);
        assert_eq!(cache.get("bbb"), None);
        assert_eq!(cache.get("ccc"), Some(&"333".to_string()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 6);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let mut cache = LruCache::new(4, None);
        assert!(!cache.add("key", "long value".to_string()));
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn refresh_updates_accounting_and_recency() {
        let mut cache = LruCache::new(0, None);
        assert!(cache.add("a", "1".to_string()));
        assert!(cache.add("b", "2".to_string()));
        assert!(cache.add("a", "larger".to_string()));
        assert_eq!(cache.used_bytes(), 1 + 6 + 1 + 1);
        assert_eq!(cache.get("a"), Some(&"larger".to_string()));

        // "a" was refreshed, so "b" evicts first.
        cache.remove_oldest();
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn byte_accounting_over_mixed_operations() {
        let mut cache = LruCache::new(0, None);
        cache.add("one", "11".to_string());
        cache.add("two", "2222".to_string());
        cache.add("three", "3".to_string());
        cache.remove("two");
        assert_eq!(cache.used_bytes(), (3 + 2) + (5 + 1));
        cache.remove("one");
        cache.remove("three");
        assert_eq!(cache.used_bytes(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_callback_fires_after_removal() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let seen = evicted.clone();
        let mut cache = LruCache::new(
            8,
            Some(Box::new(move |key, _value: &String| {
                assert_eq!(key, "a");
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );
        cache.add("a", "111".to_string());
        cache.add("b", "22222".to_string());
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_missing_key_is_a_noop() {
        let mut cache: LruCache<String> = LruCache::new(0, None);
        cache.remove("ghost");
        cache.remove_oldest();
        assert_eq!(cache.used_bytes(), 0);
    }
}
