//! Per-container cache of decrypted values, keyed by reader identity.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use tracing::trace;
use trove_types::{Entity, KeyHash};

/// Identity of a set of read keys: blake3 over the sorted key hashes.
pub fn reader_set_hash(keys: &BTreeSet<KeyHash>) -> KeyHash {
    let mut bytes = Vec::with_capacity(keys.len() * 32);
    for key in keys {
        bytes.extend_from_slice(key.as_bytes());
    }
    KeyHash::from_data(&bytes)
}

/// Small LRU mapping a reader set to the value it last decrypted.
///
/// A capacity of 0 disables caching.
pub(crate) struct ReadCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    /// Front = least recently used.
    order: VecDeque<KeyHash>,
    entries: HashMap<KeyHash, Entity>,
}

impl ReadCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                order: VecDeque::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Clone of the cached value for `reader`, promoted to most recent.
    pub(crate) fn get(&self, reader: &KeyHash) -> Option<Entity> {
        let mut inner = self.inner.lock().expect("read cache lock poisoned");
        let hit = inner.entries.get(reader)?.clone();
        inner.order.retain(|k| k != reader);
        inner.order.push_back(*reader);
        Some(hit)
    }

    pub(crate) fn put(&self, reader: KeyHash, value: Entity) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock().expect("read cache lock poisoned");
        if inner.entries.remove(&reader).is_some() {
            inner.order.retain(|k| *k != reader);
        }
        while inner.entries.len() >= self.capacity {
            let Some(evict) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&evict);
            trace!(reader = %evict, "evicted cached read");
        }
        inner.entries.insert(reader, value);
        inner.order.push_back(reader);
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().expect("read cache lock poisoned");
        inner.order.clear();
        inner.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("read cache lock poisoned").entries.len()
    }
}
