use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Index plus recency list. Nodes live in a slab and link to each other by
/// slot index, so promotion and eviction never reallocate.
struct Inner<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used.
    tail: usize,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn node(&self, idx: usize) -> &Node<K, V> {
        self.slots[idx]
            .as_ref()
            .expect("linked slot must be occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        self.slots[idx]
            .as_mut()
            .expect("linked slot must be occupied")
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };

        if prev == NIL {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.node_mut(next).prev = prev;
        }

        let node = self.node_mut(idx);
        node.prev = NIL;
        node.next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = NIL;
            node.next = old_head;
        }

        if old_head == NIL {
            self.tail = idx;
        } else {
            self.node_mut(old_head).prev = idx;
        }
        self.head = idx;
    }

    fn promote(&mut self, idx: usize) {
        if self.head != idx {
            self.detach(idx);
            self.push_front(idx);
        }
    }

    fn unlink(&mut self, idx: usize) -> (K, V) {
        self.detach(idx);
        let node = self.slots[idx]
            .take()
            .expect("linked slot must be occupied");
        self.map.remove(&node.key);
        self.free.push(idx);
        (node.key, node.value)
    }

    fn insert_front(&mut self, key: K, value: V) {
        let node = Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.map.insert(key, idx);
        self.push_front(idx);
    }
}

/// A fixed-capacity cache with least-recently-used eviction.
///
/// Every operation runs inside a single critical section, so the lookup that
/// finds an entry and the promotion of that entry to the most-recently-used
/// position are observed atomically by concurrent callers.
///
/// # Example
///
/// ```rust
/// use burrow_cache::LruCache;
/// use std::num::NonZeroUsize;
///
/// let cache = LruCache::new(NonZeroUsize::new(2).unwrap());
/// cache.put("a", 1);
/// cache.put("b", 2);
/// cache.get("a");
/// cache.put("c", 3);
///
/// assert_eq!(cache.get("b"), None);
/// assert_eq!(cache.get("a"), Some(1));
/// assert_eq!(cache.get("c"), Some(3));
/// ```
pub struct LruCache<K, V> {
    capacity: NonZeroUsize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates an empty cache that holds at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::with_capacity(capacity.get())),
        }
    }

    /// Returns a clone of the cached value and marks it most recently used.
    ///
    /// A miss leaves the cache untouched.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        let idx = *inner.map.get(key)?;
        inner.promote(idx);
        Some(inner.node(idx).value.clone())
    }

    /// Inserts or replaces `key`, making it the most recently used entry.
    ///
    /// When a new key arrives at capacity, the least recently used entry is
    /// evicted first and returned.
    pub fn put(&self, key: K, value: V) -> Option<(K, V)> {
        let mut inner = self.inner.lock();

        let existing = inner.map.get(&key).copied();
        if let Some(idx) = existing {
            inner.node_mut(idx).value = value;
            inner.promote(idx);
            return None;
        }

        let evicted = if inner.map.len() >= self.capacity.get() {
            let tail = inner.tail;
            Some(inner.unlink(tail))
        } else {
            None
        };

        inner.insert_front(key, value);
        evicted
    }

    /// Removes `key` from the cache, returning its value if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        let idx = *inner.map.get(key)?;
        Some(inner.unlink(idx).1)
    }

    /// Checks for `key` without touching its recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Returns the keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let inner = self.inner.lock();
        let mut keys = Vec::with_capacity(inner.map.len());
        let mut cursor = inner.head;
        while cursor != NIL {
            let node = inner.node(cursor);
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.lock().map.len();
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &len)
            .finish()
    }
}
