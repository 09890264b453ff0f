// Copyright (C) 2013-2020 Blockstack PBC, a public benefit corporation
// Copyright (C) 2020-2024 Stacks Open Internet Foundation
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use hashbrown::HashMap;

/// Node in the doubly linked list
struct Node<K, V> {
    key: K,
    value: V,
    next: usize,
    prev: usize,
}

/// Bounded least-recently-used map.
///
/// Nodes live in a flat vector and are linked by index; `capacity` doubles
/// as the null link. Once full, an insert of a new key reuses the slot of
/// the least recently used entry.
pub struct LruCache<K, V> {
    capacity: usize,
    /// Map from key to an offset in the linked list
    cache: HashMap<K, usize>,
    /// Doubly linked list of values in order of most recently used
    order: Vec<Node<K, V>>,
    /// Index of the head of the linked list -- the most recently used element
    head: usize,
    /// Index of the tail of the linked list -- the least recently used element
    tail: usize,
    hits: u64,
    misses: u64,
}

impl<K: Eq + std::hash::Hash + Clone, V: Copy> LruCache<K, V> {
    /// Create a new LRU cache with the given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LruCache {
            capacity,
            cache: HashMap::new(),
            order: Vec::with_capacity(capacity.min(4096)),
            head: capacity,
            tail: capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Check for a key without touching the recency order
    pub fn contains_key(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    /// Get the value for the given key, making it the most recently used
    pub fn get(&mut self, key: &K) -> Option<V> {
        let Some(node) = self.cache.get(key).copied() else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        self.touch(node);
        Some(self.order[node].value)
    }

    fn touch(&mut self, node: usize) {
        if node == self.head {
            return;
        }
        let prev = self.order[node].prev;
        let next = self.order[node].next;

        if node == self.tail {
            self.tail = prev;
        } else {
            self.order[next].prev = prev;
        }

        self.order[prev].next = next;
        self.order[node].prev = self.capacity;
        self.order[node].next = self.head;
        self.order[self.head].prev = node;
        self.head = node;
    }

    /// Insert or overwrite a key-value pair.
    /// Returns the evicted pair, if the cache was full.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(node) = self.cache.get(&key).copied() {
            self.order[node].value = value;
            self.touch(node);
            return None;
        }

        let mut evicted = None;
        let index = if self.cache.len() == self.capacity {
            // Take the place of the least recently used element
            let index = self.tail;
            let prev = self.order[index].prev;
            if prev != self.capacity {
                self.order[prev].next = self.capacity;
                self.tail = prev;
            } else {
                // sole element
                self.head = self.capacity;
                self.tail = self.capacity;
            }

            self.cache.remove(&self.order[index].key);
            let old_key = std::mem::replace(&mut self.order[index].key, key.clone());
            evicted = Some((old_key, self.order[index].value));

            self.cache.insert(key, index);
            self.order[index].value = value;
            self.order[index].next = self.head;
            self.order[index].prev = self.capacity;
            index
        } else {
            let index = self.order.len();
            self.order.push(Node {
                key: key.clone(),
                value,
                next: self.head,
                prev: self.capacity,
            });
            self.cache.insert(key, index);
            index
        };

        if self.head != self.capacity {
            self.order[self.head].prev = index;
        } else {
            self.tail = index;
        }
        self.head = index;
        evicted
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.cache.clear();
        self.order.clear();
        self.head = self.capacity;
        self.tail = self.capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_cache() {
        let mut cache = LruCache::new(2);

        cache.insert(1, 1);
        cache.insert(2, 2);
        assert_eq!(cache.get(&1), Some(1));
        cache.insert(3, 3);
        assert_eq!(cache.get(&2), None);
        cache.insert(4, 4);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&3), Some(3));
        assert_eq!(cache.get(&4), Some(4));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_cache_update() {
        let mut cache = LruCache::new(2);

        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.insert(1, 10);
        assert_eq!(cache.get(&1), Some(10));
        cache.insert(3, 3);
        assert_eq!(cache.get(&2), None);
        cache.insert(2, 4);
        assert_eq!(cache.get(&2), Some(4));
        assert_eq!(cache.get(&3), Some(3));
    }

    #[test]
    fn test_lru_cache_evicted() {
        let mut cache = LruCache::new(2);

        assert!(cache.insert(1, 1).is_none());
        assert!(cache.insert(2, 2).is_none());
        let evicted = cache.insert(3, 3).expect("expected an eviction");
        assert_eq!(evicted, (1, 1));
    }

    #[test]
    fn test_lru_cache_capacity_one() {
        let mut cache = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);

        cache.insert("a", 1);
        assert_eq!(cache.insert("b", 2), Some(("a", 1)));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.insert("c", 3), Some(("b", 2)));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.stats(), (2, 1));
    }

    #[test]
    fn test_lru_cache_clear() {
        let mut cache = LruCache::new(3);
        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains_key(&1));
        cache.insert(3, 3);
        assert_eq!(cache.get(&3), Some(3));
    }
}
