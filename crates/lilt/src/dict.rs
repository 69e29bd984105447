//! Bucketed dictionaries with an internal node heap and free list.
//!
//! Every dictionary in the runtime shares one layout: a power-of-two bucket
//! array of node indices, a node heap the same length, and a free list
//! threaded through the unused nodes. Collisions chain through `next`. When
//! the free list runs dry the whole structure doubles and rehashes; when
//! occupancy drops to a quarter it halves (never below the minimum size).
//!
//! Keys are `Int32`, symbols, or strings; each supplies its own hash through
//! [`DictKey`], backed by the process hash oracle.

use crate::hash_oracle;

/// Minimum (and initial) bucket count.
const MIN_SIZE: usize = 16;
/// Largest bucket count `clear` will honor.
const MAX_SIZE: usize = 16_777_216;

/// A dictionary key: hashable through the process oracle, comparable for
/// chain walks.
pub trait DictKey: Eq + Clone {
    fn dict_hash(&self) -> u32;
}

impl DictKey for i32 {
    fn dict_hash(&self) -> u32 {
        hash_oracle::mix_int32(*self)
    }
}

impl DictKey for String {
    fn dict_hash(&self) -> u32 {
        hash_oracle::hash_str(self)
    }
}

/// One node in the dictionary's internal heap.
///
/// A live node holds its key/value in `slot`; a free node has `slot == None`
/// and its `next` threads the free list.
#[derive(Debug, Clone)]
struct Node<K, V> {
    next: i32,
    slot: Option<(K, V)>,
}

/// Bucket-chained dictionary with amortised O(1) insert/lookup/delete.
#[derive(Debug, Clone)]
pub struct Dict<K: DictKey, V> {
    buckets: Vec<i32>,
    nodes: Vec<Node<K, V>>,
    first_free: i32,
    mask: u32,
    count: usize,
}

/// Diagnostic histograms from [`Dict::compute_stats`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DictStats {
    /// Number of live entries.
    pub count: usize,
    /// Bucket count.
    pub buckets: usize,
    /// `histogram[n]` = number of buckets holding exactly `n` entries
    /// (the last slot aggregates longer chains).
    pub bucket_histogram: [usize; 8],
    /// `histogram[d]` = number of keys found at chain depth `d`.
    pub depth_histogram: [usize; 8],
}

impl<K: DictKey, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: DictKey, V> Dict<K, V> {
    /// Creates an empty dictionary at the minimum size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_size(MIN_SIZE)
    }

    /// Creates an empty dictionary with at least `size` buckets.
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        let size = Self::round_size(size);
        let mut dict = Self {
            buckets: Vec::new(),
            nodes: Vec::new(),
            first_free: -1,
            mask: 0,
            count: 0,
        };
        dict.reset_storage(size);
        dict
    }

    /// Rounds a requested size up to a power of two in `[MIN_SIZE, MAX_SIZE]`.
    fn round_size(size: usize) -> usize {
        size.clamp(MIN_SIZE, MAX_SIZE).next_power_of_two()
    }

    fn reset_storage(&mut self, size: usize) {
        self.buckets.clear();
        self.buckets.resize(size, -1);
        self.nodes.clear();
        for i in 0..size {
            // Thread every node onto the free list.
            let next = if i + 1 < size { (i + 1) as i32 } else { -1 };
            self.nodes.push(Node { next, slot: None });
        }
        self.first_free = 0;
        self.mask = (size - 1) as u32;
        self.count = 0;
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drops every entry and resizes the storage for `size` expected entries.
    pub fn clear(&mut self, size: usize) {
        self.reset_storage(Self::round_size(size));
    }

    /// Inserts a key that must not already be present.
    ///
    /// # Panics
    /// Panics if the key is already present; the runtime always probes with
    /// [`Dict::try_get`] or [`Dict::contains`] first (matching the original
    /// `Append` contract).
    pub fn append(&mut self, key: K, value: V) {
        assert!(!self.contains(&key), "Dict::append: key is already present");
        if self.first_free < 0 {
            self.resize(self.buckets.len() * 2);
        }
        let node_index = self.first_free;
        let bucket = (key.dict_hash() & self.mask) as usize;
        let node = &mut self.nodes[node_index as usize];
        self.first_free = node.next;
        node.slot = Some((key, value));
        node.next = self.buckets[bucket];
        self.buckets[bucket] = node_index;
        self.count += 1;
    }

    /// Inserts or overwrites.
    pub fn set(&mut self, key: K, value: V) {
        if let Some(existing) = self.get_mut(&key) {
            *existing = value;
        } else {
            self.append(key, value);
        }
    }

    /// Removes a key, returning its value if it was present.
    ///
    /// Shrinks the storage when occupancy drops to a quarter.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let bucket = (key.dict_hash() & self.mask) as usize;
        let mut prev: i32 = -1;
        let mut index = self.buckets[bucket];
        while index >= 0 {
            let node = &self.nodes[index as usize];
            let matches = node.slot.as_ref().is_some_and(|(k, _)| k == key);
            if matches {
                let next = node.next;
                if prev < 0 {
                    self.buckets[bucket] = next;
                } else {
                    self.nodes[prev as usize].next = next;
                }
                let node = &mut self.nodes[index as usize];
                let (_, value) = node.slot.take().expect("matched node has a slot");
                node.next = self.first_free;
                self.first_free = index;
                self.count -= 1;

                let size = self.buckets.len();
                if size > MIN_SIZE && self.count <= size / 4 {
                    self.resize(size / 2);
                }
                return Some(value);
            }
            prev = index;
            index = node.next;
        }
        None
    }

    /// Looks a key up, panicking if absent.
    ///
    /// # Panics
    /// Panics when the key is missing; use [`Dict::try_get`] on uncertain keys.
    #[must_use]
    pub fn get(&self, key: &K) -> &V {
        self.try_get(key).expect("Dict::get: key is not present")
    }

    /// Looks a key up.
    #[must_use]
    pub fn try_get(&self, key: &K) -> Option<&V> {
        let mut index = self.buckets[(key.dict_hash() & self.mask) as usize];
        while index >= 0 {
            let node = &self.nodes[index as usize];
            if let Some((k, v)) = &node.slot
                && k == key
            {
                return Some(v);
            }
            index = node.next;
        }
        None
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let mut index = self.buckets[(key.dict_hash() & self.mask) as usize];
        while index >= 0 {
            // Split borrow: read next before handing out the slot.
            let next = self.nodes[index as usize].next;
            let found = self.nodes[index as usize]
                .slot
                .as_ref()
                .is_some_and(|(k, _)| k == key);
            if found {
                return self.nodes[index as usize].slot.as_mut().map(|(_, v)| v);
            }
            index = next;
        }
        None
    }

    /// True when the key is present.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.try_get(key).is_some()
    }

    /// Returns a pseudo-random entry: the head of the first non-empty bucket.
    #[must_use]
    pub fn get_first(&self) -> Option<(&K, &V)> {
        for &head in &self.buckets {
            if head >= 0 {
                let (k, v) = self.nodes[head as usize]
                    .slot
                    .as_ref()
                    .expect("bucket head is live");
                return Some((k, v));
            }
        }
        None
    }

    /// Collects every `(key, value)` pair. Iteration order is unspecified.
    #[must_use]
    pub fn get_all(&self) -> Vec<(&K, &V)> {
        let mut all = Vec::with_capacity(self.count);
        self.for_each(|k, v| all.push((k, v)));
        all
    }

    /// Collects every key. Iteration order is unspecified.
    #[must_use]
    pub fn get_keys(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.count);
        self.for_each(|k, _| keys.push(k));
        keys
    }

    /// Collects every value. Iteration order is unspecified.
    #[must_use]
    pub fn get_values(&self) -> Vec<&V> {
        let mut values = Vec::with_capacity(self.count);
        self.for_each(|_, v| values.push(v));
        values
    }

    /// Visits every live entry.
    pub fn for_each<'a, F: FnMut(&'a K, &'a V)>(&'a self, mut f: F) {
        for node in &self.nodes {
            if let Some((k, v)) = &node.slot {
                f(k, v);
            }
        }
    }

    /// Rebuilds the storage at `new_size` buckets, preserving every mapping.
    fn resize(&mut self, new_size: usize) {
        let new_size = Self::round_size(new_size);
        let old_nodes = std::mem::take(&mut self.nodes);
        self.reset_storage(new_size);
        for node in old_nodes {
            if let Some((k, v)) = node.slot {
                self.append(k, v);
            }
        }
    }

    /// Gathers bucket-size and key-depth histograms for diagnostics.
    #[must_use]
    pub fn compute_stats(&self) -> DictStats {
        let mut stats = DictStats {
            count: self.count,
            buckets: self.buckets.len(),
            ..DictStats::default()
        };
        for &head in &self.buckets {
            let mut chain = 0_usize;
            let mut index = head;
            while index >= 0 {
                stats.depth_histogram[chain.min(7)] += 1;
                chain += 1;
                index = self.nodes[index as usize].next;
            }
            stats.bucket_histogram[chain.min(7)] += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn append_then_get_returns_the_value() {
        let mut dict: Dict<i32, &str> = Dict::new();
        dict.append(42, "answer");
        assert_eq!(*dict.get(&42), "answer");
        assert_eq!(dict.try_get(&43), None);
    }

    #[test]
    fn remove_makes_key_absent() {
        let mut dict: Dict<i32, i32> = Dict::new();
        dict.append(1, 10);
        dict.append(2, 20);
        assert_eq!(dict.remove(&1), Some(10));
        assert!(!dict.contains(&1));
        assert!(dict.contains(&2));
        assert_eq!(dict.remove(&1), None);
    }

    #[test]
    fn growth_preserves_all_mappings() {
        let mut dict: Dict<i32, i32> = Dict::new();
        for i in 0..1000 {
            dict.append(i, i * 3);
        }
        assert_eq!(dict.len(), 1000);
        for i in 0..1000 {
            assert_eq!(*dict.get(&i), i * 3, "mapping lost for key {i}");
        }
    }

    #[test]
    fn shrink_preserves_remaining_mappings() {
        let mut dict: Dict<i32, i32> = Dict::new();
        for i in 0..512 {
            dict.append(i, -i);
        }
        for i in 0..500 {
            dict.remove(&i);
        }
        assert_eq!(dict.len(), 12);
        for i in 500..512 {
            assert_eq!(*dict.get(&i), -i);
        }
        // Storage should have come back down near the minimum.
        assert!(dict.buckets.len() <= 64, "did not shrink: {}", dict.buckets.len());
    }

    #[test]
    fn string_keys_compare_by_content() {
        let mut dict: Dict<String, i32> = Dict::new();
        dict.append(String::from("pi"), 314);
        let probe = String::from("pi");
        assert_eq!(dict.try_get(&probe), Some(&314));
    }

    #[test]
    fn clear_rounds_size_to_power_of_two() {
        let mut dict: Dict<i32, i32> = Dict::new();
        dict.append(7, 7);
        dict.clear(100);
        assert!(dict.is_empty());
        assert_eq!(dict.buckets.len(), 128);
        dict.clear(0);
        assert_eq!(dict.buckets.len(), MIN_SIZE);
    }

    #[test]
    fn get_first_returns_some_live_entry() {
        let mut dict: Dict<i32, i32> = Dict::new();
        for i in 0..8 {
            dict.append(i, i);
        }
        let (k, v) = dict.get_first().expect("dict is non-empty");
        assert_eq!(k, v);
        assert!((0..8).contains(k));
    }

    #[test]
    fn stats_cover_every_key() {
        let mut dict: Dict<i32, i32> = Dict::new();
        for i in 0..100 {
            dict.append(i, i);
        }
        let stats = dict.compute_stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.depth_histogram.iter().sum::<usize>(), 100);
        assert_eq!(stats.bucket_histogram.iter().sum::<usize>(), stats.buckets);
    }
}
