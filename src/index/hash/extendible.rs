//! In-memory extendible hash table used for catalog name lookups.
//!
//! The directory indexes buckets by the low `global_depth` bits of the key
//! hash; overflowing a bucket splits it, doubling the directory when the
//! bucket's local depth has caught up with the global depth. The directory
//! never shrinks. One coarse mutex guards the whole structure.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// Key hashing for directory placement. Integer keys hash to themselves so
/// directory placement follows their low bits; strings go through the
/// standard hasher.
pub trait HashKey: Eq + Clone {
    fn hash_value(&self) -> u64;
}

macro_rules! identity_hash_key {
    ($($t:ty),*) => {
        $(impl HashKey for $t {
            fn hash_value(&self) -> u64 {
                *self as u64
            }
        })*
    };
}

identity_hash_key!(i32, i64, u32, u64, usize);

impl HashKey for String {
    fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug)]
struct Bucket<K, V> {
    local_depth: usize,
    items: Vec<(K, V)>,
}

struct Inner<K, V> {
    global_depth: usize,
    /// Directory slots hold indices into `buckets`
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// An extendible hash table with a coarse lock
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Inner<K, V>>,
    bucket_size: usize,
}

impl<K: HashKey, V: Clone> ExtendibleHashTable<K, V> {
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            inner: Mutex::new(Inner {
                global_depth: 0,
                directory: vec![0],
                buckets: vec![Bucket {
                    local_depth: 0,
                    items: Vec::with_capacity(bucket_size),
                }],
            }),
            bucket_size,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.directory[Self::dir_index(&inner, key)]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert or replace the value for a key, splitting buckets until the
    /// insert fits.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        loop {
            let bucket_index = inner.directory[Self::dir_index(&inner, &key)];
            let bucket = &mut inner.buckets[bucket_index];

            if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            self.split_bucket(&mut inner, bucket_index);
        }
    }

    /// Remove a key, returning whether it was present. Buckets are never
    /// merged and the directory never shrinks.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let bucket_index = inner.directory[Self::dir_index(&inner, key)];
        let bucket = &mut inner.buckets[bucket_index];
        let before = bucket.items.len();
        bucket.items.retain(|(k, _)| k != key);
        bucket.items.len() < before
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind a directory slot
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.directory[dir_index]].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.buckets.iter().map(|b| b.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dir_index(inner: &Inner<K, V>, key: &K) -> usize {
        let mask = (1usize << inner.global_depth) - 1;
        (key.hash_value() as usize) & mask
    }

    fn split_bucket(&self, inner: &mut Inner<K, V>, bucket_index: usize) {
        if inner.buckets[bucket_index].local_depth == inner.global_depth {
            // Double the directory; new slots mirror the old ones
            let current = inner.directory.clone();
            inner.directory.extend(current);
            inner.global_depth += 1;
        }

        let old_depth = inner.buckets[bucket_index].local_depth;
        inner.buckets[bucket_index].local_depth += 1;

        let sibling_index = inner.buckets.len();
        inner.buckets.push(Bucket {
            local_depth: old_depth + 1,
            items: Vec::with_capacity(self.bucket_size),
        });

        // Directory slots whose bit `old_depth` is set move to the sibling
        let distinguishing_bit = 1usize << old_depth;
        for slot in 0..inner.directory.len() {
            if inner.directory[slot] == bucket_index && slot & distinguishing_bit != 0 {
                inner.directory[slot] = sibling_index;
            }
        }

        // Rehash the overflowing bucket's items through the directory
        let items = std::mem::take(&mut inner.buckets[bucket_index].items);
        for (key, value) in items {
            let target = inner.directory[Self::dir_index(inner, &key)];
            inner.buckets[target].items.push((key, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let table: ExtendibleHashTable<i64, String> = ExtendibleHashTable::new(4);
        for i in 0..32 {
            table.insert(i, format!("value-{i}"));
        }
        assert_eq!(table.len(), 32);
        assert_eq!(table.get(&7), Some("value-7".to_string()));
        assert_eq!(table.get(&99), None);

        assert!(table.remove(&7));
        assert!(!table.remove(&7));
        assert_eq!(table.get(&7), None);
        assert_eq!(table.len(), 31);
    }

    #[test]
    fn test_insert_replaces_existing() {
        let table: ExtendibleHashTable<String, u32> = ExtendibleHashTable::new(2);
        table.insert("t".to_string(), 1);
        table.insert("t".to_string(), 2);
        assert_eq!(table.get(&"t".to_string()), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_directory_growth_on_colliding_low_bits() {
        // Keys 4, 12, 16 share their low two bits; packing them into
        // buckets of two takes three splits.
        let table: ExtendibleHashTable<i64, i64> = ExtendibleHashTable::new(2);
        table.insert(4, 4);
        table.insert(12, 12);
        table.insert(16, 16);

        assert_eq!(table.global_depth(), 3);
        assert_eq!(table.num_buckets(), 4);
        for key in [4, 12, 16] {
            assert_eq!(table.get(&key), Some(key));
        }
    }

    #[test]
    fn test_local_depths_after_growth() {
        let table: ExtendibleHashTable<i64, i64> = ExtendibleHashTable::new(2);
        for key in [4, 12, 16] {
            table.insert(key, key);
        }
        // Directory slot 0 (and 0b100) hold depth-3 buckets; the never-split
        // siblings stay shallower.
        assert_eq!(table.local_depth(0b000), 3);
        assert_eq!(table.local_depth(0b100), 3);
        assert_eq!(table.local_depth(0b001), 1);
        assert_eq!(table.local_depth(0b010), 2);
    }
}
