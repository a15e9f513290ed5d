//! Fixed-size hash-bucket table keyed by job key
//!
//! The bucket count never changes after construction. A key hashes to
//! `Σ (i+1)·byte_i mod buckets` over its canonical text; collisions chain
//! in a growable vector. Inserting an existing key is rejected.

use crate::joblog::JobKey;

/// Default bucket count per partition
pub const DEFAULT_BUCKET_COUNT: usize = 2000;

/// Position-weighted byte sum of the key's canonical text
pub fn weighted_hash(key: &JobKey, buckets: usize) -> usize {
    let text = key.to_string();
    let sum = text
        .bytes()
        .enumerate()
        .fold(0usize, |acc, (i, b)| acc.wrapping_add((i + 1).wrapping_mul(b as usize)));
    sum % buckets.max(1)
}

/// Hash table with separate chaining and no resize
#[derive(Debug, Clone)]
pub struct BucketTable<V> {
    buckets: Vec<Vec<(JobKey, V)>>,
    len: usize,
}

impl<V> BucketTable<V> {
    /// Creates a table with `bucket_count` buckets (at least one)
    pub fn new(bucket_count: usize) -> Self {
        let count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(count);
        buckets.resize_with(count, Vec::new);
        Self { buckets, len: 0 }
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, key: &JobKey) -> usize {
        weighted_hash(key, self.buckets.len())
    }

    /// Inserts a new entry; returns false and drops `value` if `key` exists
    pub fn insert(&mut self, key: JobKey, value: V) -> bool {
        let index = self.bucket_of(&key);
        let chain = &mut self.buckets[index];
        if chain.iter().any(|(k, _)| *k == key) {
            return false;
        }
        chain.push((key, value));
        self.len += 1;
        true
    }

    /// Looks up an entry
    pub fn get(&self, key: &JobKey) -> Option<&V> {
        self.buckets[self.bucket_of(key)]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Looks up an entry for modification
    pub fn get_mut(&mut self, key: &JobKey) -> Option<&mut V> {
        let index = self.bucket_of(key);
        self.buckets[index]
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// True if `key` is present
    pub fn contains(&self, key: &JobKey) -> bool {
        self.get(key).is_some()
    }

    /// Removes and returns an entry
    pub fn remove(&mut self, key: &JobKey) -> Option<V> {
        let index = self.bucket_of(key);
        let chain = &mut self.buckets[index];
        let position = chain.iter().position(|(k, _)| k == key)?;
        self.len -= 1;
        Some(chain.remove(position).1)
    }

    /// Removes every entry, keeping the bucket count
    pub fn clear(&mut self) {
        for chain in &mut self.buckets {
            chain.clear();
        }
        self.len = 0;
    }

    /// Entries in bucket order, then chain order
    pub fn iter(&self) -> impl Iterator<Item = (&JobKey, &V)> {
        self.buckets
            .iter()
            .flat_map(|chain| chain.iter().map(|(k, v)| (k, v)))
    }
}

// Equal when both hold the same key/value pairs, regardless of chain order.
impl<V: PartialEq> PartialEq for BucketTable<V> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<V: Eq> Eq for BucketTable<V> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_position_weighted() {
        // "1.0" and "0.1" have the same bytes in different positions.
        let a = weighted_hash(&JobKey::proc("1", "0"), 1_000_000);
        let b = weighted_hash(&JobKey::proc("0", "1"), 1_000_000);
        assert_ne!(a, b);

        let expected = b"1.0"
            .iter()
            .enumerate()
            .map(|(i, b)| (i + 1) * *b as usize)
            .sum::<usize>();
        assert_eq!(a, expected);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut table = BucketTable::new(16);
        assert!(table.insert(JobKey::cluster("1"), "first"));
        assert!(!table.insert(JobKey::cluster("1"), "second"));
        assert_eq!(table.get(&JobKey::cluster("1")), Some(&"first"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_collisions_chain() {
        let mut table = BucketTable::new(1);
        for i in 0..50 {
            assert!(table.insert(JobKey::proc("7", i.to_string()), i));
        }
        assert_eq!(table.len(), 50);
        assert_eq!(table.get(&JobKey::proc("7", "31")), Some(&31));
        assert_eq!(table.remove(&JobKey::proc("7", "31")), Some(31));
        assert_eq!(table.get(&JobKey::proc("7", "31")), None);
        assert_eq!(table.len(), 49);
    }

    #[test]
    fn test_get_mut_and_clear() {
        let mut table = BucketTable::new(DEFAULT_BUCKET_COUNT);
        table.insert(JobKey::cluster("3"), 1);
        *table.get_mut(&JobKey::cluster("3")).unwrap() += 1;
        assert_eq!(table.get(&JobKey::cluster("3")), Some(&2));

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.bucket_count(), DEFAULT_BUCKET_COUNT);
    }

    #[test]
    fn test_equality_ignores_insert_order() {
        let mut a = BucketTable::new(1);
        let mut b = BucketTable::new(1);
        a.insert(JobKey::cluster("1"), 'x');
        a.insert(JobKey::cluster("2"), 'y');
        b.insert(JobKey::cluster("2"), 'y');
        b.insert(JobKey::cluster("1"), 'x');
        assert_eq!(a, b);

        b.insert(JobKey::cluster("3"), 'z');
        assert_ne!(a, b);
    }
}
