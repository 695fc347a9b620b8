use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;

use crate::DefaultHashBuilder;
use crate::HashMap;
use crate::frozen_hash_table::FrozenHashTable;
use crate::hash_table::Entry as TableEntry;
use crate::hash_table::HashTable;
use crate::make_hash;

/// Maps with at most this many entries are searched linearly.
const MAX_ITEMS_IN_LINEAR_MAP: usize = 4;

/// Maps built from ordered keys with at most this many entries are binary
/// searched.
const MAX_ITEMS_IN_SORTED_MAP: usize = 10;

enum Repr<K, V> {
    Empty,
    Linear {
        keys: Box<[K]>,
        values: Box<[V]>,
    },
    Sorted {
        keys: Box<[K]>,
        values: Box<[V]>,
        compare: fn(&K, &K) -> Ordering,
    },
    Hashed {
        table: FrozenHashTable,
        keys: Box<[K]>,
        values: Box<[V]>,
    },
}

impl<K: Clone, V: Clone> Clone for Repr<K, V> {
    fn clone(&self) -> Self {
        match self {
            Repr::Empty => Repr::Empty,
            Repr::Linear { keys, values } => Repr::Linear {
                keys: keys.clone(),
                values: values.clone(),
            },
            Repr::Sorted {
                keys,
                values,
                compare,
            } => Repr::Sorted {
                keys: keys.clone(),
                values: values.clone(),
                compare: *compare,
            },
            Repr::Hashed {
                table,
                keys,
                values,
            } => Repr::Hashed {
                table: table.clone(),
                keys: keys.clone(),
                values: values.clone(),
            },
        }
    }
}

/// Rearranges `items` so that position `d` holds `items[sources[d]]`.
fn permute<T>(items: Vec<T>, sources: &[usize]) -> Vec<T> {
    debug_assert_eq!(items.len(), sources.len());
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    sources
        .iter()
        .filter_map(|&source| slots[source].take())
        .collect()
}

/// An immutable map tuned for lookups.
///
/// A `FrozenMap` is built once from a set of entries and picks a lookup
/// strategy from their number:
///
/// - no entries: every lookup misses immediately
/// - up to four entries: a linear scan
/// - up to ten entries with ordered keys (via [`from_ordered`]): a binary
///   search
/// - anything else: a [`FrozenHashTable`] whose bucket count was searched for
///   few collisions and whose buckets are stored contiguously
///
/// When the input repeats a key, the last value wins. Iteration order is
/// unspecified but deterministic for a given input and hasher.
///
/// [`from_ordered`]: FrozenMap::from_ordered
///
/// # Examples
///
/// ```rust
/// # #[cfg(any(feature = "std", feature = "foldhash"))]
/// # {
/// use chain_hash::FrozenMap;
///
/// let map: FrozenMap<i32, &str> = [(1, "a"), (2, "b"), (3, "c")].into_iter().collect();
/// assert_eq!(map.get(&2), Some(&"b"));
/// assert_eq!(map.get(&99), None);
/// # }
/// ```
pub struct FrozenMap<K, V, S = DefaultHashBuilder> {
    repr: Repr<K, V>,
    hash_builder: S,
}

impl<K: Clone, V: Clone, S: Clone> Clone for FrozenMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            repr: self.repr.clone(),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K: Debug, V: Debug, S> Debug for FrozenMap<K, V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> FrozenMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Freezes `iter` using the given hasher builder.
    pub fn with_hasher<I>(iter: I, hash_builder: S) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map = HashMap::with_hasher(hash_builder);
        map.extend(iter);
        map.freeze()
    }

    /// Freezes `iter`, using binary search for small inputs.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::FrozenMap;
    /// # use std::hash::RandomState;
    /// #
    /// let map = FrozenMap::from_ordered([("b", 2), ("a", 1), ("c", 3)], RandomState::new());
    /// assert_eq!(map.get(&"a"), Some(&1));
    /// assert_eq!(map.keys(), &["a", "b", "c"]);
    /// ```
    pub fn from_ordered<I>(iter: I, hash_builder: S) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Ord,
    {
        let mut map = HashMap::with_hasher(hash_builder);
        map.extend(iter);
        if map.is_empty() || map.len() > MAX_ITEMS_IN_SORTED_MAP {
            return map.freeze();
        }

        let (table, hash_builder) = map.into_parts();
        let mut entries: Vec<(K, V)> = table.into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        let (keys, values): (Vec<K>, Vec<V>) = entries.into_iter().unzip();

        Self {
            repr: Repr::Sorted {
                keys: keys.into_boxed_slice(),
                values: values.into_boxed_slice(),
                compare: K::cmp,
            },
            hash_builder,
        }
    }

    /// Freezes the live entries of a table whose keys are already unique.
    pub(crate) fn from_table(table: HashTable<K, V>, hash_builder: S) -> Self {
        let entries: Vec<(K, V)> = table.into_iter().collect();

        let repr = if entries.is_empty() {
            Repr::Empty
        } else if entries.len() <= MAX_ITEMS_IN_LINEAR_MAP {
            let (keys, values): (Vec<K>, Vec<V>) = entries.into_iter().unzip();
            Repr::Linear {
                keys: keys.into_boxed_slice(),
                values: values.into_boxed_slice(),
            }
        } else {
            let codes: Vec<i32> = entries
                .iter()
                .map(|(k, _)| make_hash(&hash_builder, k))
                .collect();
            let (table, sources) = FrozenHashTable::build(&codes, false);
            let (keys, values): (Vec<K>, Vec<V>) =
                permute(entries, &sources).into_iter().unzip();
            Repr::Hashed {
                table,
                keys: keys.into_boxed_slice(),
                values: values.into_boxed_slice(),
            }
        };

        Self { repr, hash_builder }
    }

    fn find_index(&self, key: &K) -> Option<usize> {
        match &self.repr {
            Repr::Empty => None,
            Repr::Linear { keys, .. } => keys.iter().position(|k| k == key),
            Repr::Sorted { keys, compare, .. } => {
                let (first, last) = (keys.first()?, keys.last()?);
                if compare(key, first) == Ordering::Less || compare(key, last) == Ordering::Greater
                {
                    return None;
                }
                keys.binary_search_by(|k| compare(k, key)).ok()
            }
            Repr::Hashed { table, keys, .. } => {
                let hash = make_hash(&self.hash_builder, key);
                let hash_codes = table.hash_codes();
                table
                    .find_matching_entries(hash)
                    .find(|&i| hash_codes[i] == hash && keys[i] == *key)
            }
        }
    }

    /// Returns a reference to the value corresponding to the key.
    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.find_index(key)?;
        Some(&self.values()[index])
    }

    /// Returns the stored key and value corresponding to the key.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let index = self.find_index(key)?;
        Some((&self.keys()[index], &self.values()[index]))
    }

    /// Returns `true` if the map contains a value for the specified key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_index(key).is_some()
    }
}

impl<K, V, S> FrozenMap<K, V, S> {
    /// Returns the keys in storage order.
    pub fn keys(&self) -> &[K] {
        match &self.repr {
            Repr::Empty => &[],
            Repr::Linear { keys, .. } | Repr::Sorted { keys, .. } | Repr::Hashed { keys, .. } => {
                &keys[..]
            }
        }
    }

    /// Returns the values in storage order, matching [`keys`](Self::keys).
    pub fn values(&self) -> &[V] {
        match &self.repr {
            Repr::Empty => &[],
            Repr::Linear { values, .. }
            | Repr::Sorted { values, .. }
            | Repr::Hashed { values, .. } => &values[..],
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns an iterator over the entries in storage order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.keys().iter().zip(self.values().iter()),
        }
    }

    /// Returns bucket statistics when the map uses a hash table.
    #[cfg(any(test, feature = "stats"))]
    pub fn frozen_stats(&self) -> Option<crate::frozen_hash_table::FrozenStats> {
        match &self.repr {
            Repr::Hashed { table, .. } => Some(table.stats()),
            _ => None,
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for FrozenMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::with_hasher(iter, S::default())
    }
}

impl<'a, K, V, S> IntoIterator for &'a FrozenMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the entries of a [`FrozenMap`] or [`FrozenIntMap`].
#[derive(Clone)]
pub struct Iter<'a, K, V> {
    inner: core::iter::Zip<core::slice::Iter<'a, K>, core::slice::Iter<'a, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// An immutable map keyed by `i32`, using each key as its own hash code.
///
/// Keys are unique after construction, so lookups compare stored codes only
/// and never touch a hasher. When the input repeats a key, the last value
/// wins.
///
/// # Examples
///
/// ```rust
/// use chain_hash::FrozenIntMap;
///
/// let map: FrozenIntMap<&str> = [(-3, "minus three"), (7, "seven")].into_iter().collect();
/// assert_eq!(map.get(-3), Some(&"minus three"));
/// assert_eq!(map.get(3), None);
/// ```
#[derive(Clone)]
pub struct FrozenIntMap<V> {
    table: FrozenHashTable,
    values: Box<[V]>,
}

impl<V: Debug> Debug for FrozenIntMap<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V> FrozenIntMap<V> {
    #[inline]
    fn find_index(&self, key: i32) -> Option<usize> {
        let hash_codes = self.table.hash_codes();
        self.table
            .find_matching_entries(key)
            .find(|&i| hash_codes[i] == key)
    }

    /// Returns a reference to the value corresponding to the key.
    pub fn get(&self, key: i32) -> Option<&V> {
        self.find_index(key).map(|i| &self.values[i])
    }

    /// Returns `true` if the map contains a value for the specified key.
    pub fn contains_key(&self, key: i32) -> bool {
        self.find_index(key).is_some()
    }

    /// Returns the keys in storage order.
    pub fn keys(&self) -> &[i32] {
        self.table.hash_codes()
    }

    /// Returns the values in storage order, matching [`keys`](Self::keys).
    pub fn values(&self) -> &[V] {
        &self.values
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns an iterator over the entries in storage order.
    pub fn iter(&self) -> Iter<'_, i32, V> {
        Iter {
            inner: self.keys().iter().zip(self.values.iter()),
        }
    }

    /// Returns bucket statistics of the underlying table.
    #[cfg(any(test, feature = "stats"))]
    pub fn frozen_stats(&self) -> crate::frozen_hash_table::FrozenStats {
        self.table.stats()
    }
}

impl<V> FromIterator<(i32, V)> for FrozenIntMap<V> {
    fn from_iter<I: IntoIterator<Item = (i32, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut unique: HashTable<i32, V> = HashTable::new();
        unique.reserve_for_hint(iter.size_hint().0);
        for (key, value) in iter {
            match unique.entry(key, |&k| k == key) {
                TableEntry::Occupied(mut entry) => {
                    entry.insert(value);
                }
                TableEntry::Vacant(entry) => {
                    entry.insert(key, value);
                }
            }
        }

        let (keys, values): (Vec<i32>, Vec<V>) = unique.into_iter().unzip();
        let (table, sources) = FrozenHashTable::build(&keys, true);
        Self {
            table,
            values: permute(values, &sources).into_boxed_slice(),
        }
    }
}

impl<'a, V> IntoIterator for &'a FrozenIntMap<V> {
    type Item = (&'a i32, &'a V);
    type IntoIter = Iter<'a, i32, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;
    use alloc::string::ToString;
    use core::hash::BuildHasher;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use rand::rngs::SmallRng;
    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    /// Always hashes to the same value, forcing every key into one bucket.
    #[derive(Clone, Default)]
    struct ConstantHashBuilder;

    struct ConstantHasher;

    impl core::hash::Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            0xDEAD_BEEF
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    impl BuildHasher for ConstantHashBuilder {
        type Hasher = ConstantHasher;

        fn build_hasher(&self) -> Self::Hasher {
            ConstantHasher
        }
    }

    fn strategy<K, V, S>(map: &FrozenMap<K, V, S>) -> &'static str {
        match map.repr {
            Repr::Empty => "empty",
            Repr::Linear { .. } => "linear",
            Repr::Sorted { .. } => "sorted",
            Repr::Hashed { .. } => "hashed",
        }
    }

    #[test]
    fn three_entries_resolve() {
        let map: FrozenMap<i32, &str, SipHashBuilder> =
            [(1, "a"), (2, "b"), (3, "c")].into_iter().collect();
        assert_eq!(map.get(&2), Some(&"b"));
        assert_eq!(map.get(&99), None);
        assert_eq!(map.len(), 3);
        assert_eq!(strategy(&map), "linear");
    }

    #[test]
    fn strategy_follows_size() {
        let empty: FrozenMap<i32, i32, SipHashBuilder> = core::iter::empty().collect();
        assert_eq!(strategy(&empty), "empty");
        assert!(empty.is_empty());
        assert_eq!(empty.get(&1), None);

        let small: FrozenMap<i32, i32, SipHashBuilder> = (0..4).map(|i| (i, i)).collect();
        assert_eq!(strategy(&small), "linear");

        let large: FrozenMap<i32, i32, SipHashBuilder> = (0..5).map(|i| (i, i)).collect();
        assert_eq!(strategy(&large), "hashed");

        let sorted = FrozenMap::from_ordered((0..10).map(|i| (i, i)), SipHashBuilder::default());
        assert_eq!(strategy(&sorted), "sorted");

        let too_many =
            FrozenMap::from_ordered((0..11).map(|i| (i, i)), SipHashBuilder::default());
        assert_eq!(strategy(&too_many), "hashed");
    }

    #[test]
    fn sorted_lookup_checks_bounds() {
        let map = FrozenMap::from_ordered(
            [(30, "c"), (10, "a"), (20, "b"), (40, "d"), (50, "e")],
            SipHashBuilder::default(),
        );
        assert_eq!(map.keys(), &[10, 20, 30, 40, 50]);
        assert_eq!(map.values(), &["a", "b", "c", "d", "e"]);
        for (k, v) in [(10, "a"), (30, "c"), (50, "e")] {
            assert_eq!(map.get(&k), Some(&v));
        }
        assert_eq!(map.get(&5), None);
        assert_eq!(map.get(&25), None);
        assert_eq!(map.get(&55), None);
    }

    #[test]
    fn last_value_wins() {
        let map: FrozenMap<&str, i32, SipHashBuilder> =
            [("x", 1), ("y", 2), ("x", 3)].into_iter().collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"x"), Some(&3));

        let ordered =
            FrozenMap::from_ordered([(1, 'a'), (1, 'b')], SipHashBuilder::default());
        assert_eq!(ordered.get(&1), Some(&'b'));
    }

    #[test]
    fn hashed_lookup_with_random_keys() {
        let mut rng = SmallRng::seed_from_u64(99);
        let keys: Vec<u64> = (0..5000).map(|_| rng.random()).collect();
        let map: FrozenMap<u64, usize, SipHashBuilder> =
            keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        let mut expected = std::collections::HashMap::new();
        for (i, k) in keys.iter().enumerate() {
            expected.insert(*k, i);
        }
        assert_eq!(map.len(), expected.len());
        for (k, v) in &expected {
            assert_eq!(map.get(k), Some(v));
        }
        for _ in 0..1000 {
            let probe: u64 = rng.random();
            assert_eq!(map.get(&probe), expected.get(&probe));
        }

        let stats = map.frozen_stats().unwrap();
        assert_eq!(stats.entries, expected.len());
    }

    #[test]
    fn colliding_hashes_compare_keys() {
        let map: FrozenMap<String, usize, ConstantHashBuilder> =
            (0..20).map(|i| (format!("key{i}"), i)).collect();
        assert_eq!(strategy(&map), "hashed");
        for i in 0..20 {
            assert_eq!(map.get(&format!("key{i}")), Some(&i));
        }
        assert_eq!(map.get(&"key20".to_string()), None);

        let stats = map.frozen_stats().unwrap();
        assert_eq!(stats.largest_bucket, 20);
    }

    #[test]
    fn iteration_is_deterministic() {
        let builder = SipHashBuilder::default();
        let a = FrozenMap::with_hasher((0..100).map(|i| (i, i * 2)), builder.clone());
        let b = FrozenMap::with_hasher((0..100).map(|i| (i, i * 2)), builder);

        let a_entries: Vec<(i32, i32)> = a.iter().map(|(k, v)| (*k, *v)).collect();
        let b_entries: Vec<(i32, i32)> = b.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(a_entries, b_entries);
        assert_eq!(a.iter().len(), 100);
        for (k, v) in &a {
            assert_eq!(*v, *k * 2);
        }
    }

    #[test]
    fn get_key_value_and_clone() {
        let map: FrozenMap<String, i32, SipHashBuilder> = (0..8)
            .map(|i| (i.to_string(), i))
            .collect();
        let cloned = map.clone();
        assert_eq!(
            cloned.get_key_value(&"5".to_string()),
            Some((&"5".to_string(), &5))
        );
        assert!(cloned.contains_key(&"7".to_string()));
        assert!(!cloned.contains_key(&"8".to_string()));
    }

    #[test]
    fn int_map_uses_keys_as_codes() {
        let map: FrozenIntMap<i32> = (-50..50).map(|i| (i * 7, i)).collect();
        assert_eq!(map.len(), 100);
        for i in -50..50 {
            assert_eq!(map.get(i * 7), Some(&i));
        }
        assert_eq!(map.get(1), None);
        assert!(!map.contains_key(i32::MIN));

        let mut keys = map.keys().to_vec();
        keys.sort_unstable();
        assert_eq!(keys, (-50..50).map(|i| i * 7).collect::<Vec<_>>());
    }

    #[test]
    fn int_map_last_value_wins_and_empty() {
        let map: FrozenIntMap<&str> = [(1, "a"), (2, "b"), (1, "c")].into_iter().collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1), Some(&"c"));

        let empty: FrozenIntMap<()> = core::iter::empty().collect();
        assert!(empty.is_empty());
        assert_eq!(empty.get(0), None);
    }

    /// Claims far more items than it yields.
    struct Overhinted<I>(I);

    impl<I: Iterator> Iterator for Overhinted<I> {
        type Item = I::Item;

        fn next(&mut self) -> Option<Self::Item> {
            self.0.next()
        }

        fn size_hint(&self) -> (usize, Option<usize>) {
            (3_000_000_000, None)
        }
    }

    #[test]
    fn int_map_tolerates_oversized_hint() {
        let map: FrozenIntMap<u8> = Overhinted(core::iter::repeat_n((5, 1u8), 100)).collect();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(5), Some(&1));
    }

    #[test]
    fn int_map_extreme_keys() {
        let keys = [i32::MIN, i32::MAX, 0, -1, 1];
        let map: FrozenIntMap<usize> = keys.iter().enumerate().map(|(i, &k)| (k, i)).collect();
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(map.get(k), Some(&i));
        }
        assert_eq!(map.frozen_stats().entries, 5);
    }
}
