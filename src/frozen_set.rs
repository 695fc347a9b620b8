use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::DefaultHashBuilder;
use crate::HashSet;
use crate::frozen_map::FrozenMap;
use crate::hash_table::HashTable;

/// An immutable set tuned for membership tests.
///
/// Shares the construction strategies of [`FrozenMap`]; see there for how the
/// lookup structure is chosen.
///
/// # Examples
///
/// ```rust
/// # #[cfg(any(feature = "std", feature = "foldhash"))]
/// # {
/// use chain_hash::FrozenSet;
///
/// let set: FrozenSet<&str> = ["GET", "PUT", "POST", "DELETE", "PATCH"].into_iter().collect();
/// assert!(set.contains(&"PUT"));
/// assert!(!set.contains(&"HEAD"));
/// # }
/// ```
pub struct FrozenSet<T, S = DefaultHashBuilder> {
    map: FrozenMap<T, (), S>,
}

impl<T: Clone, S: Clone> Clone for FrozenSet<T, S> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<T: Debug, S> Debug for FrozenSet<T, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S> FrozenSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Freezes `iter` using the given hasher builder.
    pub fn with_hasher<I>(iter: I, hash_builder: S) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut set = HashSet::with_hasher(hash_builder);
        set.extend(iter);
        set.freeze()
    }

    /// Freezes `iter`, using binary search for small inputs.
    pub fn from_ordered<I>(iter: I, hash_builder: S) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Ord,
    {
        Self {
            map: FrozenMap::from_ordered(iter.into_iter().map(|v| (v, ())), hash_builder),
        }
    }

    pub(crate) fn from_table(table: HashTable<T, ()>, hash_builder: S) -> Self {
        Self {
            map: FrozenMap::from_table(table, hash_builder),
        }
    }

    /// Returns `true` if the set contains the value.
    pub fn contains(&self, value: &T) -> bool {
        self.map.contains_key(value)
    }

    /// Returns the stored value equal to `value`.
    pub fn get(&self, value: &T) -> Option<&T> {
        self.map.get_key_value(value).map(|(v, _)| v)
    }
}

impl<T, S> FrozenSet<T, S> {
    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the set has no values.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the values in storage order.
    pub fn as_slice(&self) -> &[T] {
        self.map.keys()
    }

    /// Returns an iterator over the values in storage order.
    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.map.keys().iter()
    }

    /// Returns bucket statistics when the set uses a hash table.
    #[cfg(any(test, feature = "stats"))]
    pub fn frozen_stats(&self) -> Option<crate::frozen_hash_table::FrozenStats> {
        self.map.frozen_stats()
    }
}

impl<T, S> FromIterator<T> for FrozenSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::with_hasher(iter, S::default())
    }
}

impl<'a, T, S> IntoIterator for &'a FrozenSet<T, S> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
