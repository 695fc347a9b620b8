#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use core::hash::BuildHasher;
use core::hash::Hash;

mod error;
mod primes;

pub mod frozen_hash_table;

/// Immutable maps built once and tuned for lookups.
///
/// This module provides `FrozenMap`, which picks a lookup strategy from the
/// size of its input, and `FrozenIntMap` for `i32` keys.
pub mod frozen_map;

/// An immutable set built on `FrozenMap`.
pub mod frozen_set;

/// A HashMap implementation over the chaining table.
///
/// This module provides a `HashMap` that wraps the `HashTable` and provides
/// a standard key-value map interface with configurable hashers.
pub mod hash_map;

/// A hash set implementation over the chaining table.
///
/// This module provides a `HashSet` that wraps the `HashTable` and provides
/// a standard set interface with configurable hashers.
pub mod hash_set;

pub mod hash_table;

pub use error::CapacityError;
pub use error::TableError;
pub use frozen_hash_table::FrozenHashTable;
pub use frozen_map::FrozenIntMap;
pub use frozen_map::FrozenMap;
pub use frozen_set::FrozenSet;
pub use hash_map::Entry;
pub use hash_map::HashMap;
pub use hash_set::HashSet;
pub use hash_table::HashTable;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used when none is specified.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used when none is specified.
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// Placeholder hasher builder; enable the `foldhash` or `std` feature
        /// for a usable default.
        #[derive(Clone, Copy, Debug)]
        pub enum DefaultHashBuilder {}
    }
}

/// Folds a 64-bit hash into the 32-bit code stored by the tables.
#[inline(always)]
pub(crate) fn fold_hash(hash: u64) -> i32 {
    (hash ^ (hash >> 32)) as i32
}

#[inline]
pub(crate) fn make_hash<Q, S>(hash_builder: &S, value: &Q) -> i32
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    fold_hash(hash_builder.hash_one(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_mixes_both_halves() {
        assert_eq!(fold_hash(0), 0);
        assert_eq!(fold_hash(1), 1);
        assert_eq!(fold_hash(1 << 32), 1);
        assert_eq!(fold_hash(0xFFFF_FFFF_0000_0000), -1);
        assert_eq!(fold_hash(0xFFFF_FFFF_FFFF_FFFF), 0);
    }
}
