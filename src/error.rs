use core::fmt;

use crate::primes::MAX_PRIME_ARRAY_LENGTH;

/// Errors reported before a table is touched.
///
/// Returned by the `try_*` constructors and trimming operations. The
/// infallible counterparts panic with the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The requested capacity exceeds the largest supported table size.
    CapacityOverflow {
        /// Capacity the caller asked for.
        requested: usize,
    },
    /// A trim target is smaller than the number of live entries.
    CapacityBelowLen {
        /// Capacity the caller asked for.
        requested: usize,
        /// Number of live entries in the table.
        len: usize,
    },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::CapacityOverflow { requested } => write!(
                f,
                "requested capacity {} exceeds the maximum of {}",
                requested, MAX_PRIME_ARRAY_LENGTH
            ),
            TableError::CapacityBelowLen { requested, len } => write!(
                f,
                "requested capacity {} is smaller than the {} live entries",
                requested, len
            ),
        }
    }
}

impl core::error::Error for TableError {}

/// The table is full and was not allowed to grow.
///
/// Returned by the `try_insert_within_capacity` family. The rejected item is
/// handed back so the caller can retry against a larger table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityError<T> {
    item: T,
}

impl<T> CapacityError<T> {
    pub(crate) fn new(item: T) -> Self {
        Self { item }
    }

    /// Recovers the item that could not be inserted.
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Display for CapacityError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("insufficient capacity")
    }
}

impl<T: fmt::Debug> core::error::Error for CapacityError<T> {}

/// Message used when the table detects that its shape changed underneath a
/// walk it was performing.
pub(crate) const CONCURRENT_MUTATION: &str =
    "hash table was mutated concurrently or its chains are corrupt";

#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn concurrent_mutation() -> ! {
    panic!("{}", CONCURRENT_MUTATION)
}
