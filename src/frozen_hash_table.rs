//! An immutable hash table laid out for lookups.
//!
//! [`FrozenHashTable`] only stores hash codes. It is built once from the hash
//! codes of a fixed key set, groups them so that every bucket's members sit
//! next to each other, and reports for each source position where it ended
//! up. Callers permute their keys and values with that mapping and scan the
//! range returned by [`find_matching_entries`] at lookup time.
//!
//! [`find_matching_entries`]: FrozenHashTable::find_matching_entries

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use crate::hash_table::HashTable;
use crate::primes::PRIMES;
use crate::primes::fast_mod;
use crate::primes::fast_mod_multiplier;
use crate::primes::get_prime;

/// Stop searching once a candidate collides on at most this share of codes.
const ACCEPTABLE_COLLISION_RATE: f64 = 0.05;

/// Inputs at least this large search a narrower range of bucket counts.
const LARGE_INPUT_SIZE_THRESHOLD: usize = 1000;

const MAX_SMALL_BUCKET_TABLE_MULTIPLIER: usize = 16;
const MAX_LARGE_BUCKET_TABLE_MULTIPLIER: usize = 3;

const BITS_PER_WORD: usize = 32;

/// Inclusive index range of one bucket; `{0, -1}` is empty.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: i32,
    end: i32,
}

impl Bucket {
    const EMPTY: Bucket = Bucket { start: 0, end: -1 };
}

/// Layout statistics for a [`FrozenHashTable`].
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct FrozenStats {
    /// Number of stored hash codes.
    pub entries: usize,
    /// Number of buckets chosen by the bucket-count search.
    pub buckets: usize,
    /// Buckets holding at least one code.
    pub occupied_buckets: usize,
    /// Codes that share a bucket with an earlier code.
    pub collisions: usize,
    /// Size of the largest bucket.
    pub largest_bucket: usize,
}

#[cfg(any(test, feature = "stats"))]
impl FrozenStats {
    /// Pretty-print the statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Frozen Table Statistics ===");
        println!(
            "Entries: {} in {} buckets ({} occupied)",
            self.entries, self.buckets, self.occupied_buckets
        );
        println!(
            "Collisions: {}, largest bucket {}",
            self.collisions, self.largest_bucket
        );
    }
}

/// A read-only table of hash codes grouped into contiguous buckets.
#[derive(Debug, Clone)]
pub struct FrozenHashTable {
    buckets: Box<[Bucket]>,
    fast_mod_multiplier: u64,
    hash_codes: Box<[i32]>,
}

impl FrozenHashTable {
    /// Builds a table over `hash_codes`.
    ///
    /// Returns the table together with the placement of every input: entry
    /// `d` of the returned vector is the source index whose code now lives at
    /// destination `d`. Callers lay out their keys and values in that order.
    ///
    /// Set `hash_codes_are_unique` when no code repeats (for example when
    /// integer keys serve as their own codes) to skip deduplication during
    /// the bucket-count search.
    ///
    /// Codes sharing a bucket are stored in reverse input order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chain_hash::frozen_hash_table::FrozenHashTable;
    ///
    /// let codes = [10, 20, 30];
    /// let (table, sources) = FrozenHashTable::build(&codes, true);
    ///
    /// let range = table.find_matching_entries(20);
    /// let found = range.clone().any(|i| table.hash_codes()[i] == 20);
    /// assert!(found);
    /// assert_eq!(sources.len(), 3);
    /// ```
    pub fn build(hash_codes: &[i32], hash_codes_are_unique: bool) -> (Self, Vec<usize>) {
        let num_buckets = calculate_num_buckets(hash_codes, hash_codes_are_unique);
        let multiplier = fast_mod_multiplier(num_buckets as u32);

        // Scratch chains: bucket heads followed by one link per code.
        let mut bucket_starts = vec![-1i32; num_buckets];
        let mut nexts = vec![-1i32; hash_codes.len()];
        for (index, &code) in hash_codes.iter().enumerate() {
            let bucket = fast_mod(code as u32, num_buckets as u32, multiplier) as usize;
            nexts[index] = bucket_starts[bucket];
            bucket_starts[bucket] = index as i32;
        }

        let mut table_hash_codes = Vec::with_capacity(hash_codes.len());
        let mut sources = Vec::with_capacity(hash_codes.len());
        let mut buckets = vec![Bucket::EMPTY; num_buckets];
        for (bucket, &head) in buckets.iter_mut().zip(bucket_starts.iter()) {
            if head < 0 {
                continue;
            }

            let start = table_hash_codes.len() as i32;
            let mut index = head;
            while index >= 0 {
                let source = index as usize;
                table_hash_codes.push(hash_codes[source]);
                sources.push(source);
                index = nexts[source];
            }
            *bucket = Bucket {
                start,
                end: table_hash_codes.len() as i32 - 1,
            };
        }

        debug_assert_eq!(table_hash_codes.len(), hash_codes.len());
        (
            FrozenHashTable {
                buckets: buckets.into_boxed_slice(),
                fast_mod_multiplier: multiplier,
                hash_codes: table_hash_codes.into_boxed_slice(),
            },
            sources,
        )
    }

    /// Returns the index range of the bucket `hash_code` maps to.
    ///
    /// Every stored code equal to `hash_code` lies inside the range; the range
    /// may also contain other codes that share the bucket.
    #[inline]
    pub fn find_matching_entries(&self, hash_code: i32) -> Range<usize> {
        let bucket = fast_mod(
            hash_code as u32,
            self.buckets.len() as u32,
            self.fast_mod_multiplier,
        ) as usize;
        let Bucket { start, end } = self.buckets[bucket];
        start as usize..(end + 1) as usize
    }

    /// Returns the stored hash codes in destination order.
    pub fn hash_codes(&self) -> &[i32] {
        &self.hash_codes
    }

    /// Returns the number of stored hash codes.
    pub fn len(&self) -> usize {
        self.hash_codes.len()
    }

    /// Returns `true` if the table stores no hash codes.
    pub fn is_empty(&self) -> bool {
        self.hash_codes.is_empty()
    }

    /// Returns the number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns bucket occupancy statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn stats(&self) -> FrozenStats {
        let mut occupied_buckets = 0;
        let mut largest_bucket = 0;
        for bucket in self.buckets.iter() {
            let size = (bucket.end - bucket.start + 1) as usize;
            if size > 0 {
                occupied_buckets += 1;
            }
            largest_bucket = largest_bucket.max(size);
        }

        FrozenStats {
            entries: self.hash_codes.len(),
            buckets: self.buckets.len(),
            occupied_buckets,
            collisions: self.hash_codes.len() - occupied_buckets,
            largest_bucket,
        }
    }
}

/// Picks a bucket count for `hash_codes`.
///
/// Tries the primes of [`PRIMES`] from about twice the number of distinct
/// codes upwards and returns the first one whose collision rate is
/// acceptable, or else the one with the fewest collisions. Inputs too large
/// for the prime table fall back to the smallest prime above the distinct
/// count.
pub(crate) fn calculate_num_buckets(hash_codes: &[i32], hash_codes_are_unique: bool) -> usize {
    let distinct;
    let codes: &[i32] = if hash_codes_are_unique {
        hash_codes
    } else {
        distinct = distinct_codes(hash_codes);
        &distinct
    };
    let unique_count = codes.len();
    if unique_count == 0 {
        return get_prime(0);
    }

    let min_num_buckets = unique_count.saturating_mul(2);
    let min_prime_index = PRIMES
        .iter()
        .position(|&p| p as usize >= min_num_buckets)
        .unwrap_or(PRIMES.len());
    if min_prime_index >= PRIMES.len() {
        return get_prime(unique_count);
    }

    let multiplier = if unique_count >= LARGE_INPUT_SIZE_THRESHOLD {
        MAX_LARGE_BUCKET_TABLE_MULTIPLIER
    } else {
        MAX_SMALL_BUCKET_TABLE_MULTIPLIER
    };
    let mut max_num_buckets = unique_count.saturating_mul(multiplier);
    let max_prime_index = PRIMES[min_prime_index..]
        .iter()
        .position(|&p| p as usize >= max_num_buckets)
        .map_or(PRIMES.len(), |offset| min_prime_index + offset);
    if max_prime_index < PRIMES.len() {
        max_num_buckets = PRIMES[max_prime_index - 1] as usize;
    }

    let mut seen_buckets = vec![0u32; max_num_buckets / BITS_PER_WORD + 1];
    let mut best_num_buckets = max_num_buckets;
    let mut best_num_collisions = unique_count;

    for &num_buckets in &PRIMES[min_prime_index..max_prime_index] {
        let num_buckets = num_buckets as usize;
        seen_buckets.fill(0);

        let mut num_collisions = 0;
        for &code in codes {
            let bucket = code as u32 as usize % num_buckets;
            let word = &mut seen_buckets[bucket / BITS_PER_WORD];
            let bit = 1u32 << (bucket % BITS_PER_WORD);
            if *word & bit != 0 {
                num_collisions += 1;
                if num_collisions >= best_num_collisions {
                    break;
                }
            } else {
                *word |= bit;
            }
        }

        if num_collisions < best_num_collisions {
            best_num_buckets = num_buckets;
            if num_collisions as f64 / unique_count as f64 <= ACCEPTABLE_COLLISION_RATE {
                break;
            }
            best_num_collisions = num_collisions;
        }
    }

    best_num_buckets
}

/// Deduplicates hash codes, keeping first occurrences in input order.
fn distinct_codes(hash_codes: &[i32]) -> Vec<i32> {
    let mut seen: HashTable<i32, ()> = HashTable::with_capacity(hash_codes.len());
    let mut distinct = Vec::with_capacity(hash_codes.len());
    for &code in hash_codes {
        if !seen.contains(code, |&c| c == code) {
            seen.entry(code, |&c| c == code).or_insert(code, ());
            distinct.push(code);
        }
    }
    distinct
}
