//! Prime sizing and the fastmod reduction shared by both table flavours.
//!
//! Both the mutable table and the frozen table size their bucket arrays with
//! primes. A prime divisor keeps `hash % buckets` well distributed even when
//! the low bits of the hash are poor, and a fixed divisor lets us replace the
//! division with a multiply on 64-bit targets.

/// Largest prime that still fits the platform's array-length ceiling.
pub(crate) const MAX_PRIME_ARRAY_LENGTH: usize = 0x7FFF_FFC3;

/// Smallest table the mutable table will allocate.
const MIN_PRIME: usize = 3;

/// Bounded candidate set searched by the frozen table builder.
///
/// Each entry is roughly 1.2x the previous one, which keeps the bucket count
/// search short while still offering a choice of divisors.
pub(crate) const PRIMES: &[u32] = &[
    3, 7, 11, 17, 23, 29, 37, 47, 59, 71, 89, 107, 131, 163, 197, 239, 293, 353, 431, 521, 631,
    761, 919, 1103, 1327, 1597, 1931, 2333, 2801, 3371, 4049, 4861, 5839, 7013, 8419, 10103,
    12143, 14591, 17519, 21023, 25229, 30293, 36353, 43627, 52361, 62851, 75431, 90523, 108631,
    130363, 156437, 187751, 225307, 270371, 324449, 389357, 467237, 560689, 672827, 807403,
    968897, 1162687, 1395263, 1674319, 2009191, 2411033, 2893249, 3471899, 4166287, 4999559,
    5999471, 7199369,
];

#[inline]
pub(crate) fn is_prime(candidate: usize) -> bool {
    if candidate & 1 == 0 {
        return candidate == 2;
    }
    if candidate < 3 {
        return false;
    }

    let limit = candidate.isqrt();
    let mut divisor = 3;
    while divisor <= limit {
        if candidate % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

/// Returns the smallest prime `>= min`, never smaller than [`MIN_PRIME`].
///
/// Requests above [`MAX_PRIME_ARRAY_LENGTH`] are clamped to it; callers are
/// expected to have rejected those already.
pub(crate) fn get_prime(min: usize) -> usize {
    if min <= MIN_PRIME {
        return MIN_PRIME;
    }
    if min >= MAX_PRIME_ARRAY_LENGTH {
        return MAX_PRIME_ARRAY_LENGTH;
    }

    let mut candidate = min | 1;
    while candidate < MAX_PRIME_ARRAY_LENGTH {
        if is_prime(candidate) {
            return candidate;
        }
        candidate += 2;
    }
    MAX_PRIME_ARRAY_LENGTH
}

/// Size to grow to from `current` slots, honouring an explicit request.
///
/// The next size is the smallest prime `>= max(2 * current, current + 4,
/// requested)`, capped at [`MAX_PRIME_ARRAY_LENGTH`].
pub(crate) fn grow_size(current: usize, requested: usize) -> usize {
    let doubled = current.saturating_mul(2);
    let target = doubled.max(current.saturating_add(4)).max(requested);
    if target > MAX_PRIME_ARRAY_LENGTH {
        return MAX_PRIME_ARRAY_LENGTH;
    }
    get_prime(target)
}

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// Precomputes the reciprocal used by [`fast_mod`] for `divisor`.
        #[inline(always)]
        pub(crate) fn fast_mod_multiplier(divisor: u32) -> u64 {
            debug_assert!(divisor != 0);
            u64::MAX / divisor as u64 + 1
        }

        /// Computes `value % divisor` with two multiplications.
        ///
        /// Valid for any `divisor <= i32::MAX`, which every prime we size tables
        /// with satisfies.
        #[inline(always)]
        pub(crate) fn fast_mod(value: u32, divisor: u32, multiplier: u64) -> u32 {
            debug_assert!(divisor as usize <= MAX_PRIME_ARRAY_LENGTH);
            let high = multiplier.wrapping_mul(value as u64) >> 32;
            (((high + 1) * divisor as u64) >> 32) as u32
        }
    } else {
        #[inline(always)]
        pub(crate) fn fast_mod_multiplier(_divisor: u32) -> u64 {
            0
        }

        #[inline(always)]
        pub(crate) fn fast_mod(value: u32, divisor: u32, _multiplier: u64) -> u32 {
            value % divisor
        }
    }
}
