//! A growable chaining hash table backed by a single raw allocation.
//!
//! The table stores `(K, V)` pairs in a dense entry array and threads
//! collision chains through it with `i32` links. Removed entries become
//! tombstones on a free list and are reused by later inserts before the
//! array grows. Callers supply the 32-bit hash and an equality predicate for
//! each operation, the same way the [`crate::HashMap`] and
//! [`crate::HashSet`] wrappers do.

use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::CapacityError;
use crate::error::TableError;
use crate::error::concurrent_mutation;
use crate::primes::MAX_PRIME_ARRAY_LENGTH;
use crate::primes::fast_mod;
use crate::primes::fast_mod_multiplier;
use crate::primes::get_prime;
use crate::primes::grow_size;

/// Link terminating a bucket chain.
const END_OF_CHAIN: i32 = -1;

/// Free-list links are stored as `START_OF_FREE_LIST - successor`, which maps
/// every successor (including `END_OF_CHAIN`) to a value below `-1`.
const START_OF_FREE_LIST: i32 = -3;

/// Largest reservation taken from an iterator's size hint. Growth covers the
/// rest once entries actually arrive.
const MAX_HINTED_RESERVE: usize = 1 << 20;

/// One record of the entry array.
///
/// `next >= -1` means the slot is live and `key`/`value` are initialized;
/// `next` is then the following entry of the bucket chain. `next < -1` means
/// the slot is a tombstone whose free-list successor is encoded in `next`, and
/// `key`/`value` must not be read.
struct Slot<K, V> {
    hash_code: i32,
    next: i32,
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

impl<K, V> Slot<K, V> {
    #[inline(always)]
    fn is_live(&self) -> bool {
        self.next >= END_OF_CHAIN
    }

    #[inline(always)]
    fn free_successor(&self) -> i32 {
        debug_assert!(!self.is_live());
        START_OF_FREE_LIST - self.next
    }

    #[inline(always)]
    fn mark_free(&mut self, successor: i32) {
        debug_assert!(successor >= END_OF_CHAIN);
        self.next = START_OF_FREE_LIST - successor;
    }
}

/// Layout of the single allocation: `size` bucket heads followed by `size`
/// entry slots.
#[derive(Debug)]
struct DataLayout {
    layout: Layout,
    entries_offset: usize,
}

impl DataLayout {
    fn new<K, V>(size: usize) -> Self {
        let buckets_layout = Layout::array::<i32>(size).expect("allocation size overflow");
        let entries_layout =
            Layout::array::<Slot<K, V>>(size).expect("allocation size overflow");

        let (layout, entries_offset) = buckets_layout
            .extend(entries_layout)
            .expect("allocation size overflow");

        DataLayout {
            layout: layout.pad_to_align(),
            entries_offset,
        }
    }

    /// Allocates memory for this layout with every bucket head zeroed.
    fn allocate(&self) -> NonNull<u8> {
        if self.layout.size() == 0 {
            return NonNull::dangling();
        }

        // SAFETY: We have validated that the layout size is non-zero. A null
        // return is routed to `handle_alloc_error`, and the zeroed prefix lies
        // entirely inside the allocation.
        unsafe {
            let raw_alloc = alloc::alloc::alloc(self.layout);
            if raw_alloc.is_null() {
                handle_alloc_error(self.layout);
            }
            core::ptr::write_bytes(raw_alloc, 0x0, self.entries_offset);
            NonNull::new_unchecked(raw_alloc)
        }
    }
}

/// Layout statistics for a [`HashTable`].
///
/// Available in tests and with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of live entries.
    pub len: usize,
    /// Number of bucket heads (equal to the entry array length).
    pub capacity: usize,
    /// Entry slots ever handed out, live or tombstoned.
    pub used_slots: usize,
    /// Tombstoned slots waiting on the free list.
    pub free_slots: usize,
    /// Buckets with at least one entry.
    pub occupied_buckets: usize,
    /// Length of the longest collision chain.
    pub longest_chain: usize,
    /// `len / capacity`.
    pub load_factor: f64,
    /// Bytes held by the table's allocation.
    pub total_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.len,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Slots: {} used, {} on the free list",
            self.used_slots, self.free_slots
        );
        println!(
            "Buckets: {} occupied, longest chain {}",
            self.occupied_buckets, self.longest_chain
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
    }
}

/// A chaining hash table with tombstone reuse and versioned cursors.
///
/// `HashTable<K, V>` stores key/value pairs in a prime-sized entry array.
/// Each operation takes the 32-bit hash of the key and an equality predicate;
/// the table never hashes keys itself, so stored hashes are reused verbatim
/// when the table grows.
///
/// Removing an entry leaves a tombstone that the next insert reuses, so the
/// slot high-water mark ([`used_slots`]) only grows when no tombstone is
/// available. Every structural change bumps [`version`], which detached
/// [`Cursor`]s check on each step.
///
/// [`used_slots`]: HashTable::used_slots
/// [`version`]: HashTable::version
///
/// ## Example
///
/// ```rust
/// use chain_hash::hash_table::Entry;
/// use chain_hash::hash_table::HashTable;
///
/// let mut table: HashTable<u32, &str> = HashTable::with_capacity(4);
///
/// // Small integers hash to themselves here; real callers use a hasher.
/// match table.entry(7, |&k| k == 7) {
///     Entry::Vacant(entry) => {
///         entry.insert(7, "seven");
///     }
///     Entry::Occupied(_) => unreachable!(),
/// }
///
/// assert_eq!(table.find(7, |&k| k == 7), Some((&7, &"seven")));
/// assert_eq!(table.remove(7, |&k| k == 7), Some((7, "seven")));
/// assert!(table.is_empty());
/// ```
pub struct HashTable<K, V> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    size: usize,
    count: usize,
    free_list: i32,
    free_count: usize,
    version: u32,
    fast_mod_multiplier: u64,

    _phantom: PhantomData<(K, V)>,
}

// SAFETY: The table owns its keys and values exclusively; the raw allocation
// is never shared between tables.
unsafe impl<K: Send, V: Send> Send for HashTable<K, V> {}
// SAFETY: Shared access only hands out shared references to keys and values.
unsafe impl<K: Sync, V: Sync> Sync for HashTable<K, V> {}

impl<K, V> Debug for HashTable<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        struct Entries<'a, K, V>(&'a HashTable<K, V>);

        impl<K: Debug, V: Debug> Debug for Entries<'_, K, V> {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.debug_map().entries(self.0.iter()).finish()
            }
        }

        f.debug_struct("HashTable")
            .field("len", &self.len())
            .field("capacity", &self.size)
            .field("used_slots", &self.count)
            .field("free_count", &self.free_count)
            .field("version", &self.version)
            .field("entries", &Entries(self))
            .finish()
    }
}

impl<K, V> Clone for HashTable<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        let mut new_table = Self::unallocated();
        new_table.layout = DataLayout::new::<K, V>(self.size);
        new_table.alloc = new_table.layout.allocate();
        new_table.size = self.size;
        new_table.fast_mod_multiplier = self.fast_mod_multiplier;

        // SAFETY: Both tables have the same size. Source slots below `count`
        // are initialized, and their keys and values are initialized exactly
        // when the slot is live. `new_table.count` only advances past slots
        // that have been fully written, so a panicking `clone` leaves a table
        // that drops what it holds.
        unsafe {
            for index in 0..self.count {
                let src = self.slot(index);
                let (key, value) = if src.is_live() {
                    (
                        MaybeUninit::new(src.key.assume_init_ref().clone()),
                        MaybeUninit::new(src.value.assume_init_ref().clone()),
                    )
                } else {
                    (MaybeUninit::uninit(), MaybeUninit::uninit())
                };

                new_table.slot_ptr(index).write(Slot {
                    hash_code: src.hash_code,
                    next: src.next,
                    key,
                    value,
                });
                new_table.count += 1;
            }
        }

        new_table.buckets_mut().copy_from_slice(self.buckets());
        new_table.free_list = self.free_list;
        new_table.free_count = self.free_count;
        new_table.version = self.version;

        debug_assert_eq!(new_table.len(), self.len());
        new_table
    }
}

impl<K, V> Drop for HashTable<K, V> {
    fn drop(&mut self) {
        // SAFETY: Only live slots below `count` have initialized keys and
        // values. The allocation was created from `self.layout`.
        unsafe {
            self.drop_live_entries();

            if self.layout.layout.size() != 0 {
                alloc::alloc::dealloc(self.alloc.as_ptr(), self.layout.layout);
            }
        }
    }
}

impl<K, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> HashTable<K, V> {
    fn unallocated() -> Self {
        Self {
            layout: DataLayout::new::<K, V>(0),
            alloc: NonNull::dangling(),
            size: 0,
            count: 0,
            free_list: END_OF_CHAIN,
            free_count: 0,
            version: 0,
            fast_mod_multiplier: 0,
            _phantom: PhantomData,
        }
    }

    /// Creates an empty table without allocating.
    ///
    /// The first insert sizes the table to the smallest supported prime.
    pub fn new() -> Self {
        Self::unallocated()
    }

    /// Creates a table whose entry array holds at least `capacity` entries.
    ///
    /// The array length is the smallest prime `>= capacity`. A capacity of
    /// zero allocates nothing.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds the largest supported table size. See
    /// [`try_with_capacity`](Self::try_with_capacity) for a fallible version.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// let table: HashTable<u64, String> = HashTable::with_capacity(100);
    /// assert_eq!(table.capacity(), 101);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        match Self::try_with_capacity(capacity) {
            Ok(table) => table,
            Err(err) => panic!("{}", err),
        }
    }

    /// Fallible version of [`with_capacity`](Self::with_capacity).
    ///
    /// Fails before allocating if `capacity` exceeds the largest supported
    /// table size.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TableError> {
        if capacity > MAX_PRIME_ARRAY_LENGTH {
            return Err(TableError::CapacityOverflow {
                requested: capacity,
            });
        }

        let mut table = Self::unallocated();
        if capacity > 0 {
            table.initialize(get_prime(capacity));
        }
        Ok(table)
    }

    fn initialize(&mut self, size: usize) {
        debug_assert!(self.size == 0 && self.count == 0);
        self.layout = DataLayout::new::<K, V>(size);
        self.alloc = self.layout.allocate();
        self.size = size;
        self.fast_mod_multiplier = fast_mod_multiplier(size as u32);
    }

    #[inline(always)]
    fn buckets(&self) -> &[i32] {
        if self.size == 0 {
            return &[];
        }
        // SAFETY: The allocation starts with `size` bucket heads, all of which
        // were zeroed on allocation and only ever hold valid `i32`s.
        unsafe { core::slice::from_raw_parts(self.alloc.as_ptr().cast::<i32>(), self.size) }
    }

    #[inline(always)]
    fn buckets_mut(&mut self) -> &mut [i32] {
        if self.size == 0 {
            return &mut [];
        }
        // SAFETY: See `buckets`; `&mut self` guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.alloc.as_ptr().cast::<i32>(), self.size) }
    }

    /// Pointer to slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be below `self.size`.
    #[inline(always)]
    unsafe fn slot_ptr(&self, index: usize) -> *mut Slot<K, V> {
        debug_assert!(index < self.size);
        // SAFETY: Caller ensures `index < size`, so the offset stays inside the
        // entry region of the allocation.
        unsafe {
            self.alloc
                .as_ptr()
                .add(self.layout.entries_offset)
                .cast::<Slot<K, V>>()
                .add(index)
        }
    }

    /// # Safety
    ///
    /// `index` must be below `self.count`.
    #[inline(always)]
    unsafe fn slot(&self, index: usize) -> &Slot<K, V> {
        debug_assert!(index < self.count);
        // SAFETY: Slots below `count` have initialized `hash_code` and `next`.
        unsafe { &*self.slot_ptr(index) }
    }

    /// # Safety
    ///
    /// `index` must be below `self.count`.
    #[inline(always)]
    unsafe fn slot_mut(&mut self, index: usize) -> &mut Slot<K, V> {
        debug_assert!(index < self.count);
        // SAFETY: Slots below `count` have initialized `hash_code` and `next`,
        // and `&mut self` guarantees exclusive access.
        unsafe { &mut *self.slot_ptr(index) }
    }

    #[inline(always)]
    fn bucket_index(&self, hash: i32) -> usize {
        fast_mod(hash as u32, self.size as u32, self.fast_mod_multiplier) as usize
    }

    /// Turns a chain link into a slot index, treating anything outside the
    /// used slots as corruption.
    #[inline(always)]
    fn checked_link(&self, link: i32) -> usize {
        let index = link as usize;
        if index >= self.count {
            concurrent_mutation();
        }
        index
    }

    /// Walks the chain for `hash`, returning the slot holding a matching key.
    #[inline]
    fn find_index(&self, hash: i32, eq: impl Fn(&K) -> bool) -> Option<usize> {
        if self.size == 0 {
            return None;
        }

        let mut link = self.buckets()[self.bucket_index(hash)] - 1;
        let mut collisions = 0usize;
        while link >= 0 {
            let index = self.checked_link(link);
            // SAFETY: `checked_link` validated `index < count`. A slot reached
            // through a chain is live, so its key is initialized.
            let slot = unsafe { self.slot(index) };
            if slot.hash_code == hash && eq(unsafe { slot.key.assume_init_ref() }) {
                return Some(index);
            }

            link = slot.next;
            collisions += 1;
            if collisions > self.size {
                concurrent_mutation();
            }
        }

        None
    }

    /// Returns the number of live entries in the table.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<i32, &str> = HashTable::new();
    /// assert_eq!(table.len(), 0);
    ///
    /// table.entry(1, |&k| k == 1).or_insert(1, "one");
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.count - self.free_count
    }

    /// Returns `true` if the table contains no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the length of the entry array.
    ///
    /// This is the number of entries the table holds before it grows.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Returns the slot high-water mark: live entries plus tombstones.
    pub fn used_slots(&self) -> usize {
        self.count
    }

    /// Returns the generation counter.
    ///
    /// The value changes on every insert, removal, clear and reallocation.
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline(always)]
    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Finds the entry matching `hash` and `eq`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<i32, &str> = HashTable::new();
    /// table.entry(42, |&k| k == 42).or_insert(42, "answer");
    ///
    /// assert_eq!(table.find(42, |&k| k == 42), Some((&42, &"answer")));
    /// assert_eq!(table.find(99, |&k| k == 99), None);
    /// ```
    #[inline]
    pub fn find(&self, hash: i32, eq: impl Fn(&K) -> bool) -> Option<(&K, &V)> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns live slots below `count`.
        unsafe {
            let slot = self.slot(index);
            Some((slot.key.assume_init_ref(), slot.value.assume_init_ref()))
        }
    }

    /// Finds the entry matching `hash` and `eq`, returning a mutable
    /// reference to its value.
    #[inline]
    pub fn find_mut(&mut self, hash: i32, eq: impl Fn(&K) -> bool) -> Option<(&K, &mut V)> {
        let index = self.find_index(hash, eq)?;
        // SAFETY: `find_index` only returns live slots below `count`.
        unsafe {
            let slot = self.slot_mut(index);
            Some((slot.key.assume_init_ref(), slot.value.assume_init_mut()))
        }
    }

    /// Returns `true` if an entry matches `hash` and `eq`.
    pub fn contains(&self, hash: i32, eq: impl Fn(&K) -> bool) -> bool {
        self.find_index(hash, eq).is_some()
    }

    /// Gets the entry for `hash` and `eq` for in-place insertion or
    /// modification.
    ///
    /// A vacant entry does not reserve anything; the table only grows when
    /// [`VacantEntry::insert`] needs a slot and no tombstone is available.
    #[inline]
    pub fn entry(&mut self, hash: i32, eq: impl Fn(&K) -> bool) -> Entry<'_, K, V> {
        match self.find_index(hash, eq) {
            Some(index) => Entry::Occupied(OccupiedEntry { table: self, index }),
            None => Entry::Vacant(VacantEntry { table: self, hash }),
        }
    }

    /// Removes the entry matching `hash` and `eq`, returning it.
    ///
    /// The slot becomes a tombstone that the next insert reuses.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<i32, char> = HashTable::new();
    /// table.entry(42, |&k| k == 42).or_insert(42, 'x');
    ///
    /// assert_eq!(table.remove(42, |&k| k == 42), Some((42, 'x')));
    /// assert_eq!(table.remove(42, |&k| k == 42), None);
    /// assert_eq!(table.used_slots(), 1);
    /// ```
    pub fn remove(&mut self, hash: i32, eq: impl Fn(&K) -> bool) -> Option<(K, V)> {
        let index = self.find_index(hash, eq)?;
        Some(self.remove_at(index))
    }

    /// Unlinks the live slot `index` from its chain and tombstones it.
    fn remove_at(&mut self, index: usize) -> (K, V) {
        // SAFETY: Callers pass live slots below `count`.
        let (hash, next) = unsafe {
            let slot = self.slot(index);
            debug_assert!(slot.is_live());
            (slot.hash_code, slot.next)
        };

        let bucket = self.bucket_index(hash);
        let mut last = END_OF_CHAIN;
        let mut link = self.buckets()[bucket] - 1;
        let mut collisions = 0usize;
        while link as usize != index {
            if link < 0 {
                concurrent_mutation();
            }
            last = link;
            // SAFETY: `checked_link` validated the index.
            link = unsafe { self.slot(self.checked_link(link)).next };
            collisions += 1;
            if collisions > self.size {
                concurrent_mutation();
            }
        }

        if last < 0 {
            self.buckets_mut()[bucket] = next + 1;
        } else {
            // SAFETY: `last` was reached through the chain and validated.
            unsafe { self.slot_mut(last as usize).next = next };
        }

        let free_list = self.free_list;
        // SAFETY: The slot is live, so its key and value are initialized. They
        // are moved out before the slot is marked free and never read again.
        let entry = unsafe {
            let slot = self.slot_mut(index);
            let entry = (slot.key.assume_init_read(), slot.value.assume_init_read());
            slot.mark_free(free_list);
            entry
        };

        self.free_list = index as i32;
        self.free_count += 1;
        self.bump_version();
        entry
    }

    /// Pops a tombstone off the free list or hands out the next fresh slot.
    ///
    /// Returns `None` when the table is full and `may_grow` is false.
    fn take_slot(&mut self, may_grow: bool) -> Option<usize> {
        if self.free_count > 0 {
            let index = self.checked_link(self.free_list);
            // SAFETY: Free-list links always point at tombstones below `count`.
            self.free_list = unsafe { self.slot(index).free_successor() };
            self.free_count -= 1;
            return Some(index);
        }

        if self.count == self.size {
            if !may_grow {
                return None;
            }
            self.grow();
        }

        let index = self.count;
        self.count += 1;
        Some(index)
    }

    /// Writes a new live entry into `index` and pushes it onto its bucket.
    ///
    /// # Safety
    ///
    /// `index` must have just been returned by `take_slot`.
    unsafe fn link_new(&mut self, index: usize, hash: i32, key: K, value: V) -> &mut V {
        let bucket = self.bucket_index(hash);
        let head = self.buckets()[bucket];

        // SAFETY: `index < size` per the caller. The slot is either fresh or a
        // tombstone whose key and value were already moved out, so nothing is
        // leaked by overwriting it.
        unsafe {
            self.slot_ptr(index).write(Slot {
                hash_code: hash,
                next: head - 1,
                key: MaybeUninit::new(key),
                value: MaybeUninit::new(value),
            });
        }
        self.buckets_mut()[bucket] = index as i32 + 1;
        self.bump_version();

        // SAFETY: The slot was initialized above.
        unsafe { self.slot_mut(index).value.assume_init_mut() }
    }

    #[cold]
    #[inline(never)]
    fn grow(&mut self) {
        let new_size = if self.size == 0 {
            get_prime(0)
        } else {
            grow_size(self.size, 0)
        };

        if new_size <= self.size {
            panic!(
                "{}",
                TableError::CapacityOverflow {
                    requested: self.size.saturating_add(1),
                }
            );
        }

        self.rehash(new_size);
    }

    /// Moves every live entry into a fresh allocation of `new_size` slots.
    ///
    /// Live entries are packed to the front of the new array in their current
    /// slot order and relinked from their stored hashes. Tombstones are not
    /// carried over, so the free list is empty afterwards.
    fn rehash(&mut self, new_size: usize) {
        debug_assert!(new_size >= self.len());

        let new_layout = DataLayout::new::<K, V>(new_size);
        let new_alloc = new_layout.allocate();

        let old_layout = core::mem::replace(&mut self.layout, new_layout);
        let old_alloc = core::mem::replace(&mut self.alloc, new_alloc);
        let old_count = core::mem::replace(&mut self.count, 0);
        self.size = new_size;
        self.free_list = END_OF_CHAIN;
        self.free_count = 0;
        self.fast_mod_multiplier = if new_size == 0 {
            0
        } else {
            fast_mod_multiplier(new_size as u32)
        };

        // SAFETY: Old slots below `old_count` are initialized. Live slots are
        // moved bitwise into the new allocation exactly once and the old
        // allocation is freed without dropping anything, so ownership of every
        // key and value transfers to the new array.
        unsafe {
            if old_count > 0 {
                let old_entries = old_alloc
                    .as_ptr()
                    .add(old_layout.entries_offset)
                    .cast::<Slot<K, V>>();

                for old_index in 0..old_count {
                    let src = old_entries.add(old_index);
                    if !(*src).is_live() {
                        continue;
                    }

                    let index = self.count;
                    let bucket = self.bucket_index((*src).hash_code);
                    let dst = self.slot_ptr(index);
                    core::ptr::copy_nonoverlapping(src, dst, 1);
                    self.count += 1;

                    (*dst).next = self.buckets()[bucket] - 1;
                    self.buckets_mut()[bucket] = index as i32 + 1;
                }
            }

            if old_layout.layout.size() != 0 {
                alloc::alloc::dealloc(old_alloc.as_ptr(), old_layout.layout);
            }
        }

        self.bump_version();
    }

    /// Grows the entry array to hold at least `capacity` entries.
    ///
    /// Returns the resulting capacity. Does nothing if the table is already
    /// large enough.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds the largest supported table size.
    pub fn ensure_capacity(&mut self, capacity: usize) -> usize {
        match self.try_ensure_capacity(capacity) {
            Ok(capacity) => capacity,
            Err(err) => panic!("{}", err),
        }
    }

    /// Fallible version of [`ensure_capacity`](Self::ensure_capacity).
    pub fn try_ensure_capacity(&mut self, capacity: usize) -> Result<usize, TableError> {
        if capacity > MAX_PRIME_ARRAY_LENGTH {
            return Err(TableError::CapacityOverflow {
                requested: capacity,
            });
        }

        if self.size < capacity {
            self.rehash(get_prime(capacity));
        }
        Ok(self.size)
    }

    /// Reserves room for at least `additional` more entries.
    ///
    /// Tombstones count as room, since inserts reuse them first.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.len().saturating_add(additional);
        if required > self.size {
            self.ensure_capacity(required);
        }
    }

    /// Reserves for a batch of about `hint` entries whose keys may repeat.
    ///
    /// Only half the hint is taken when the table already holds entries, and
    /// never more than [`MAX_HINTED_RESERVE`].
    pub(crate) fn reserve_for_hint(&mut self, hint: usize) {
        let additional = if self.is_empty() {
            hint
        } else {
            hint.div_ceil(2)
        };
        self.reserve(additional.min(MAX_HINTED_RESERVE));
    }

    /// Shrinks the table to the smallest prime that fits its live entries.
    ///
    /// Nothing happens unless the live entries fill less than 90% of the
    /// current capacity. An empty table releases its allocation entirely.
    /// Trimming compacts the entry array and empties the free list.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<i32, i32> = HashTable::with_capacity(1000);
    /// table.entry(5, |&k| k == 5).or_insert(5, 50);
    /// table.entry(10, |&k| k == 10).or_insert(10, 100);
    ///
    /// table.trim_excess();
    /// assert_eq!(table.capacity(), 3);
    /// assert_eq!(table.find(10, |&k| k == 10), Some((&10, &100)));
    /// ```
    pub fn trim_excess(&mut self) {
        let len = self.len();
        if len == 0 {
            if self.size != 0 {
                self.release();
            }
            return;
        }

        let threshold = ((self.size as u128 * 9) / 10) as usize;
        if len >= threshold {
            return;
        }

        let new_size = get_prime(len);
        if new_size < self.size {
            self.rehash(new_size);
        }
    }

    /// Shrinks the table to the smallest prime `>= capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is smaller than [`len`](Self::len). See
    /// [`try_trim_excess_to`](Self::try_trim_excess_to) for a fallible
    /// version.
    pub fn trim_excess_to(&mut self, capacity: usize) {
        if let Err(err) = self.try_trim_excess_to(capacity) {
            panic!("{}", err);
        }
    }

    /// Fallible version of [`trim_excess_to`](Self::trim_excess_to).
    ///
    /// Does nothing if the target is not smaller than the current capacity.
    /// Trimming an empty table to zero releases its allocation.
    pub fn try_trim_excess_to(&mut self, capacity: usize) -> Result<(), TableError> {
        let len = self.len();
        if capacity < len {
            return Err(TableError::CapacityBelowLen {
                requested: capacity,
                len,
            });
        }
        if capacity > MAX_PRIME_ARRAY_LENGTH {
            return Err(TableError::CapacityOverflow {
                requested: capacity,
            });
        }

        if capacity == 0 {
            if self.size != 0 {
                self.release();
            }
            return Ok(());
        }

        let new_size = get_prime(capacity);
        if new_size < self.size {
            self.rehash(new_size);
        }
        Ok(())
    }

    fn release(&mut self) {
        debug_assert!(self.is_empty());
        self.rehash(0);
    }

    /// Drops every live entry in place.
    ///
    /// # Safety
    ///
    /// Leaves the table pointing at moved-out slots; the caller must reset
    /// `count`, the free list and the bucket heads (or free the allocation)
    /// before the table is used again.
    unsafe fn drop_live_entries(&mut self) {
        if !(core::mem::needs_drop::<K>() || core::mem::needs_drop::<V>()) {
            return;
        }

        for index in 0..self.count {
            // SAFETY: Slots below `count` are initialized; keys and values are
            // only dropped for live slots.
            unsafe {
                let slot = self.slot_mut(index);
                if slot.is_live() {
                    slot.key.assume_init_drop();
                    slot.value.assume_init_drop();
                }
            }
        }
    }

    /// Removes all entries, keeping the allocation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<i32, ()> = HashTable::with_capacity(10);
    /// table.entry(1, |&k| k == 1).or_insert(1, ());
    /// table.entry(2, |&k| k == 2).or_insert(2, ());
    ///
    /// table.clear();
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), 11);
    /// ```
    pub fn clear(&mut self) {
        if self.count == 0 {
            return;
        }

        // SAFETY: The bookkeeping is reset immediately afterwards.
        unsafe { self.drop_live_entries() };

        self.buckets_mut().fill(0);
        self.count = 0;
        self.free_list = END_OF_CHAIN;
        self.free_count = 0;
        self.bump_version();
    }

    /// Keeps only the entries for which `f` returns `true`.
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        for index in 0..self.count {
            // SAFETY: `index < count`; the key and value are only touched for
            // live slots.
            let keep = unsafe {
                let slot = self.slot_mut(index);
                if !slot.is_live() {
                    continue;
                }
                f(slot.key.assume_init_ref(), slot.value.assume_init_mut())
            };

            if !keep {
                drop(self.remove_at(index));
            }
        }
    }

    /// Returns an iterator over the live entries in slot order.
    ///
    /// Slot order matches insertion order until a removal frees a slot that
    /// a later insert reuses.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// let mut table: HashTable<i32, i32> = HashTable::new();
    /// for k in [3, 1, 2] {
    ///     table.entry(k, |&x| x == k).or_insert(k, k * 10);
    /// }
    ///
    /// let keys: Vec<i32> = table.iter().map(|(k, _)| *k).collect();
    /// assert_eq!(keys, vec![3, 1, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            table: self,
            index: 0,
            remaining: self.len(),
        }
    }

    /// Returns an iterator over the live entries with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        let remaining = self.len();
        let base = if self.size == 0 {
            NonNull::dangling()
        } else {
            // SAFETY: `size > 0`, so slot 0 lies inside the allocation.
            unsafe { NonNull::new_unchecked(self.slot_ptr(0)) }
        };

        IterMut {
            base,
            count: self.count,
            index: 0,
            remaining,
            _marker: PhantomData,
        }
    }

    /// Removes and yields every live entry in slot order.
    ///
    /// The table is empty as soon as this is called; entries not consumed by
    /// the iterator are dropped when it is. Leaking the iterator leaks those
    /// entries but leaves the table valid.
    pub fn drain(&mut self) -> Drain<'_, K, V> {
        let remaining = self.len();
        let count = core::mem::replace(&mut self.count, 0);
        self.free_list = END_OF_CHAIN;
        self.free_count = 0;
        self.buckets_mut().fill(0);
        if count > 0 {
            self.bump_version();
        }

        Drain {
            table: self,
            count,
            index: 0,
            remaining,
        }
    }

    /// Returns a detached enumeration cursor positioned before the first
    /// entry.
    ///
    /// Unlike [`iter`](Self::iter), a cursor does not borrow the table, so the
    /// table may be mutated while it exists. Any structural change makes the
    /// next [`Cursor::advance`] panic.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            index: 0,
            version: self.version,
        }
    }

    /// Computes a histogram of chain lengths.
    ///
    /// Index `n` holds the number of buckets whose chain has `n` entries.
    #[cfg(any(test, feature = "stats"))]
    pub fn chain_length_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut hist = alloc::vec![0usize; 1];
        for &head in self.buckets() {
            let mut length = 0;
            let mut link = head - 1;
            while link >= 0 {
                length += 1;
                // SAFETY: Chain links point at live slots below `count`.
                link = unsafe { self.slot(self.checked_link(link)).next };
            }
            if hist.len() <= length {
                hist.resize(length + 1, 0);
            }
            hist[length] += 1;
        }
        hist
    }

    /// Returns layout statistics for debugging.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let hist = self.chain_length_histogram();
        let occupied_buckets = hist.iter().skip(1).sum();

        DebugStats {
            len: self.len(),
            capacity: self.size,
            used_slots: self.count,
            free_slots: self.free_count,
            occupied_buckets,
            longest_chain: hist.len() - 1,
            load_factor: if self.size == 0 {
                0.0
            } else {
                self.len() as f64 / self.size as f64
            },
            total_bytes: self.layout.layout.size(),
        }
    }
}

/// A view into a single entry in the table, which may be vacant or occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashTable`].
///
/// [`entry`]: HashTable::entry
pub enum Entry<'a, K, V> {
    /// No entry matched.
    Vacant(VacantEntry<'a, K, V>),
    /// An entry matched.
    Occupied(OccupiedEntry<'a, K, V>),
}

impl<'a, K, V> Entry<'a, K, V> {
    /// Inserts `(key, value)` if the entry is vacant and returns a mutable
    /// reference to the value now stored.
    pub fn or_insert(self, key: K, value: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(key, value),
        }
    }

    /// Inserts the pair computed by `default` if the entry is vacant.
    pub fn or_insert_with(self, default: impl FnOnce() -> (K, V)) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let (key, value) = default();
                entry.insert(key, value)
            }
        }
    }

    /// Applies `f` to the value of an occupied entry.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Self {
        match self {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Entry::Occupied(entry)
            }
            Entry::Vacant(entry) => Entry::Vacant(entry),
        }
    }
}

/// A vacant entry in a [`HashTable`].
pub struct VacantEntry<'a, K, V> {
    table: &'a mut HashTable<K, V>,
    hash: i32,
}

impl<'a, K, V> VacantEntry<'a, K, V> {
    /// Inserts the pair, growing the table if no slot is free.
    pub fn insert(self, key: K, value: V) -> &'a mut V {
        let index = match self.table.take_slot(true) {
            Some(index) => index,
            None => unreachable!("growable insert always finds a slot"),
        };
        // SAFETY: `index` was just handed out by `take_slot`.
        unsafe { self.table.link_new(index, self.hash, key, value) }
    }

    /// Inserts the pair only if the table has a free slot, without growing.
    ///
    /// On failure the pair is handed back inside the error.
    pub fn try_insert(self, key: K, value: V) -> Result<&'a mut V, CapacityError<(K, V)>> {
        match self.table.take_slot(false) {
            // SAFETY: `index` was just handed out by `take_slot`.
            Some(index) => Ok(unsafe { self.table.link_new(index, self.hash, key, value) }),
            None => Err(CapacityError::new((key, value))),
        }
    }

    /// Returns the hash this entry was looked up with.
    pub fn hash(&self) -> i32 {
        self.hash
    }
}

/// An occupied entry in a [`HashTable`].
pub struct OccupiedEntry<'a, K, V> {
    table: &'a mut HashTable<K, V>,
    index: usize,
}

impl<'a, K, V> OccupiedEntry<'a, K, V> {
    /// Gets a reference to the stored key.
    pub fn key(&self) -> &K {
        // SAFETY: `index` is a live slot found by `find_index`.
        unsafe { self.table.slot(self.index).key.assume_init_ref() }
    }

    /// Gets a reference to the stored value.
    pub fn get(&self) -> &V {
        // SAFETY: `index` is a live slot found by `find_index`.
        unsafe { self.table.slot(self.index).value.assume_init_ref() }
    }

    /// Gets a mutable reference to the stored value.
    pub fn get_mut(&mut self) -> &mut V {
        // SAFETY: `index` is a live slot found by `find_index`.
        unsafe { self.table.slot_mut(self.index).value.assume_init_mut() }
    }

    /// Converts the entry into a mutable reference to the stored value.
    pub fn into_mut(self) -> &'a mut V {
        // SAFETY: `index` is a live slot found by `find_index`.
        unsafe { self.table.slot_mut(self.index).value.assume_init_mut() }
    }

    /// Replaces the stored value, returning the old one.
    ///
    /// Overwriting a value is not a structural change and leaves the version
    /// untouched.
    pub fn insert(&mut self, value: V) -> V {
        core::mem::replace(self.get_mut(), value)
    }

    /// Replaces the stored key with an equal one, returning the old key.
    ///
    /// The new key must hash and compare equal to the old one.
    pub fn replace_key(&mut self, key: K) -> K {
        // SAFETY: `index` is a live slot found by `find_index`.
        unsafe {
            let slot = self.table.slot_mut(self.index);
            core::mem::replace(slot.key.assume_init_mut(), key)
        }
    }

    /// Removes the entry, returning the stored pair.
    pub fn remove(self) -> (K, V) {
        self.table.remove_at(self.index)
    }
}

/// A detached enumeration position over a [`HashTable`].
///
/// Created by [`HashTable::cursor`]. The cursor remembers the table version
/// it was created at and panics on [`advance`](Cursor::advance) if the table
/// has been structurally modified since.
#[derive(Debug, Clone)]
pub struct Cursor {
    index: usize,
    version: u32,
}

impl Cursor {
    /// Steps to the next live entry.
    ///
    /// # Panics
    ///
    /// Panics if `table` was inserted into, removed from, cleared or resized
    /// after the cursor was created.
    #[track_caller]
    pub fn advance<'t, K, V>(&mut self, table: &'t HashTable<K, V>) -> Option<(&'t K, &'t V)> {
        if self.version != table.version {
            concurrent_mutation();
        }

        while self.index < table.count {
            // SAFETY: `index < count`; keys and values are only read for live
            // slots.
            let slot = unsafe { table.slot(self.index) };
            self.index += 1;
            if slot.is_live() {
                // SAFETY: The slot is live.
                return Some(unsafe { (slot.key.assume_init_ref(), slot.value.assume_init_ref()) });
            }
        }

        None
    }
}

/// An iterator over the entries of a [`HashTable`] in slot order.
///
/// This struct is created by the [`iter`] method on [`HashTable`].
///
/// [`iter`]: HashTable::iter
pub struct Iter<'a, K, V> {
    table: &'a HashTable<K, V>,
    index: usize,
    remaining: usize,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter { ..*self }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.table.count {
            // SAFETY: `index < count`; keys and values are only read for live
            // slots.
            let slot = unsafe { self.table.slot(self.index) };
            self.index += 1;
            if slot.is_live() {
                self.remaining -= 1;
                // SAFETY: The slot is live.
                return Some(unsafe { (slot.key.assume_init_ref(), slot.value.assume_init_ref()) });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// A mutable iterator over the entries of a [`HashTable`] in slot order.
pub struct IterMut<'a, K, V> {
    base: NonNull<Slot<K, V>>,
    count: usize,
    index: usize,
    remaining: usize,
    _marker: PhantomData<&'a mut HashTable<K, V>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.count {
            // SAFETY: `index < count` for the exclusively borrowed table, and
            // every index is yielded at most once, so the returned references
            // never alias.
            let slot = unsafe { &mut *self.base.as_ptr().add(self.index) };
            self.index += 1;
            if slot.is_live() {
                self.remaining -= 1;
                // SAFETY: The slot is live.
                return Some(unsafe { (slot.key.assume_init_ref(), slot.value.assume_init_mut()) });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// A draining iterator over the entries of a [`HashTable`].
///
/// This struct is created by the [`drain`] method on [`HashTable`].
///
/// [`drain`]: HashTable::drain
pub struct Drain<'a, K, V> {
    table: &'a mut HashTable<K, V>,
    count: usize,
    index: usize,
    remaining: usize,
}

impl<K, V> Drop for Drain<'_, K, V> {
    fn drop(&mut self) {
        for _ in &mut *self {}
    }
}

impl<K, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.count {
            // SAFETY: The table's `count` was reset when the drain started, but
            // the slots below our own `count` are still initialized. Each live
            // slot is read out exactly once.
            unsafe {
                let slot = &*self.table.slot_ptr(self.index);
                self.index += 1;
                if slot.is_live() {
                    self.remaining -= 1;
                    return Some((slot.key.assume_init_read(), slot.value.assume_init_read()));
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Drain<'_, K, V> {}
impl<K, V> FusedIterator for Drain<'_, K, V> {}

impl<K, V> IntoIterator for HashTable<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(mut self) -> Self::IntoIter {
        let remaining = self.len();
        let count = core::mem::replace(&mut self.count, 0);
        self.free_list = END_OF_CHAIN;
        self.free_count = 0;

        IntoIter {
            table: self,
            count,
            index: 0,
            remaining,
        }
    }
}

/// An owning iterator over the entries of a [`HashTable`] in slot order.
pub struct IntoIter<K, V> {
    table: HashTable<K, V>,
    count: usize,
    index: usize,
    remaining: usize,
}

impl<K, V> Drop for IntoIter<K, V> {
    fn drop(&mut self) {
        for _ in &mut *self {}
    }
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.count {
            // SAFETY: Same as `Drain::next`; the table's own `count` is zero so
            // its `Drop` only frees the allocation.
            unsafe {
                let slot = &*self.table.slot_ptr(self.index);
                self.index += 1;
                if slot.is_live() {
                    self.remaining -= 1;
                    return Some((slot.key.assume_init_read(), slot.value.assume_init_read()));
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}
impl<K, V> FusedIterator for IntoIter<K, V> {}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::fold_hash;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    fn hash_key(state: &HashState, key: u64) -> i32 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        fold_hash(h.finish())
    }

    fn hash_string_key(state: &HashState, key: &str) -> i32 {
        let mut h = state.build_hasher();
        h.write(key.as_bytes());
        fold_hash(h.finish())
    }

    fn insert_new(table: &mut HashTable<u64, i32>, hash: i32, key: u64, value: i32) {
        match table.entry(hash, |&k| k == key) {
            Entry::Vacant(v) => {
                v.insert(key, value);
            }
            Entry::Occupied(_) => panic!("unexpected occupied for {key}: {:#?}", table),
        }
    }

    #[test]
    fn insert_and_find() {
        let state = HashState::default();
        let mut table: HashTable<u64, i32> = HashTable::new();
        for k in 0..32u64 {
            let hash = hash_key(&state, k);
            insert_new(&mut table, hash, k, (k as i32) * 2);
            assert_eq!(
                table.find(hash, |&x| x == k),
                Some((&k, &((k as i32) * 2))),
                "{:#?}",
                table
            );
        }
        assert_eq!(table.len(), 32);
        for k in 0..32u64 {
            let hash = hash_key(&state, k);
            assert_eq!(table.find(hash, |&x| x == k), Some((&k, &((k as i32) * 2))));
        }

        let miss_hash = hash_key(&state, 999);
        assert!(table.find(miss_hash, |&x| x == 999).is_none());
    }

    #[test]
    fn duplicate_entry_is_occupied() {
        let state = HashState::default();
        let mut table: HashTable<u64, i32> = HashTable::new();
        let k = 42u64;
        let hash = hash_key(&state, k);

        insert_new(&mut table, hash, k, 7);
        let version = table.version();

        match table.entry(hash, |&x| x == k) {
            Entry::Occupied(mut occ) => {
                assert_eq!(occ.insert(11), 7);
                assert_eq!(occ.key(), &k);
            }
            Entry::Vacant(_) => panic!("should be occupied: {:#?}", table),
        }
        assert_eq!(table.find(hash, |&x| x == k), Some((&k, &11)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.version(), version);
    }

    #[test]
    fn find_mut_and_modify() {
        let state = HashState::default();
        let mut table: HashTable<u64, i32> = HashTable::new();
        for k in 0..5u64 {
            insert_new(&mut table, hash_key(&state, k), k, 1);
        }

        for k in 0..5u64 {
            if let Some((_, v)) = table.find_mut(hash_key(&state, k), |&x| x == k) {
                *v += 9;
            }
        }
        for k in 0..5u64 {
            assert_eq!(table.find(hash_key(&state, k), |&x| x == k), Some((&k, &10)));
        }
    }

    #[test]
    fn remove_items() {
        let state = HashState::default();
        let mut table: HashTable<u64, i32> = HashTable::new();
        for k in 0..8u64 {
            insert_new(&mut table, hash_key(&state, k), k, k as i32);
        }
        assert_eq!(table.len(), 8);
        for k in [0u64, 3, 7] {
            let removed = table
                .remove(hash_key(&state, k), |&x| x == k)
                .expect("should remove");
            assert_eq!(removed, (k, k as i32));
        }
        assert_eq!(table.len(), 5);
        assert_eq!(table.used_slots(), 8);

        assert!(table.remove(hash_key(&state, 1000), |&x| x == 1000).is_none());
        for k in [1u64, 2, 4, 5, 6] {
            assert!(table.contains(hash_key(&state, k), |&x| x == k));
        }
    }

    #[test]
    fn initial_capacity_is_prime_rounded() {
        let mut table: HashTable<u64, i32> = HashTable::with_capacity(4);
        assert_eq!(table.capacity(), 5);

        for k in 1..=5u64 {
            insert_new(&mut table, k as i32, k, k as i32 * 10);
        }
        assert_eq!(table.capacity(), 5);
        assert_eq!(table.len(), 5);

        insert_new(&mut table, 6, 6, 60);
        assert_eq!(table.capacity(), 11);
        for k in 1..=6u64 {
            assert_eq!(table.find(k as i32, |&x| x == k), Some((&k, &(k as i32 * 10))));
        }
    }

    #[test]
    fn tombstones_are_reused_lifo() {
        let mut table: HashTable<u64, i32> = HashTable::with_capacity(10);
        for k in 0..6u64 {
            insert_new(&mut table, k as i32, k, 0);
        }

        table.remove(1, |&x| x == 1);
        table.remove(4, |&x| x == 4);
        assert_eq!(table.used_slots(), 6);

        // The most recently freed slot is handed out first.
        insert_new(&mut table, 100, 100, 0);
        insert_new(&mut table, 101, 101, 0);
        assert_eq!(table.used_slots(), 6);
        let keys: Vec<u64> = table.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, [0, 101, 2, 3, 100, 5]);

        insert_new(&mut table, 102, 102, 0);
        assert_eq!(table.used_slots(), 7);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn insert_many() {
        let state = HashState::default();
        let mut table: HashTable<u64, i32> = HashTable::new();
        for k in 0..100000u64 {
            let hash = hash_key(&state, k);
            insert_new(&mut table, hash, k, k as i32);
            assert_eq!(table.find(hash, |&x| x == k), Some((&k, &(k as i32))));
        }

        assert_eq!(table.len(), 100000);
        for k in 0..100000u64 {
            let hash = hash_key(&state, k);
            assert_eq!(table.find(hash, |&x| x == k), Some((&k, &(k as i32))));
        }
    }

    #[test]
    fn explicit_collision() {
        let mut table: HashTable<u64, i32> = HashTable::new();
        let hash = 0;
        for k in 0..65u64 {
            insert_new(&mut table, hash, k, k as i32);
        }

        assert_eq!(table.len(), 65);
        for k in 0..65u64 {
            assert_eq!(table.find(hash, |&x| x == k), Some((&k, &(k as i32))));
        }

        let hist = table.chain_length_histogram();
        assert_eq!(hist.len() - 1, 65);
        assert_eq!(hist[65], 1);

        for k in (0..65u64).step_by(2) {
            assert_eq!(table.remove(hash, |&x| x == k), Some((k, k as i32)));
        }
        for k in 0..65u64 {
            assert_eq!(table.contains(hash, |&x| x == k), k % 2 == 1);
        }
    }

    #[test]
    fn negative_hashes_land_in_range() {
        let mut table: HashTable<i32, i32> = HashTable::new();
        for k in [i32::MIN, -1, -2, -1000, i32::MAX, 0] {
            table.entry(k, |&x| x == k).or_insert(k, k);
        }
        for k in [i32::MIN, -1, -2, -1000, i32::MAX, 0] {
            assert_eq!(table.find(k, |&x| x == k), Some((&k, &k)));
        }
    }

    #[test]
    fn iter_and_drain() {
        let state = HashState::default();
        let mut table: HashTable<u64, i32> = HashTable::new();
        for k in 10..20u64 {
            insert_new(&mut table, hash_key(&state, k), k, (k as i32) + 1);
        }
        let collected: Vec<u64> = table.iter().map(|(k, _)| *k).collect();
        assert_eq!(collected, (10..20u64).collect::<Vec<_>>());
        assert_eq!(table.iter().len(), 10);

        for (_, v) in table.iter_mut() {
            *v *= 2;
        }
        assert_eq!(
            table.find(hash_key(&state, 10), |&x| x == 10),
            Some((&10, &22))
        );

        let drained: Vec<(u64, i32)> = table.drain().collect();
        assert_eq!(drained.len(), 10);
        assert_eq!(table.len(), 0);
        assert_eq!(table.used_slots(), 0);

        for k in 10..20u64 {
            assert!(table.find(hash_key(&state, k), |&x| x == k).is_none());
        }

        insert_new(&mut table, hash_key(&state, 5), 5, 5);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn partial_drain_drops_the_rest() {
        let drops = Rc::new(Cell::new(0));

        struct Tracked(Rc<Cell<usize>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut table: HashTable<u32, Tracked> = HashTable::new();
        for k in 0..10u32 {
            table
                .entry(k as i32, |&x| x == k)
                .or_insert(k, Tracked(drops.clone()));
        }
        table.remove(3, |&x| x == 3);
        assert_eq!(drops.get(), 1);

        {
            let mut drain = table.drain();
            assert_eq!(drain.len(), 9);
            drop(drain.next());
        }
        assert_eq!(drops.get(), 10);
        assert!(table.is_empty());

        for k in 0..4u32 {
            table
                .entry(k as i32, |&x| x == k)
                .or_insert(k, Tracked(drops.clone()));
        }
        drop(table);
        assert_eq!(drops.get(), 14);
    }

    #[test]
    fn into_iter_yields_live_entries() {
        let mut table: HashTable<u32, String> = HashTable::new();
        for k in 0..6u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k.to_string());
        }
        table.remove(0, |&x| x == 0);
        table.remove(5, |&x| x == 5);

        let mut iter = table.into_iter();
        assert_eq!(iter.len(), 4);
        assert_eq!(iter.next(), Some((1, "1".to_string())));
        let rest: Vec<u32> = iter.map(|(k, _)| k).collect();
        assert_eq!(rest, [2, 3, 4]);
    }

    #[test]
    fn cursor_walks_live_entries() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        for k in 0..6u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }
        table.remove(2, |&x| x == 2);

        let mut cursor = table.cursor();
        let mut seen = Vec::new();
        while let Some((k, _)) = cursor.advance(&table) {
            seen.push(*k);
        }
        assert_eq!(seen, [0, 1, 3, 4, 5]);
        assert_eq!(cursor.advance(&table), None);
    }

    #[test]
    #[should_panic(expected = "mutated concurrently")]
    fn cursor_fails_fast_after_insert() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        for k in 0..4u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }

        let mut cursor = table.cursor();
        assert!(cursor.advance(&table).is_some());
        table.entry(9, |&x| x == 9).or_insert(9, 9);
        cursor.advance(&table);
    }

    #[test]
    #[should_panic(expected = "mutated concurrently")]
    fn cursor_fails_fast_after_remove() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        for k in 0..4u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }

        let mut cursor = table.cursor();
        table.remove(1, |&x| x == 1);
        cursor.advance(&table);
    }

    #[test]
    #[should_panic(expected = "chains are corrupt")]
    fn cyclic_chain_fails_fast() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        table.entry(0, |&x| x == 1).or_insert(1, 1);
        table.entry(0, |&x| x == 2).or_insert(2, 2);

        // Bucket 0 is 1 -> 0; point the tail back at the head.
        unsafe { table.slot_mut(0).next = 1 };
        table.find(0, |&x| x == 99);
    }

    #[test]
    #[should_panic(expected = "chains are corrupt")]
    fn link_past_used_slots_fails_fast() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        table.entry(0, |&x| x == 1).or_insert(1, 1);
        table.entry(0, |&x| x == 2).or_insert(2, 2);

        let count = table.used_slots() as i32;
        unsafe { table.slot_mut(1).next = count + 3 };
        table.remove(0, |&x| x == 1);
    }

    #[test]
    fn value_overwrite_keeps_cursor_valid() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        table.entry(1, |&x| x == 1).or_insert(1, 1);

        let mut cursor = table.cursor();
        if let Some((_, v)) = table.find_mut(1, |&x| x == 1) {
            *v = 2;
        }
        assert_eq!(cursor.advance(&table), Some((&1, &2)));
    }

    #[test]
    fn insert_and_find_string_keys() {
        let state = HashState::default();
        let mut table: HashTable<String, i32> = HashTable::new();
        let keys = ["apple", "banana", "cherry", "date", "elderberry"];
        for (i, key) in keys.iter().enumerate() {
            let hash = hash_string_key(&state, key);
            table
                .entry(hash, |k| k == key)
                .or_insert(key.to_string(), i as i32);
        }

        for (i, key) in keys.iter().enumerate() {
            let hash = hash_string_key(&state, key);
            let (k, v) = table.find(hash, |k| k == key).unwrap();
            assert_eq!(k, key);
            assert_eq!(*v, i as i32);
        }
        assert!(
            table
                .find(hash_string_key(&state, "fig"), |k| k == "fig")
                .is_none()
        );
    }

    #[test]
    fn vacant_try_insert_respects_capacity() {
        let mut table: HashTable<u32, u32> = HashTable::with_capacity(3);
        for k in 0..3u32 {
            match table.entry(k as i32, |&x| x == k) {
                Entry::Vacant(v) => {
                    assert!(v.try_insert(k, k).is_ok());
                }
                Entry::Occupied(_) => unreachable!(),
            }
        }

        match table.entry(3, |&x| x == 3) {
            Entry::Vacant(v) => {
                let err = v.try_insert(3, 30).unwrap_err();
                assert_eq!(err.into_inner(), (3, 30));
            }
            Entry::Occupied(_) => unreachable!(),
        }
        assert_eq!(table.capacity(), 3);

        table.remove(0, |&x| x == 0);
        match table.entry(3, |&x| x == 3) {
            Entry::Vacant(v) => {
                assert_eq!(v.try_insert(3, 30), Ok(&mut 30));
            }
            Entry::Occupied(_) => unreachable!(),
        }
    }

    #[test]
    fn unallocated_table_rejects_try_insert() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        match table.entry(1, |&x| x == 1) {
            Entry::Vacant(v) => assert!(v.try_insert(1, 1).is_err()),
            Entry::Occupied(_) => unreachable!(),
        }
        assert_eq!(table.capacity(), 0);
    }

    #[test]
    fn capacity_overflow_is_rejected() {
        assert_eq!(
            HashTable::<u8, u8>::try_with_capacity(usize::MAX).unwrap_err(),
            TableError::CapacityOverflow {
                requested: usize::MAX
            }
        );

        let mut table: HashTable<u8, u8> = HashTable::new();
        assert!(table.try_ensure_capacity(MAX_PRIME_ARRAY_LENGTH + 1).is_err());
        assert_eq!(table.capacity(), 0);
    }

    #[test]
    fn ensure_capacity_compacts_tombstones() {
        let mut table: HashTable<u32, u32> = HashTable::with_capacity(7);
        for k in 0..7u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k * 2);
        }
        for k in [1u32, 3, 5] {
            table.remove(k as i32, |&x| x == k);
        }
        assert_eq!(table.used_slots(), 7);

        assert_eq!(table.ensure_capacity(50), 53);
        assert_eq!(table.used_slots(), 4);
        assert_eq!(table.len(), 4);
        for k in [0u32, 2, 4, 6] {
            assert_eq!(table.find(k as i32, |&x| x == k), Some((&k, &(k * 2))));
        }
        let keys: Vec<u32> = table.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, [0, 2, 4, 6]);

        assert_eq!(table.ensure_capacity(10), 53);
    }

    #[test]
    fn trim_excess_after_removals() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        for k in 0..200u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }
        let before = table.capacity();
        for k in 10..200u32 {
            table.remove(k as i32, |&x| x == k);
        }

        table.trim_excess();
        assert!(table.capacity() < before);
        assert_eq!(table.capacity(), 11);
        assert_eq!(table.used_slots(), 10);
        for k in 0..10u32 {
            assert_eq!(table.find(k as i32, |&x| x == k), Some((&k, &k)));
        }

        table.entry(500, |&x| x == 500).or_insert(500, 500);
        assert_eq!(table.len(), 11);
    }

    #[test]
    fn trim_excess_keeps_dense_tables() {
        let mut table: HashTable<u32, u32> = HashTable::with_capacity(11);
        for k in 0..10u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }
        let version = table.version();
        table.trim_excess();
        assert_eq!(table.capacity(), 11);
        assert_eq!(table.version(), version);
    }

    #[test]
    fn trim_excess_releases_empty_table() {
        let mut table: HashTable<u32, u32> = HashTable::with_capacity(100);
        table.entry(1, |&x| x == 1).or_insert(1, 1);
        table.clear();
        table.trim_excess();
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.debug_stats().total_bytes, 0);

        table.entry(2, |&x| x == 2).or_insert(2, 2);
        assert_eq!(table.find(2, |&x| x == 2), Some((&2, &2)));
    }

    #[test]
    fn trim_excess_to_validates() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        for k in 0..20u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }
        assert_eq!(
            table.try_trim_excess_to(5),
            Err(TableError::CapacityBelowLen {
                requested: 5,
                len: 20
            })
        );

        for k in 0..15u32 {
            table.remove(k as i32, |&x| x == k);
        }
        assert_eq!(table.try_trim_excess_to(5), Ok(()));
        assert_eq!(table.capacity(), 5);
        assert_eq!(table.len(), 5);
        for k in 15..20u32 {
            assert!(table.contains(k as i32, |&x| x == k));
        }
    }

    #[test]
    fn retain_removes_rejected() {
        let mut table: HashTable<u32, u32> = HashTable::new();
        for k in 0..20u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }
        table.retain(|k, v| {
            *v += 1;
            k % 3 == 0
        });
        assert_eq!(table.len(), 7);
        for k in 0..20u32 {
            let found = table.find(k as i32, |&x| x == k);
            if k % 3 == 0 {
                assert_eq!(found, Some((&k, &(k + 1))));
            } else {
                assert_eq!(found, None);
            }
        }
    }

    #[test]
    fn clear_resets_bookkeeping() {
        let mut table: HashTable<u32, String> = HashTable::with_capacity(10);
        for k in 0..8u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k.to_string());
        }
        table.remove(2, |&x| x == 2);
        let version = table.version();

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.used_slots(), 0);
        assert_eq!(table.capacity(), 11);
        assert_ne!(table.version(), version);

        table.entry(4, |&x| x == 4).or_insert(4, "four".to_string());
        assert_eq!(table.find(4, |&x| x == 4), Some((&4, &"four".to_string())));
    }

    #[test]
    fn test_clone() {
        let state = HashState::default();
        let mut original: HashTable<String, i32> = HashTable::with_capacity(10);

        let test_data = [
            ("hello", 1),
            ("world", 2),
            ("rust", 3),
            ("clone", 4),
            ("test", 5),
        ];

        for (key, value) in test_data.iter() {
            let hash = hash_string_key(&state, key);
            original
                .entry(hash, |k| k == key)
                .or_insert(key.to_string(), *value);
        }
        original.remove(hash_string_key(&state, "rust"), |k| k == "rust");

        let mut cloned = original.clone();
        assert_eq!(original.len(), cloned.len());
        assert_eq!(cloned.len(), 4);
        assert_eq!(cloned.used_slots(), original.used_slots());

        let hash = hash_string_key(&state, "hello");
        if let Some((_, v)) = original.find_mut(hash, |k| k == "hello") {
            *v = 999;
        }
        assert_eq!(original.find(hash, |k| k == "hello").unwrap().1, &999);
        assert_eq!(cloned.find(hash, |k| k == "hello").unwrap().1, &1);

        // The clone carries the free list, so the tombstone is reused.
        let hash = hash_string_key(&state, "again");
        cloned
            .entry(hash, |k| k == "again")
            .or_insert("again".to_string(), 6);
        assert_eq!(cloned.used_slots(), 5);
    }

    #[test]
    fn test_clone_empty_table() {
        let original: HashTable<u64, i32> = HashTable::with_capacity(10);
        let cloned = original.clone();

        assert!(cloned.is_empty());
        assert_eq!(cloned.capacity(), original.capacity());

        let unallocated: HashTable<u64, i32> = HashTable::new();
        assert_eq!(unallocated.clone().capacity(), 0);
    }

    #[test]
    fn debug_stats_track_layout() {
        let mut table: HashTable<u32, u32> = HashTable::with_capacity(20);
        for k in 0..10u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, k);
        }
        table.remove(0, |&x| x == 0);

        let stats = table.debug_stats();
        assert_eq!(stats.len, 9);
        assert_eq!(stats.capacity, 23);
        assert_eq!(stats.used_slots, 10);
        assert_eq!(stats.free_slots, 1);
        assert_eq!(stats.occupied_buckets, 9);
        assert_eq!(stats.longest_chain, 1);
    }

    #[test]
    fn zero_sized_values() {
        let mut table: HashTable<u32, ()> = HashTable::new();
        for k in 0..50u32 {
            table.entry(k as i32, |&x| x == k).or_insert(k, ());
        }
        assert_eq!(table.len(), 50);
        assert!(table.contains(49, |&x| x == 49));
    }
}
