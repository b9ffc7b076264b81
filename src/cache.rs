use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::hash::murmur_hash;

const NUM_SHARD_BITS: usize = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;
const SHARD_SEED: u32 = 0xbc9f1d34;

// Buckets per shard; chains absorb collisions.
const TABLE_SIZE: usize = 256;

#[inline]
fn cache_hash(key: &[u8]) -> u32 {
    murmur_hash(key, SHARD_SEED)
}

#[inline]
fn shard(hash: u32) -> usize {
    (hash >> (32 - NUM_SHARD_BITS)) as usize
}

/// Sharded LRU cache with capacity measured in caller-supplied charges.
///
/// `insert` and `lookup` hand out [`CacheEntry`] receipts; the entry's key
/// and value are dropped when the last receipt and the cache's own
/// reference are gone, so an evicted entry stays usable while receipts on
/// it are outstanding. All operations are safe for concurrent use.
pub struct ShardLruCache<K: Eq + AsRef<[u8]>, V> {
    shards: [Mutex<LruShard<K, V>>; NUM_SHARDS],
    last_id: AtomicU64,
}

unsafe impl<K: Eq + AsRef<[u8]> + Send, V: Send> Send for ShardLruCache<K, V> {}
unsafe impl<K: Eq + AsRef<[u8]> + Send, V: Send + Sync> Sync for ShardLruCache<K, V> {}

impl<K: Eq + AsRef<[u8]>, V> ShardLruCache<K, V> {
    pub fn new(capacity: usize) -> ShardLruCache<K, V> {
        let per_shard = (capacity + NUM_SHARDS - 1) / NUM_SHARDS;
        ShardLruCache {
            shards: std::array::from_fn(|_| Mutex::new(LruShard::new(per_shard))),
            last_id: AtomicU64::new(0),
        }
    }

    /// Insert `value` under `key`, accounting `charge` bytes against the
    /// capacity and displacing any previous entry with the same key.
    pub fn insert(&self, key: K, value: V, charge: usize) -> CacheEntry<K, V> {
        let hash = cache_hash(key.as_ref());
        let mut guard = self.shards[shard(hash)].lock().unwrap();
        CacheEntry {
            entry: guard.insert(key, value, hash, charge),
        }
    }

    pub fn lookup(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let hash = cache_hash(key.as_ref());
        let mut guard = self.shards[shard(hash)].lock().unwrap();
        let entry = guard.lookup(key, hash);
        if entry.is_null() {
            None
        } else {
            Some(CacheEntry { entry })
        }
    }

    pub fn erase(&self, key: &K) {
        let hash = cache_hash(key.as_ref());
        let mut guard = self.shards[shard(hash)].lock().unwrap();
        guard.erase(key, hash);
    }

    /// Monotonic id source for partitioning one cache between users.
    pub fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drop every entry not currently referenced by a receipt.
    pub fn prune(&self) {
        for shard in &self.shards {
            shard.lock().unwrap().prune();
        }
    }

    pub fn total_charge(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap().usage)
            .sum()
    }
}

impl<K: Eq + AsRef<[u8]>, V> Drop for ShardLruCache<K, V> {
    fn drop(&mut self) {
        for shard in &self.shards {
            shard.lock().unwrap().clear();
        }
    }
}

/// Ref-count receipt for one cache entry. Dropping it releases the
/// reference; the receipt must not outlive the cache that issued it.
pub struct CacheEntry<K, V> {
    entry: *mut LruEntry<K, V>,
}

unsafe impl<K: Send, V: Send> Send for CacheEntry<K, V> {}
unsafe impl<K: Send, V: Send + Sync> Sync for CacheEntry<K, V> {}

impl<K, V> CacheEntry<K, V> {
    #[inline]
    pub fn value(&self) -> &V {
        unsafe { (*self.entry).value.assume_init_ref() }
    }
}

impl<K, V> Drop for CacheEntry<K, V> {
    fn drop(&mut self) {
        unsafe {
            release(self.entry);
        }
    }
}

struct LruEntry<K, V> {
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
    hash: u32,
    charge: usize,
    // Receipts plus one for the cache while the entry is in the table.
    refs: AtomicUsize,
    next_hash: *mut LruEntry<K, V>,
    prev: *mut LruEntry<K, V>,
    next: *mut LruEntry<K, V>,
}

impl<K, V> LruEntry<K, V> {
    fn new(key: K, value: V, hash: u32, charge: usize, refs: usize) -> *mut LruEntry<K, V> {
        Box::into_raw(Box::new(LruEntry {
            key: MaybeUninit::new(key),
            value: MaybeUninit::new(value),
            hash,
            charge,
            refs: AtomicUsize::new(refs),
            next_hash: ptr::null_mut(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }))
    }

    fn new_dummy() -> *mut LruEntry<K, V> {
        let node = Box::into_raw(Box::new(LruEntry {
            key: MaybeUninit::uninit(),
            value: MaybeUninit::uninit(),
            hash: 0,
            charge: 0,
            refs: AtomicUsize::new(1),
            next_hash: ptr::null_mut(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }));
        unsafe {
            (*node).prev = node;
            (*node).next = node;
        }
        node
    }
}

/// Drop one reference; the last reference frees the entry.
///
/// # Safety
///
/// `entry` must point to a live, non-dummy entry.
unsafe fn release<K, V>(entry: *mut LruEntry<K, V>) {
    if (*entry).refs.fetch_sub(1, Ordering::AcqRel) == 1 {
        ptr::drop_in_place((*entry).key.as_mut_ptr());
        ptr::drop_in_place((*entry).value.as_mut_ptr());
        drop(Box::from_raw(entry));
    }
}

unsafe fn detach<K, V>(entry: *mut LruEntry<K, V>) {
    (*(*entry).next).prev = (*entry).prev;
    (*(*entry).prev).next = (*entry).next;
}

struct LruShard<K, V> {
    capacity: usize,
    usage: usize,
    table: HandleTable<K, V>,
    // Dummy head of a circular list; lru.next is the oldest entry and
    // lru.prev the newest.
    lru: *mut LruEntry<K, V>,
}

impl<K: Eq, V> LruShard<K, V> {
    fn new(capacity: usize) -> LruShard<K, V> {
        LruShard {
            capacity,
            usage: 0,
            table: HandleTable::new(),
            lru: LruEntry::new_dummy(),
        }
    }

    fn append_newest(&mut self, entry: *mut LruEntry<K, V>) {
        unsafe {
            (*entry).next = self.lru;
            (*entry).prev = (*self.lru).prev;
            (*(*entry).prev).next = entry;
            (*self.lru).prev = entry;
        }
    }

    fn lookup(&mut self, key: &K, hash: u32) -> *mut LruEntry<K, V> {
        unsafe {
            let entry = self.table.find(key, hash);
            if !entry.is_null() {
                detach(entry);
                self.append_newest(entry);
                (*entry).refs.fetch_add(1, Ordering::AcqRel);
            }
            entry
        }
    }

    fn insert(&mut self, key: K, value: V, hash: u32, charge: usize) -> *mut LruEntry<K, V> {
        // One reference for the cache, one for the returned receipt.
        let entry = LruEntry::new(key, value, hash, charge, 2);
        self.append_newest(entry);
        self.usage += charge;
        unsafe {
            let displaced = self.table.insert(entry);
            if !displaced.is_null() {
                self.unlink(displaced);
            }
            self.evict();
        }
        entry
    }

    fn erase(&mut self, key: &K, hash: u32) {
        unsafe {
            let entry = self.table.remove(key, hash);
            if !entry.is_null() {
                self.unlink(entry);
            }
        }
    }

    /// Walk from the oldest entry, dropping everything only the cache
    /// still references, until usage fits the capacity.
    unsafe fn evict(&mut self) {
        let mut entry = (*self.lru).next;
        while self.usage > self.capacity && entry != self.lru {
            let next = (*entry).next;
            if (*entry).refs.load(Ordering::Acquire) == 1 {
                let removed = self.table.remove((*entry).key.assume_init_ref(), (*entry).hash);
                debug_assert_eq!(removed, entry);
                self.unlink(entry);
            }
            entry = next;
        }
    }

    fn prune(&mut self) {
        unsafe {
            let mut entry = (*self.lru).next;
            while entry != self.lru {
                let next = (*entry).next;
                if (*entry).refs.load(Ordering::Acquire) == 1 {
                    let removed = self.table.remove((*entry).key.assume_init_ref(), (*entry).hash);
                    debug_assert_eq!(removed, entry);
                    self.unlink(entry);
                }
                entry = next;
            }
        }
    }

    fn clear(&mut self) {
        unsafe {
            let mut entry = (*self.lru).next;
            while entry != self.lru {
                let next = (*entry).next;
                let removed = self.table.remove((*entry).key.assume_init_ref(), (*entry).hash);
                debug_assert_eq!(removed, entry);
                self.unlink(entry);
                entry = next;
            }
        }
    }

    /// Detach an entry already removed from the hash table and drop the
    /// cache's reference to it.
    unsafe fn unlink(&mut self, entry: *mut LruEntry<K, V>) {
        detach(entry);
        self.usage -= (*entry).charge;
        release(entry);
    }
}

impl<K, V> Drop for LruShard<K, V> {
    fn drop(&mut self) {
        unsafe {
            // Entries are cleared before the shard goes away; only the
            // dummy remains.
            debug_assert_eq!((*self.lru).next, self.lru);
            drop(Box::from_raw(self.lru));
        }
    }
}

struct HandleTable<K, V> {
    buckets: Vec<*mut LruEntry<K, V>>,
}

impl<K: Eq, V> HandleTable<K, V> {
    fn new() -> HandleTable<K, V> {
        HandleTable {
            buckets: vec![ptr::null_mut(); TABLE_SIZE],
        }
    }

    unsafe fn find(&mut self, key: &K, hash: u32) -> *mut LruEntry<K, V> {
        *self.find_slot(key, hash)
    }

    /// Chain the entry in, returning a displaced entry with the same key
    /// (already unchained) or null.
    unsafe fn insert(&mut self, entry: *mut LruEntry<K, V>) -> *mut LruEntry<K, V> {
        let slot = self.find_slot((*entry).key.assume_init_ref(), (*entry).hash);
        let old = *slot;
        (*entry).next_hash = if old.is_null() {
            ptr::null_mut()
        } else {
            (*old).next_hash
        };
        *slot = entry;
        old
    }

    unsafe fn remove(&mut self, key: &K, hash: u32) -> *mut LruEntry<K, V> {
        let slot = self.find_slot(key, hash);
        let old = *slot;
        if !old.is_null() {
            *slot = (*old).next_hash;
        }
        old
    }

    /// Slot holding the entry matching (key, hash), or the chain's null
    /// tail slot if absent.
    unsafe fn find_slot(&mut self, key: &K, hash: u32) -> *mut *mut LruEntry<K, V> {
        let idx = hash as usize & (TABLE_SIZE - 1);
        let mut slot: *mut *mut LruEntry<K, V> = &mut self.buckets[idx];
        while !(*slot).is_null()
            && !((**slot).hash == hash && (**slot).key.assume_init_ref() == key)
        {
            slot = &mut (**slot).next_hash;
        }
        slot
    }
}
