use std::alloc::Layout;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

const SLAB_SIZE: usize = 4096;

/// Bump allocator backing the write buffer.
///
/// Memory is carved off heap slabs; there is no per-allocation free and
/// everything is released at once when the arena is dropped. Handed-out
/// pointers are non-owning views that must not outlive the arena.
pub struct Arena {
    // Allocation state for the slab currently being carved
    alloc_ptr: *mut u8,
    alloc_bytes_remaining: usize,

    slabs: Vec<(*mut u8, usize)>,

    // Readable while another thread owns the arena mutably.
    memory_usage: AtomicUsize,
}

impl Default for Arena {
    fn default() -> Arena {
        Arena {
            alloc_ptr: std::ptr::null_mut(),
            alloc_bytes_remaining: 0,
            slabs: Vec::with_capacity(2),
            memory_usage: AtomicUsize::new(0),
        }
    }
}

impl Arena {
    pub fn new() -> Arena {
        Arena::default()
    }

    /// REQUIRES: `bytes > 0`.
    pub fn allocate(&mut self, bytes: usize) -> *mut u8 {
        assert!(bytes > 0);
        if bytes <= self.alloc_bytes_remaining {
            let result = self.alloc_ptr;
            unsafe {
                self.alloc_ptr = self.alloc_ptr.add(bytes);
            }
            self.alloc_bytes_remaining -= bytes;
            return result;
        }
        self.allocate_fallback(bytes)
    }

    /// Like `allocate`, with the result aligned for any word-sized store.
    pub fn allocate_aligned(&mut self, bytes: usize) -> *mut u8 {
        assert!(bytes > 0);
        let align = mem::size_of::<*mut u8>().max(8);
        debug_assert!(align.is_power_of_two());

        let current_mod = self.alloc_ptr as usize & (align - 1);
        let slop = if current_mod == 0 {
            0
        } else {
            align - current_mod
        };
        let needed = bytes + slop;
        if needed <= self.alloc_bytes_remaining {
            let result = unsafe { self.alloc_ptr.add(slop) };
            unsafe {
                self.alloc_ptr = self.alloc_ptr.add(needed);
            }
            self.alloc_bytes_remaining -= needed;
            result
        } else {
            // Fallback slabs come straight from the global allocator,
            // which hands out at least word alignment.
            self.allocate_fallback(bytes)
        }
    }

    /// Total bytes of slabs owned by the arena, plus bookkeeping.
    #[inline]
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    fn allocate_fallback(&mut self, bytes: usize) -> *mut u8 {
        if bytes > SLAB_SIZE / 4 {
            // Object is more than a quarter of our slab size.  Allocate it
            // separately to avoid wasting too much space in leftover bytes.
            return self.allocate_new_slab(bytes);
        }

        // We waste the remaining space in the current slab.
        self.alloc_ptr = self.allocate_new_slab(SLAB_SIZE);
        self.alloc_bytes_remaining = SLAB_SIZE;

        let result = self.alloc_ptr;
        unsafe {
            self.alloc_ptr = self.alloc_ptr.add(bytes);
        }
        self.alloc_bytes_remaining -= bytes;
        result
    }

    fn allocate_new_slab(&mut self, bytes: usize) -> *mut u8 {
        let ptr = unsafe { std::alloc::alloc(Self::slab_layout(bytes)) };
        assert!(!ptr.is_null());
        self.slabs.push((ptr, bytes));
        self.memory_usage
            .fetch_add(bytes + mem::size_of::<*mut u8>(), Ordering::Relaxed);
        ptr
    }

    #[inline]
    fn slab_layout(bytes: usize) -> Layout {
        Layout::from_size_align(bytes, mem::align_of::<usize>()).unwrap()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for &(ptr, bytes) in &self.slabs {
            unsafe {
                std::alloc::dealloc(ptr, Self::slab_layout(bytes));
            }
        }
    }
}
