//! # rallocator - a block-manager heap allocator
//!
//! This crate is a drop-in replacement for the four classical C heap entry
//! points -- `malloc`, `free`, `calloc`, `realloc` -- built directly on top
//! of the kernel primitives that grow the program break (`sbrk`) and map
//! anonymous pages (`mmap`/`munmap`). It performs no kernel I/O beyond
//! those two primitives and has no awareness of the type or content of the
//! bytes it hands out.
//!
//! ## Overview
//!
//! Every request is served from one of two places:
//!
//! ```text
//!   ┌──────────────────────────────────────────┐     ┌────────────────┐
//!   │          Break segment (small)            │     │  Mapped region │
//!   │                                            │     │    (large)     │
//!   │  [FREE][ALLOC][FREE][ALLOC]...[tail FREE]  │     │  [one block]   │
//!   └──────────────────────────────────────────┘     └────────────────┘
//!          one contiguous run, grown by sbrk            one mmap() per block
//! ```
//!
//! Small requests (below `MMAP_THRESHOLD`) are served from a single
//! contiguous break segment, tracked as an intrusive circular list of
//! block headers; free blocks are reused by best fit, split when
//! oversized, and coalesced with their neighbors before every search.
//! Large requests are served by independent anonymous mappings, one block
//! per mapping, released directly back to the kernel instead of ever
//! becoming `FREE`.
//!
//! ## Crate structure
//!
//! ```text
//!   rallocator
//!   ├── align   - fixed 8-byte alignment helper (align!)
//!   ├── block   - block header and the intrusive circular list
//!   ├── error   - internal kernel-acquisition failure type
//!   ├── sys     - sbrk/mmap/munmap/sysconf adapters
//!   ├── policy  - best fit, split, coalesce, heap-block acquisition
//!   └── ffi     - malloc/free/calloc/realloc C ABI shim
//! ```
//!
//! ## Quick start
//!
//! ```
//! use rallocator::Allocator;
//!
//! let heap = Allocator::new();
//!
//! unsafe {
//!     let ptr = heap.allocate(64) as *mut u64;
//!     assert!(!ptr.is_null());
//!
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//!
//!     heap.release(ptr as *mut u8);
//! }
//! ```
//!
//! ## Safety
//!
//! Every public entry point is `unsafe`: they dereference raw pointers into
//! kernel-provided memory and mutate process-wide state with no
//! synchronization. Callers must serialize all calls to one execution
//! context at a time -- this allocator is explicitly not thread-safe (see
//! the Non-goals in the design notes).

pub mod align;
pub mod block;
pub mod error;
pub mod ffi;
mod policy;
mod sys;

use block::{Header, Status, HEADER_SIZE};

/// A handle onto the process-wide heap.
///
/// All state behind a handle -- the sentinel, the two one-shot latches,
/// and the block list threaded through kernel memory -- is process-wide,
/// not per-handle. Constructing more than one `Allocator` is harmless
/// since every handle observes the same state; calling through any of them
/// from more than one thread at a time is not (see the crate's Non-goals).
#[derive(Debug, Default, Clone, Copy)]
pub struct Allocator;

impl Allocator {
  /// Creates a handle onto the process-wide heap. Does not itself touch
  /// any kernel or global state -- that happens lazily on first use.
  pub const fn new() -> Self {
    Allocator
  }

  /// See [`allocate`].
  pub unsafe fn allocate(&self, size: usize) -> *mut u8 {
    unsafe { allocate(size) }
  }

  /// See [`release`].
  pub unsafe fn release(&self, ptr: *mut u8) {
    unsafe { release(ptr) }
  }

  /// See [`zeroed_allocate`].
  pub unsafe fn zeroed_allocate(&self, count: usize, size: usize) -> *mut u8 {
    unsafe { zeroed_allocate(count, size) }
  }

  /// See [`resize`].
  pub unsafe fn resize(&self, ptr: *mut u8, size: usize) -> *mut u8 {
    unsafe { resize(ptr, size) }
  }
}

/// Allocates `n` bytes, 8-byte aligned.
///
/// Requests smaller than [`policy::MMAP_THRESHOLD`] are served from the
/// break segment (preallocating it on first use); larger requests get an
/// independent mapping. Returns `null` if `n == 0` or if the underlying
/// kernel acquisition fails; never signals failure any other way.
///
/// # Safety
/// Mutates process-wide allocator state with no synchronization; callers
/// must not invoke any entry point in this crate concurrently.
pub unsafe fn allocate(n: usize) -> *mut u8 {
  unsafe {
    policy::ensure_sentinel();

    if n == 0 {
      return std::ptr::null_mut();
    }

    let aligned = align!(n);

    let block = if aligned + HEADER_SIZE < policy::MMAP_THRESHOLD {
      match policy::get_heap_block(aligned) {
        Ok(block) => {
          (*block).status = Status::Allocated;
          block
        }
        Err(_) => return std::ptr::null_mut(),
      }
    } else {
      match policy::map_block(aligned) {
        Ok(block) => block,
        Err(_) => return std::ptr::null_mut(),
      }
    };

    Header::payload(block)
  }
}

/// Releases a pointer previously returned by [`allocate`],
/// [`zeroed_allocate`], or [`resize`].
///
/// A null pointer, a pointer not owned by this allocator, or a pointer
/// already free are all silently ignored -- this is deliberate laxity for
/// compatibility with the classical `free` interface, not a design goal.
/// No coalescing happens here; it is deferred to the next heap-bound
/// allocation.
///
/// # Safety
/// `ptr`, if non-null and owned, must not be used again after this call.
/// Mutates process-wide allocator state with no synchronization.
pub unsafe fn release(ptr: *mut u8) {
  unsafe {
    policy::ensure_sentinel();

    if ptr.is_null() {
      return;
    }

    let Some(block) = policy::search_by_payload(ptr) else {
      return;
    };

    match (*block).status {
      Status::Free => {}
      Status::Mapped => policy::unmap_block(block),
      Status::Allocated => (*block).status = Status::Free,
    }
  }
}

/// Allocates space for `count` elements of `size` bytes each, zero-filled.
///
/// Returns `null` if either argument is zero or if `count * size` would
/// overflow. Unlike [`allocate`], the break/mapping threshold here is the
/// runtime page size rather than [`policy::MMAP_THRESHOLD`]: a fresh
/// mapping is already zeroed by the kernel, so above page size it is
/// cheaper to map than to memset a reused heap block.
///
/// # Safety
/// Mutates process-wide allocator state with no synchronization.
pub unsafe fn zeroed_allocate(count: usize, size: usize) -> *mut u8 {
  unsafe {
    policy::ensure_sentinel();

    if count == 0 || size == 0 {
      return std::ptr::null_mut();
    }

    let Some(product) = count.checked_mul(size) else {
      return std::ptr::null_mut();
    };
    let aligned = align!(product);
    if aligned < product {
      // align! itself overflowed rounding up to the next multiple of 8.
      return std::ptr::null_mut();
    }

    let threshold = sys::page_size();

    let block = if aligned + HEADER_SIZE < threshold {
      match policy::get_heap_block(aligned) {
        Ok(block) => {
          (*block).status = Status::Allocated;
          block
        }
        Err(_) => return std::ptr::null_mut(),
      }
    } else {
      match policy::map_block(aligned) {
        Ok(block) => block,
        Err(_) => return std::ptr::null_mut(),
      }
    };

    let payload = Header::payload(block);
    std::ptr::write_bytes(payload, 0, aligned);
    payload
  }
}

/// Resizes a previously allocated region to `n` bytes, moving it if
/// necessary.
///
/// `p == null` behaves like [`allocate`]; `n == 0` behaves like
/// [`release`] and returns `null`; a `p` not owned by this allocator, or
/// found already `Free`, returns `null` without migrating anything. If the
/// aligned target size equals the current size, `p` is returned unchanged.
///
/// # Safety
/// `p`, if non-null, must have been returned by an entry point in this
/// crate and not yet released. Mutates process-wide allocator state with
/// no synchronization.
pub unsafe fn resize(p: *mut u8, n: usize) -> *mut u8 {
  unsafe {
    policy::ensure_sentinel();

    if p.is_null() {
      return allocate(n);
    }
    if n == 0 {
      release(p);
      return std::ptr::null_mut();
    }

    let Some(block) = policy::search_by_payload(p) else {
      return std::ptr::null_mut();
    };
    if (*block).status == Status::Free {
      return std::ptr::null_mut();
    }

    let aligned = align!(n);
    let current = (*block).payload_size;

    match aligned.cmp(&current) {
      std::cmp::Ordering::Equal => p,
      std::cmp::Ordering::Less => shrink(block, aligned),
      std::cmp::Ordering::Greater => extend(block, aligned),
    }
  }
}

/// The shrink path of [`resize`]: `target < block.payload_size`.
unsafe fn shrink(block: *mut Header, target: usize) -> *mut u8 {
  unsafe {
    match (*block).status {
      Status::Mapped if target >= policy::MMAP_THRESHOLD => {
        let Ok(new_block) = policy::map_block(target) else {
          return std::ptr::null_mut();
        };
        policy::copy_payload(new_block, block, target);
        policy::unmap_block(block);
        Header::payload(new_block)
      }
      Status::Mapped => {
        let Ok(new_block) = policy::get_heap_block(target) else {
          return std::ptr::null_mut();
        };
        (*new_block).status = Status::Allocated;
        policy::copy_payload(new_block, block, target);
        policy::unmap_block(block);
        Header::payload(new_block)
      }
      // Allocated: split in place, no coalescing required.
      _ => {
        policy::split_block(block, target);
        Header::payload(block)
      }
    }
  }
}

/// The extend path of [`resize`]: `target > block.payload_size`.
unsafe fn extend(block: *mut Header, target: usize) -> *mut u8 {
  unsafe {
    match (*block).status {
      // Mapped blocks can never grow in place.
      Status::Mapped => {
        let Ok(new_block) = policy::map_block(target) else {
          return std::ptr::null_mut();
        };
        policy::copy_payload(new_block, block, (*block).payload_size);
        policy::unmap_block(block);
        Header::payload(new_block)
      }
      Status::Allocated if target >= policy::MMAP_THRESHOLD => {
        let Ok(new_block) = policy::map_block(target) else {
          return std::ptr::null_mut();
        };
        policy::copy_payload(new_block, block, (*block).payload_size);
        (*block).status = Status::Free;
        Header::payload(new_block)
      }
      Status::Allocated => {
        let sentinel = policy::ensure_sentinel();

        if policy::is_last_break_resident(sentinel, block) {
          return match policy::grow_in_place(block, target) {
            Ok(()) => Header::payload(block),
            Err(_) => std::ptr::null_mut(),
          };
        }

        let original_size = (*block).payload_size;
        policy::coalesce_forward_to(sentinel, block, target);

        if (*block).payload_size >= target {
          policy::split_block(block, target);
          return Header::payload(block);
        }

        // Still not big enough: relocate. The old block is left FREE
        // without eager coalescing -- that runs on the next heap
        // allocation instead (see the design notes).
        let Ok(new_block) = policy::get_heap_block(target) else {
          return std::ptr::null_mut();
        };
        (*new_block).status = Status::Allocated;
        policy::copy_payload(new_block, block, original_size);
        (*block).status = Status::Free;
        Header::payload(new_block)
      }
      Status::Free => unreachable!("resize() already rejected FREE blocks"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  /// This allocator is single-threaded by design: every test below
  /// mutates the same process-wide sentinel and break segment, so they
  /// must not run concurrently with each other even though the default
  /// test harness otherwise would.
  static TEST_LOCK: Mutex<()> = Mutex::new(());

  fn locked<T>(f: impl FnOnce() -> T) -> T {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
    f()
  }

  #[test]
  fn allocate_zero_returns_null() {
    locked(|| unsafe {
      assert!(allocate(0).is_null());
    });
  }

  #[test]
  fn basic_allocation_and_write_read() {
    locked(|| unsafe {
      let ptr = allocate(8) as *mut u64;
      assert!(!ptr.is_null());
      assert_eq!((ptr as usize) % 8, 0);

      *ptr = 0xDEAD_BEEF_DEAD_BEEF;
      assert_eq!(*ptr, 0xDEAD_BEEF_DEAD_BEEF);

      release(ptr as *mut u8);
    });
  }

  #[test]
  fn release_then_allocate_same_size_reuses_the_block() {
    locked(|| unsafe {
      let p1 = allocate(100);
      assert!(!p1.is_null());

      release(p1);

      let p2 = allocate(100);
      assert_eq!(p1, p2);

      release(p2);
    });
  }

  #[test]
  fn adjacent_free_blocks_coalesce_on_next_allocation() {
    locked(|| unsafe {
      let a = allocate(100);
      let b = allocate(200);
      let c = allocate(300);
      assert!(!a.is_null() && !b.is_null() && !c.is_null());

      release(a);
      release(b);

      // a and b coalesce into a single block big enough for 290 bytes
      // without growing the break.
      let d = allocate(290);
      assert_eq!(d, a);

      release(c);
      release(d);
    });
  }

  #[test]
  fn release_null_is_a_noop() {
    locked(|| unsafe {
      release(std::ptr::null_mut());
    });
  }

  #[test]
  fn release_foreign_pointer_is_a_noop() {
    locked(|| unsafe {
      let mut stack_value = 0u8;
      release(&mut stack_value as *mut u8);
    });
  }

  #[test]
  fn resize_null_behaves_like_allocate() {
    locked(|| unsafe {
      let p = resize(std::ptr::null_mut(), 64);
      assert!(!p.is_null());
      release(p);
    });
  }

  #[test]
  fn resize_to_zero_behaves_like_release_and_returns_null() {
    locked(|| unsafe {
      let p = allocate(64);
      assert!(resize(p, 0).is_null());
    });
  }

  #[test]
  fn resize_to_same_aligned_size_returns_same_pointer() {
    locked(|| unsafe {
      let p = allocate(100);
      let q = resize(p, 100);
      assert_eq!(p, q);
      release(q);
    });
  }

  #[test]
  fn resize_grow_in_place_at_tail_keeps_address() {
    locked(|| unsafe {
      let a = allocate(100);
      let grown = resize(a, 200);
      assert_eq!(a, grown);
      release(grown);
    });
  }

  #[test]
  fn resize_grow_past_neighbor_relocates_and_preserves_bytes() {
    locked(|| unsafe {
      let a = allocate(100) as *mut u8;
      // Keep a second block alive right after `a` so growing it cannot
      // happen in place.
      let b = allocate(100);
      assert!(!b.is_null());

      std::ptr::write_bytes(a, 0xAB, 100);

      let grown = resize(a as *mut u8, 500) as *mut u8;
      assert_ne!(grown, a);

      for i in 0..100 {
        assert_eq!(*grown.add(i), 0xAB);
      }

      release(grown as *mut u8);
      release(b);
    });
  }

  #[test]
  fn mapping_threshold_is_used_for_large_requests() {
    locked(|| unsafe {
      let big = allocate(200 * 1024);
      assert!(!big.is_null());
      assert_eq!((big as usize) % 8, 0);
      release(big);
    });
  }

  #[test]
  fn zeroed_allocate_zero_arguments_return_null() {
    locked(|| unsafe {
      assert!(zeroed_allocate(0, 10).is_null());
      assert!(zeroed_allocate(10, 0).is_null());
    });
  }

  #[test]
  fn zeroed_allocate_detects_multiplication_overflow() {
    locked(|| unsafe {
      assert!(zeroed_allocate(usize::MAX, 2).is_null());
    });
  }

  #[test]
  fn zeroed_allocate_returns_zero_filled_memory_below_page_threshold() {
    locked(|| unsafe {
      let ptr = zeroed_allocate(10, 10);
      assert!(!ptr.is_null());

      for i in 0..100 {
        assert_eq!(*ptr.add(i), 0);
      }

      release(ptr);
    });
  }

  #[test]
  fn zeroed_allocate_above_page_threshold_is_zero_filled() {
    locked(|| unsafe {
      let ptr = zeroed_allocate(1, 8192);
      assert!(!ptr.is_null());

      for i in 0..8192 {
        assert_eq!(*ptr.add(i), 0);
      }

      release(ptr);
    });
  }
}
