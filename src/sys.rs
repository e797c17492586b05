//! Kernel-primitive adapters.
//!
//! This module wraps the two kernel capabilities the allocator consumes
//! abstractly and never redesigns: a break-extender (`sbrk`) that grows the
//! contiguous data segment, and a page-mapper/-unmapper (`mmap`/`munmap`)
//! that hands out independent anonymous regions. It also caches the
//! runtime page size used as the `zeroed_allocate` threshold. Nothing here
//! makes policy decisions; it only turns libc's sentinel-value failure
//! convention into `Result`, so the region policy can use `?` instead of
//! comparing against `-1`/`MAP_FAILED` at every call site.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{error, trace};

use crate::error::AllocError;

/// Grows the program break by `delta` bytes.
///
/// Returns the address where the newly added region begins -- the break's
/// value just before this call, which is exactly where the caller should
/// place a new header. `delta` is always positive; this allocator never
/// shrinks the break itself (see the Non-goals).
pub unsafe fn extend_break(delta: usize) -> Result<*mut u8, AllocError> {
  unsafe {
    let previous_break = libc::sbrk(delta as libc::intptr_t);

    if previous_break == usize::MAX as *mut c_void {
      error!("sbrk({delta}) failed");
      return Err(AllocError::BreakExtend);
    }

    trace!("sbrk({delta}) -> {previous_break:?}");
    Ok(previous_break as *mut u8)
  }
}

/// Maps a fresh, page-aligned, anonymous, private, readable+writable region
/// of exactly `len` bytes.
pub unsafe fn map_region(len: usize) -> Result<*mut u8, AllocError> {
  unsafe {
    let addr = libc::mmap(
      std::ptr::null_mut(),
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    );

    if addr == libc::MAP_FAILED {
      error!("mmap({len}) failed");
      return Err(AllocError::Map);
    }

    trace!("mmap({len}) -> {addr:?}");
    Ok(addr as *mut u8)
  }
}

/// Unmaps `len` bytes at `addr`.
///
/// A failure here is fatal: a leaked mapping cannot be recovered and
/// indicates the allocator's own bookkeeping has gone wrong, so the
/// process aborts rather than continuing with state it can no longer
/// trust (the allocator's stated failure policy for unmap).
pub unsafe fn unmap_region(addr: *mut u8, len: usize) {
  unsafe {
    let result = libc::munmap(addr as *mut c_void, len);

    if result != 0 {
      error!("munmap({addr:?}, {len}) failed: critical invariant violation, aborting");
      std::process::abort();
    }

    trace!("munmap({addr:?}, {len})");
  }
}

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// The runtime page size, queried once via `sysconf` and cached for the
/// rest of the process's lifetime.
pub fn page_size() -> usize {
  let cached = PAGE_SIZE.load(Ordering::Relaxed);

  if cached != 0 {
    return cached;
  }

  let queried = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
  PAGE_SIZE.store(queried, Ordering::Relaxed);
  queried
}
