//! Internal failure type used between [`crate::sys`] and the region policy.
//!
//! This never crosses the public entry-point boundary: `allocate`,
//! `release`, `zeroed_allocate`, and `resize` all signal failure purely by
//! returning a null pointer, matching the classical heap interface. This
//! type only exists so the code *between* those entry points and the
//! kernel-primitive adapters can propagate failure with `?` instead of
//! re-deriving "was that `-1`/`MAP_FAILED`?" at every call site.

use thiserror::Error;

/// A kernel-primitive acquisition failed.
#[derive(Debug, Error)]
pub enum AllocError {
  /// `sbrk` failed to grow the program break.
  #[error("failed to extend the program break")]
  BreakExtend,
  /// `mmap` failed to create a new anonymous region.
  #[error("failed to map an anonymous region")]
  Map,
}
