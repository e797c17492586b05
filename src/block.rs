//! Block header and the intrusive circular list it is threaded through.
//!
//! Every region the allocator has ever obtained from the kernel -- whether
//! break-resident or independently mapped -- is represented by exactly one
//! [`Header`], embedded at the very start of the region. The header doubles
//! as a node in a single, process-wide circular doubly-linked list closed
//! by a permanent sentinel; a caller's payload pointer is matched back to
//! its header by walking this list (see [`crate::policy::search_by_payload`]).

use std::mem;

/// The three disjoint states a non-sentinel block can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
  /// Break-resident, reusable.
  Free,
  /// Break-resident, currently held by a caller.
  Allocated,
  /// Backed by an independent kernel mapping, currently held by a caller.
  /// Mapped blocks never transition to `Free`; they are released directly
  /// to the kernel instead.
  Mapped,
}

/// Fixed-size metadata preceding every payload.
///
/// `payload_size` is the usable byte count beginning immediately after this
/// header. `prev`/`next` thread the header into the process-wide list.
#[repr(C)]
pub struct Header {
  pub payload_size: usize,
  pub status: Status,
  pub prev: *mut Header,
  pub next: *mut Header,
}

/// Size of [`Header`], rounded up to the payload alignment so that the
/// payload immediately following it is correctly aligned.
pub const HEADER_SIZE: usize = crate::align!(mem::size_of::<Header>());

impl Header {
  /// Address of the payload immediately following the header at `this`.
  #[inline]
  pub unsafe fn payload(this: *mut Header) -> *mut u8 {
    unsafe { (this as *mut u8).add(HEADER_SIZE) }
  }
}

/// Initializes `sentinel` as a payload-less ring of one.
///
/// The sentinel's status is set to [`Status::Allocated`] so that list walks
/// never mistake it for a coalesce candidate; it is never unlinked and
/// never re-initialized once `sentinel_ready` latches (see the crate's
/// entry points).
pub unsafe fn init_sentinel(sentinel: *mut Header) {
  unsafe {
    (*sentinel).payload_size = 0;
    (*sentinel).status = Status::Allocated;
    (*sentinel).prev = sentinel;
    (*sentinel).next = sentinel;
  }
}

/// Appends `node` to the tail of the list, just before the sentinel.
///
/// Constant time: touches only the four neighbor pointers involved.
pub unsafe fn append(sentinel: *mut Header, node: *mut Header) {
  unsafe {
    let last = (*sentinel).prev;

    (*last).next = node;
    (*node).prev = last;
    (*node).next = sentinel;
    (*sentinel).prev = node;
  }
}

/// Removes `node` from the list.
///
/// Constant time: touches only the four neighbor pointers involved. Does
/// not touch `node`'s own `prev`/`next` fields, so the caller is free to
/// repurpose or discard `node` afterwards.
pub unsafe fn unlink(node: *mut Header) {
  unsafe {
    let prev = (*node).prev;
    let next = (*node).next;

    (*prev).next = next;
    (*next).prev = prev;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Builds a detached `Header` node (not threaded into any list yet).
  fn make_node(payload_size: usize, status: Status) -> *mut Header {
    Box::into_raw(Box::new(Header {
      payload_size,
      status,
      prev: std::ptr::null_mut(),
      next: std::ptr::null_mut(),
    }))
  }

  unsafe fn free_node(node: *mut Header) {
    unsafe {
      drop(Box::from_raw(node));
    }
  }

  #[test]
  fn header_size_is_aligned() {
    assert_eq!(HEADER_SIZE % 8, 0);
    assert!(HEADER_SIZE >= mem::size_of::<Header>());
  }

  #[test]
  fn sentinel_is_a_ring_of_one() {
    unsafe {
      let sentinel = make_node(0, Status::Free);
      init_sentinel(sentinel);

      assert_eq!((*sentinel).prev, sentinel);
      assert_eq!((*sentinel).next, sentinel);
      assert_eq!((*sentinel).status, Status::Allocated);

      free_node(sentinel);
    }
  }

  #[test]
  fn append_grows_ring_in_insertion_order() {
    unsafe {
      let sentinel = make_node(0, Status::Free);
      init_sentinel(sentinel);

      let a = make_node(16, Status::Free);
      let b = make_node(32, Status::Free);

      append(sentinel, a);
      append(sentinel, b);

      assert_eq!((*sentinel).next, a);
      assert_eq!((*a).next, b);
      assert_eq!((*b).next, sentinel);

      assert_eq!((*sentinel).prev, b);
      assert_eq!((*b).prev, a);
      assert_eq!((*a).prev, sentinel);

      free_node(a);
      free_node(b);
      free_node(sentinel);
    }
  }

  #[test]
  fn unlink_removes_middle_node_and_closes_the_ring() {
    unsafe {
      let sentinel = make_node(0, Status::Free);
      init_sentinel(sentinel);

      let a = make_node(16, Status::Free);
      let b = make_node(32, Status::Free);
      let c = make_node(48, Status::Free);

      append(sentinel, a);
      append(sentinel, b);
      append(sentinel, c);

      unlink(b);

      assert_eq!((*a).next, c);
      assert_eq!((*c).prev, a);

      // Walking from the sentinel visits exactly a and c.
      let mut seen = Vec::new();
      let mut cur = (*sentinel).next;
      while cur != sentinel {
        seen.push(cur);
        cur = (*cur).next;
      }
      assert_eq!(seen, vec![a, c]);

      free_node(a);
      free_node(b);
      free_node(c);
      free_node(sentinel);
    }
  }

  #[test]
  fn payload_sits_immediately_after_the_header() {
    unsafe {
      let node = make_node(64, Status::Allocated);
      let payload = Header::payload(node);

      assert_eq!(payload as usize, node as usize + HEADER_SIZE);

      free_node(node);
    }
  }
}
