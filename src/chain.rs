//! The block chain and the split/coalesce engine.
//!
//! ```text
//!   head                                                      tail
//!    │                                                          │
//!    ▼                                                          ▼
//!   ┌────────┬─────────┐   ┌────────┬──────┐   ┌────────┬──────────────┐
//!   │ header │ payload │──►│ header │ pay. │──►│ header │   payload    │──► null
//!   └────────┴─────────┘   └────────┴──────┘   └────────┴──────────────┘
//! ```
//!
//! The chain owns every block ever carved from the arena, in the order they
//! were created. Splitting inserts the remainder right after its parent, so
//! blocks from one contiguous growth stay address-ordered.

use std::ptr;

use tracing::debug;

use crate::{
  align::ALIGNMENT,
  block::{BlockInfo, BlockState, HEADER_SIZE, Header},
};

/// Smallest payload a split remainder may have.
pub const MIN_REMAINDER: usize = ALIGNMENT;

pub struct Chain {
  head: *mut Header,
  tail: *mut Header,
}

impl Chain {
  pub fn new() -> Self {
    Self {
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
    }
  }

  pub fn head(&self) -> *mut Header {
    self.head
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  /// Appends a freshly grown block at the tail.
  ///
  /// # Safety
  ///
  /// `block` must be a live header that is not yet part of any chain.
  pub unsafe fn push(
    &mut self,
    block: *mut Header,
  ) {
    unsafe {
      (*block).next = ptr::null_mut();

      if self.head.is_null() {
        self.head = block;
      } else {
        (*self.tail).next = block;
      }
      self.tail = block;
    }
  }

  pub fn iter(&self) -> Blocks<'_> {
    Blocks {
      current: self.head,
      _chain: self,
    }
  }

  pub fn snapshot(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.iter().map(|block| unsafe { BlockInfo::of(block) })
  }

  /// Finds the block whose payload starts at `payload`.
  pub fn find(
    &self,
    payload: *mut u8,
  ) -> Option<*mut Header> {
    let header = Header::from_payload(payload);
    self.iter().find(|&block| block == header)
  }

  /// Whether the bytes `header` would occupy sit entirely inside the payload
  /// of a free block, as they do once a merge has absorbed that header.
  pub fn inside_free_payload(
    &self,
    header: *mut Header,
  ) -> bool {
    let start = header as usize;
    let Some(end) = start.checked_add(HEADER_SIZE) else {
      return false;
    };

    self
      .snapshot()
      .any(|info| info.is_free() && info.payload <= start && end <= info.end())
  }

  /// Whether `block`'s successor starts exactly where `block`'s payload ends.
  ///
  /// # Safety
  ///
  /// `block` must be a live header of this chain.
  pub unsafe fn touches_next(
    &self,
    block: *mut Header,
  ) -> bool {
    unsafe {
      let next = (*block).next;
      !next.is_null() && Header::end(block) == next as *mut u8
    }
  }

  /// Shrinks `block` to `size` bytes and turns the tail into a new free block,
  /// provided the tail can hold a header plus [`MIN_REMAINDER`] bytes.
  ///
  /// Returns the remainder, or `None` when the block was left untouched.
  ///
  /// # Safety
  ///
  /// `block` must be a live header of this chain and `size` a multiple of 16.
  pub unsafe fn split(
    &mut self,
    block: *mut Header,
    size: usize,
  ) -> Option<*mut Header> {
    unsafe {
      let needed = size.checked_add(HEADER_SIZE + MIN_REMAINDER)?;
      if (*block).size < needed {
        return None;
      }

      let remainder = Header::write(
        Header::payload(block).add(size),
        (*block).size - size - HEADER_SIZE,
        BlockState::Free,
        (*block).next,
      );

      (*block).size = size;
      (*block).next = remainder;

      if self.tail == block {
        self.tail = remainder;
      }

      debug!(
        block = ?block,
        size,
        remainder = (*remainder).size,
        "split block"
      );

      Some(remainder)
    }
  }

  /// Folds `block`'s successor into `block`. Returns the absorbed header.
  ///
  /// # Safety
  ///
  /// `block` must be a live header whose successor is address-adjacent.
  pub unsafe fn absorb_next(
    &mut self,
    block: *mut Header,
  ) -> *mut Header {
    unsafe {
      let next = (*block).next;
      debug_assert!(self.touches_next(block));

      (*block).size += HEADER_SIZE + (*next).size;
      (*block).next = (*next).next;

      if self.tail == next {
        self.tail = block;
      }

      next
    }
  }

  /// Merges every pair of adjacent free blocks until none is left.
  ///
  /// `on_merge(absorbed, survivor)` fires for each merge, before the absorbed
  /// header is forgotten. Returns the number of merges.
  pub fn coalesce<F>(
    &mut self,
    mut on_merge: F,
  ) -> usize
  where
    F: FnMut(*mut Header, *mut Header),
  {
    let mut merges = 0;
    let mut current = self.head;

    unsafe {
      while !current.is_null() && !(*current).next.is_null() {
        let next = (*current).next;

        if (*current).is_free() && (*next).is_free() && self.touches_next(current) {
          self.absorb_next(current);
          on_merge(next, current);
          merges += 1;
        } else {
          current = next;
        }
      }
    }

    if merges > 0 {
      debug!(merges, "coalesced free blocks");
    }

    merges
  }
}

/// Iterator over the raw headers of a chain, head to tail.
pub struct Blocks<'a> {
  current: *mut Header,
  _chain: &'a Chain,
}

impl Iterator for Blocks<'_> {
  type Item = *mut Header;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }

    let block = self.current;
    self.current = unsafe { (*block).next };
    Some(block)
  }
}
