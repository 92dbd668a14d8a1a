//! Segregated free-list index.
//!
//! Six size classes over the free blocks of the chain, linked through each
//! header's `next_free` field:
//!
//! ```text
//!   class   0      1      2      3      4       5
//!   limit  ≤64   ≤128   ≤256   ≤512   ≤1024   >1024
//! ```
//!
//! The index is only an accelerator. The chain stays the source of truth and
//! [`Bins::rebuild`] can regenerate the whole index from it at any time.

use std::ptr;

use crate::{block::Header, chain::Chain};

pub const NUM_BINS: usize = 6;

const CLASS_LIMITS: [usize; NUM_BINS - 1] = [64, 128, 256, 512, 1024];

/// Size class for a payload size.
pub fn bin_index(size: usize) -> usize {
  CLASS_LIMITS
    .iter()
    .position(|&limit| size <= limit)
    .unwrap_or(NUM_BINS - 1)
}

/// One singly-linked list per class, each kept in chain order.
pub struct Bins {
  heads: [*mut Header; NUM_BINS],
  tails: [*mut Header; NUM_BINS],
}

impl Bins {
  pub fn new() -> Self {
    Self {
      heads: [ptr::null_mut(); NUM_BINS],
      tails: [ptr::null_mut(); NUM_BINS],
    }
  }

  pub fn clear(&mut self) {
    self.heads = [ptr::null_mut(); NUM_BINS];
    self.tails = [ptr::null_mut(); NUM_BINS];
  }

  /// Appends a free block at the back of its class.
  ///
  /// # Safety
  ///
  /// `block` must be a live free header not linked into any class.
  pub unsafe fn insert(
    &mut self,
    block: *mut Header,
  ) {
    unsafe {
      let index = bin_index((*block).size);
      (*block).next_free = ptr::null_mut();

      if self.tails[index].is_null() {
        self.heads[index] = block;
      } else {
        (*self.tails[index]).next_free = block;
      }
      self.tails[index] = block;
    }
  }

  /// Unlinks and returns the tightest free block of at least `size` bytes,
  /// looking at the class of `size` first and moving up.
  ///
  /// # Safety
  ///
  /// Every block linked in the index must be a live header.
  pub unsafe fn take(
    &mut self,
    size: usize,
  ) -> Option<*mut Header> {
    unsafe {
      for index in bin_index(size)..NUM_BINS {
        let mut best: *mut Header = ptr::null_mut();
        let mut best_prev: *mut Header = ptr::null_mut();

        let mut prev: *mut Header = ptr::null_mut();
        let mut current = self.heads[index];

        while !current.is_null() {
          if (*current).is_free()
            && (*current).size >= size
            && (best.is_null() || (*current).size < (*best).size)
          {
            best = current;
            best_prev = prev;
          }
          prev = current;
          current = (*current).next_free;
        }

        if !best.is_null() {
          self.unlink(index, best_prev, best);
          return Some(best);
        }
      }

      None
    }
  }

  /// Unlinks `block` wherever it is indexed. Returns whether it was found.
  ///
  /// # Safety
  ///
  /// Every block linked in the index must be a live header.
  pub unsafe fn remove(
    &mut self,
    block: *mut Header,
  ) -> bool {
    unsafe {
      for index in 0..NUM_BINS {
        let mut prev: *mut Header = ptr::null_mut();
        let mut current = self.heads[index];

        while !current.is_null() {
          if current == block {
            self.unlink(index, prev, current);
            return true;
          }
          prev = current;
          current = (*current).next_free;
        }
      }

      false
    }
  }

  unsafe fn unlink(
    &mut self,
    index: usize,
    prev: *mut Header,
    block: *mut Header,
  ) {
    unsafe {
      if prev.is_null() {
        self.heads[index] = (*block).next_free;
      } else {
        (*prev).next_free = (*block).next_free;
      }
      if self.tails[index] == block {
        self.tails[index] = prev;
      }
      (*block).next_free = ptr::null_mut();
    }
  }

  /// Drops the whole index and re-links every free block of the chain.
  pub fn rebuild(
    &mut self,
    chain: &Chain,
  ) {
    self.clear();

    for block in chain.iter() {
      unsafe {
        (*block).next_free = ptr::null_mut();
        if (*block).is_free() {
          self.insert(block);
        }
      }
    }
  }

  /// Headers linked in class `index`, front to back.
  pub fn class(
    &self,
    index: usize,
  ) -> Vec<*mut Header> {
    let mut blocks = Vec::new();
    let mut current = self.heads[index];

    while !current.is_null() {
      blocks.push(current);
      current = unsafe { (*current).next_free };
    }

    blocks
  }

  /// Every indexed header, class by class.
  pub fn indexed(&self) -> Vec<*mut Header> {
    (0..NUM_BINS).flat_map(|index| self.class(index)).collect()
  }
}
