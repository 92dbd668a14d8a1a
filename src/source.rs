//! Arena growth providers.
//!
//! ```text
//!   grow(bytes)
//!        │
//!        ├── Sbrk    extends the program break (unix)
//!        ├── System  asks the platform allocator for an aligned region
//!        └── Region  bumps through one pre-reserved, fixed-size region
//! ```
//!
//! Every provider hands out 16-byte aligned memory that stays valid for as
//! long as the provider lives. Nothing is ever given back while the
//! allocator runs; the arena only grows.

use std::{alloc, ptr::NonNull};

use crate::align::{ALIGNMENT, align_up};

/// Source of raw bytes for the arena.
pub trait ArenaSource {
  /// Obtains `bytes` fresh bytes (a multiple of 16) starting at a 16-byte
  /// aligned address, or `None` when no more memory is available.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>>;

  /// Short human-readable name, used in logs.
  fn name(&self) -> &'static str;
}

impl<S: ArenaSource + ?Sized> ArenaSource for Box<S> {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    (**self).grow(bytes)
  }

  fn name(&self) -> &'static str {
    (**self).name()
  }
}

#[cfg(unix)]
pub use self::sbrk::Sbrk;

/// Provider used by [`crate::Allocator::new`]: the program break where the
/// host has one, the platform allocator otherwise.
#[cfg(unix)]
pub type DefaultSource = Sbrk;

#[cfg(not(unix))]
pub type DefaultSource = System;

#[cfg(unix)]
mod sbrk {
  use std::ptr::NonNull;

  use libc::{c_void, intptr_t, sbrk};

  use super::ArenaSource;
  use crate::align::align_up;

  /// Grows the arena by moving the program break with `sbrk(2)`.
  ///
  /// The break is process-wide. Two allocators backed by `Sbrk` must not grow
  /// from different threads at the same time.
  #[derive(Debug, Default)]
  pub struct Sbrk {
    padding: usize,
  }

  impl Sbrk {
    pub fn new() -> Self {
      Self { padding: 0 }
    }

    /// Bytes the break was moved by to realign it, on top of the bytes
    /// handed out.
    pub fn padding(&self) -> usize {
      self.padding
    }

    /// Current program break.
    pub fn program_break() -> *mut u8 {
      unsafe { sbrk(0) as *mut u8 }
    }
  }

  impl ArenaSource for Sbrk {
    fn grow(
      &mut self,
      bytes: usize,
    ) -> Option<NonNull<u8>> {
      unsafe {
        let current = sbrk(0);
        if current == usize::MAX as *mut c_void {
          return None;
        }

        // The initial break is not guaranteed to be 16-aligned.
        let padding = align_up(current as usize)? - current as usize;
        let increment = intptr_t::try_from(padding.checked_add(bytes)?).ok()?;

        let address = sbrk(increment);
        if address == usize::MAX as *mut c_void {
          return None;
        }
        debug_assert_eq!(address, current);
        self.padding += padding;

        NonNull::new((address as *mut u8).add(padding))
      }
    }

    fn name(&self) -> &'static str {
      "sbrk"
    }
  }
}

/// Grows the arena with aligned requests to the platform allocator.
///
/// Regions stay mapped until the source is dropped.
#[derive(Debug, Default)]
pub struct System {
  regions: Vec<(NonNull<u8>, alloc::Layout)>,
}

impl System {
  pub fn new() -> Self {
    Self { regions: Vec::new() }
  }
}

impl ArenaSource for System {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    if bytes == 0 {
      return None;
    }

    let layout = alloc::Layout::from_size_align(bytes, ALIGNMENT).ok()?;
    let address = NonNull::new(unsafe { alloc::alloc(layout) })?;
    self.regions.push((address, layout));

    Some(address)
  }

  fn name(&self) -> &'static str {
    "system"
  }
}

impl Drop for System {
  fn drop(&mut self) {
    for (address, layout) in self.regions.drain(..) {
      unsafe { alloc::dealloc(address.as_ptr(), layout) };
    }
  }
}

/// Hands out consecutive slices of one fixed-size region.
///
/// Consecutive growths are address-adjacent, and growth past the capacity
/// fails, which makes it the provider of choice for exercising exhaustion.
#[derive(Debug)]
pub struct Region {
  base: Option<NonNull<u8>>,
  layout: alloc::Layout,
  used: usize,
}

impl Region {
  /// Reserves `capacity` bytes (rounded up to 16).
  ///
  /// Returns `None` if the platform allocator cannot reserve the region.
  pub fn with_capacity(capacity: usize) -> Option<Self> {
    let capacity = align_up(capacity)?;
    let layout = alloc::Layout::from_size_align(capacity, ALIGNMENT).ok()?;

    let base = if capacity == 0 {
      None
    } else {
      Some(NonNull::new(unsafe { alloc::alloc(layout) })?)
    };

    Some(Self { base, layout, used: 0 })
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  pub fn used(&self) -> usize {
    self.used
  }

  pub fn base(&self) -> Option<NonNull<u8>> {
    self.base
  }
}

impl ArenaSource for Region {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    let base = self.base?;
    let end = self.used.checked_add(bytes)?;

    if bytes == 0 || end > self.capacity() {
      return None;
    }

    let address = unsafe { base.add(self.used) };
    self.used = end;

    Some(address)
  }

  fn name(&self) -> &'static str {
    "region"
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    if let Some(base) = self.base.take() {
      unsafe { alloc::dealloc(base.as_ptr(), self.layout) };
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::align::is_aligned;

  #[test]
  fn test_system_grow() {
    let mut source = System::new();

    let first = source.grow(64).unwrap();
    let second = source.grow(128).unwrap();

    assert!(is_aligned(first.as_ptr() as usize));
    assert!(is_aligned(second.as_ptr() as usize));
    assert_ne!(first, second);
    assert!(source.grow(0).is_none());
  }

  #[test]
  fn test_region_is_contiguous_and_bounded() {
    let mut source = Region::with_capacity(100).unwrap();
    assert_eq!(source.capacity(), 112);

    let first = source.grow(48).unwrap();
    let second = source.grow(48).unwrap();

    assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 48);
    assert_eq!(source.used(), 96);

    // 16 bytes left
    assert!(source.grow(32).is_none());
    assert_eq!(source.used(), 96);
    assert!(source.grow(16).is_some());
  }

  #[test]
  fn test_empty_region_never_grows() {
    let mut source = Region::with_capacity(0).unwrap();
    assert!(source.base().is_none());
    assert!(source.grow(16).is_none());
  }
}
