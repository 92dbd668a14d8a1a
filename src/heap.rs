use std::ptr::{self, NonNull};

use tracing::{debug, warn};

use crate::{
  align::{align_up, is_aligned},
  bins::Bins,
  block::{BlockInfo, BlockState, HEADER_SIZE, Header},
  chain::Chain,
  error::{AllocError, Result},
  source::{ArenaSource, DefaultSource},
  strategy::{SearchPolicy, Strategy},
};

/// A segregated-fit heap over memory obtained from an [`ArenaSource`].
///
/// The allocator is a plain context object: it holds the block chain, the
/// bin index and the active fit policy, and every operation goes through
/// `&mut self`. Independent instances manage independent arenas. It is not
/// `Send` or `Sync`; callers sharing one across threads must serialize
/// access themselves.
pub struct Allocator<S: ArenaSource = DefaultSource> {
  source: S,
  pub(crate) chain: Chain,
  bins: Bins,
  policy: Box<dyn SearchPolicy>,
  arena_bytes: usize,
}

impl Allocator<DefaultSource> {
  /// An allocator growing through the host's default provider, searching
  /// with first-fit.
  pub fn new() -> Self {
    Self::with_source(DefaultSource::default())
  }
}

impl Default for Allocator<DefaultSource> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: ArenaSource> Allocator<S> {
  pub fn with_source(source: S) -> Self {
    Self::with_strategy(source, Strategy::default())
  }

  pub fn with_strategy(
    source: S,
    strategy: Strategy,
  ) -> Self {
    Self {
      source,
      chain: Chain::new(),
      bins: Bins::new(),
      policy: strategy.into_policy(),
      arena_bytes: 0,
    }
  }

  pub fn strategy(&self) -> Strategy {
    self.policy.kind()
  }

  /// Swaps the fit policy. A next-fit cursor starts over from the head.
  pub fn set_strategy(
    &mut self,
    strategy: Strategy,
  ) {
    debug!(%strategy, "fit strategy selected");
    self.policy = strategy.into_policy();
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Bytes spanned by blocks, headers included. Alignment padding a source
  /// inserts between growths is not counted (see [`Sbrk::padding`]).
  ///
  /// [`Sbrk::padding`]: crate::source::Sbrk::padding
  pub fn arena_bytes(&self) -> usize {
    self.arena_bytes
  }

  /// Snapshot of every block, in chain order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.chain.snapshot()
  }

  /// Snapshot of the blocks currently linked in the bin index.
  pub fn indexed_blocks(&self) -> Vec<BlockInfo> {
    self
      .bins
      .indexed()
      .into_iter()
      .map(|block| unsafe { BlockInfo::of(block) })
      .collect()
  }

  /// Usable payload size behind a live pointer.
  pub fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> Option<usize> {
    let block = self.live_block(ptr).ok()?;
    Some(unsafe { (*block).size })
  }

  /// Obtains a new block able to hold `size` (already aligned) bytes.
  fn grow(
    &mut self,
    size: usize,
  ) -> Result<*mut Header> {
    let total = size
      .checked_add(HEADER_SIZE)
      .ok_or(AllocError::OutOfMemory { requested: size })?;

    let Some(address) = self.source.grow(total) else {
      warn!(
        source = self.source.name(),
        bytes = total,
        "arena growth refused"
      );
      return Err(AllocError::OutOfMemory { requested: size });
    };

    self.arena_bytes += total;
    debug!(
      source = self.source.name(),
      address = ?address,
      bytes = total,
      "arena grown"
    );

    Ok(unsafe {
      Header::write(
        address.as_ptr(),
        total - HEADER_SIZE,
        BlockState::Used,
        ptr::null_mut(),
      )
    })
  }

  /// Grows the arena and links the new block at the tail.
  fn grow_and_append(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let block = self.grow(size)?;
    unsafe {
      self.chain.push(block);
      Ok(NonNull::new_unchecked(Header::payload(block)))
    }
  }

  /// Allocates at least `size` bytes, 16-byte aligned.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }
    let size = align_up(size).ok_or(AllocError::OutOfMemory { requested: size })?;

    if self.chain.is_empty() {
      return self.grow_and_append(size);
    }

    let mut block = if self.policy.uses_bins() {
      unsafe { self.bins.take(size) }.unwrap_or(ptr::null_mut())
    } else {
      ptr::null_mut()
    };

    if block.is_null() {
      block = unsafe { self.policy.find(&self.chain, size) };

      if !block.is_null() {
        unsafe { self.bins.remove(block) };
      }
    }

    if block.is_null() {
      return self.grow_and_append(size);
    }

    unsafe {
      self.chain.split(block, size);
      (*block).state = BlockState::Used;
      Ok(NonNull::new_unchecked(Header::payload(block)))
    }
  }

  /// [`try_allocate`](Self::try_allocate) returning null on any failure.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    self
      .try_allocate(size)
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Allocates `count * size` bytes and zeroes them.
  pub fn try_zeroed_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if count == 0 {
      return Err(AllocError::ZeroCount);
    }
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let total = count
      .checked_mul(size)
      .ok_or(AllocError::SizeOverflow { count, size })?;

    let payload = self.try_allocate(total)?;
    unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };

    Ok(payload)
  }

  pub fn zeroed_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    self
      .try_zeroed_allocate(count, size)
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Returns a block to the heap.
  ///
  /// A null pointer is ignored. Freeing an already free block or a pointer
  /// this allocator never handed out is reported and changes nothing.
  pub fn free(
    &mut self,
    ptr: *mut u8,
  ) -> Result<()> {
    if ptr.is_null() {
      return Ok(());
    }

    let Some(block) = self.known_block(ptr) else {
      // a header folded into a free neighbour was freed before
      if is_aligned(ptr as usize)
        && self
          .chain
          .inside_free_payload(Header::from_payload(ptr))
      {
        return Err(double_free(ptr));
      }
      return Err(unknown_pointer(ptr));
    };

    unsafe {
      if (*block).is_free() {
        return Err(double_free(ptr));
      }

      debug!(address = ?ptr, size = (*block).size, "freed block");
      self.release(block);
    }

    Ok(())
  }

  /// Resizes the allocation behind `ptr` to at least `new_size` bytes.
  ///
  /// Returns `Ok(None)` when the call degraded to a free. On failure the
  /// original allocation is left untouched.
  pub fn try_resize(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    if ptr.is_null() {
      return self.try_allocate(new_size).map(Some);
    }

    if new_size == 0 {
      self.free(ptr)?;
      return Ok(None);
    }

    let block = self.live_block(ptr)?;
    let size = align_up(new_size).ok_or(AllocError::OutOfMemory {
      requested: new_size,
    })?;

    unsafe {
      let current = NonNull::new_unchecked(ptr);

      if (*block).size >= size {
        if self.chain.split(block, size).is_some() {
          self.tidy();
        }
        return Ok(Some(current));
      }

      let next = (*block).next;
      if self.chain.touches_next(block)
        && (*next).is_free()
        && (*block).size + HEADER_SIZE + (*next).size >= size
      {
        self.bins.remove(next);
        self.chain.absorb_next(block);
        self.policy.on_merge(next, block);
        debug!(address = ?ptr, size = (*block).size, "grew block in place");

        if self.chain.split(block, size).is_some() {
          self.tidy();
        }
        return Ok(Some(current));
      }

      let old_size = (*block).size;
      let moved = self.try_allocate(size)?;
      ptr::copy_nonoverlapping(ptr, moved.as_ptr(), old_size);
      debug!(from = ?ptr, to = ?moved, size, "relocated block");
      self.release(block);

      Ok(Some(moved))
    }
  }

  /// [`try_resize`](Self::try_resize) returning null on failure or when the
  /// call degraded to a free.
  pub fn resize(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    match self.try_resize(ptr, new_size) {
      Ok(Some(moved)) => moved.as_ptr(),
      Ok(None) | Err(_) => ptr::null_mut(),
    }
  }

  /// Marks `block` free, merges free neighbours and reindexes.
  unsafe fn release(
    &mut self,
    block: *mut Header,
  ) {
    unsafe { (*block).state = BlockState::Free };
    self.tidy();
  }

  fn tidy(&mut self) {
    let policy = &mut self.policy;
    self
      .chain
      .coalesce(|absorbed, survivor| policy.on_merge(absorbed, survivor));
    self.bins.rebuild(&self.chain);
  }

  /// Resolves a payload pointer to its header, if it starts a payload in
  /// this chain.
  fn known_block(
    &self,
    ptr: *mut u8,
  ) -> Option<*mut Header> {
    if is_aligned(ptr as usize) {
      self.chain.find(ptr)
    } else {
      None
    }
  }

  /// Like [`known_block`](Self::known_block), additionally refusing free blocks.
  fn live_block(
    &self,
    ptr: *mut u8,
  ) -> Result<*mut Header> {
    let block = self.known_block(ptr).ok_or_else(|| unknown_pointer(ptr))?;

    if unsafe { (*block).is_free() } {
      return Err(AllocError::UnknownPointer {
        address: ptr as usize,
      });
    }

    Ok(block)
  }
}

fn double_free(ptr: *mut u8) -> AllocError {
  warn!(address = ?ptr, "double free detected");
  AllocError::DoubleFree {
    address: ptr as usize,
  }
}

fn unknown_pointer(ptr: *mut u8) -> AllocError {
  warn!(address = ?ptr, "pointer not owned by this allocator");
  AllocError::UnknownPointer {
    address: ptr as usize,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::{Region, System};

  fn heap() -> Allocator<System> {
    Allocator::with_source(System::new())
  }

  fn region_heap(capacity: usize) -> Allocator<Region> {
    Allocator::with_source(Region::with_capacity(capacity).unwrap())
  }

  fn states<S: ArenaSource>(heap: &Allocator<S>) -> Vec<(usize, BlockState)> {
    heap.blocks().map(|info| (info.size, info.state)).collect()
  }

  #[test]
  fn test_alloc() {
    let mut allocator = heap();

    unsafe {
      let first_addr = allocator.allocate(8) as *mut u64;

      *first_addr = 3u64;

      assert_eq!(*first_addr, 3);

      let size: usize = 6;

      let second_addr = allocator.allocate(size * 2) as *mut u16;

      for i in 0..size {
        *(second_addr.add(i)) = (i + 1) as u16;
      }

      assert_eq!(*first_addr, 3);

      for i in 0..size {
        assert_eq!((i + 1) as u16, *(second_addr.add(i)))
      }

      allocator.free(first_addr as *mut u8).unwrap();

      let third_addr = allocator.allocate(4) as *mut u32;

      assert_eq!(first_addr as *mut u32, third_addr);
    }
  }

  #[test]
  fn test_zero_size_is_rejected() {
    let mut allocator = heap();

    assert_eq!(allocator.try_allocate(0), Err(AllocError::ZeroSize));
    assert!(allocator.allocate(0).is_null());
    assert_eq!(allocator.arena_bytes(), 0);
  }

  #[test]
  fn test_sizes_are_aligned() {
    let mut allocator = heap();

    for size in [1, 15, 16, 17, 100, 1000] {
      let ptr = allocator.allocate(size);
      assert!(is_aligned(ptr as usize));
      assert_eq!(allocator.usable_size(ptr), align_up(size));
    }
  }

  #[test]
  fn test_first_allocation_grows_once() {
    let mut allocator = heap();

    allocator.allocate(100);

    assert_eq!(allocator.blocks().count(), 1);
    assert_eq!(allocator.arena_bytes(), 112 + HEADER_SIZE);
  }

  #[test]
  fn test_free_null_is_noop() {
    let mut allocator = heap();
    assert_eq!(allocator.free(ptr::null_mut()), Ok(()));
  }

  #[test]
  fn test_double_free_reports_once() {
    let mut allocator = heap();
    let a = allocator.allocate(32);
    allocator.allocate(32);

    assert_eq!(allocator.free(a), Ok(()));
    let before = states(&allocator);

    assert_eq!(
      allocator.free(a),
      Err(AllocError::DoubleFree { address: a as usize })
    );
    assert_eq!(states(&allocator), before);
  }

  #[test]
  fn test_second_free_after_merge_is_double_free() {
    let mut allocator = region_heap(4096);
    let a = allocator.allocate(64);
    let b = allocator.allocate(64);
    allocator.allocate(16);

    allocator.free(a).unwrap();
    allocator.free(b).unwrap();
    let before = states(&allocator);

    assert_eq!(
      allocator.try_resize(b, 0),
      Err(AllocError::DoubleFree { address: b as usize })
    );
    assert_eq!(states(&allocator), before);
  }

  #[test]
  fn test_foreign_pointer_is_rejected() {
    let mut allocator = heap();
    let a = allocator.allocate(64);
    let mut local = 0u128;
    let foreign = &mut local as *mut u128 as *mut u8;

    assert_eq!(
      allocator.free(foreign),
      Err(AllocError::UnknownPointer {
        address: foreign as usize
      })
    );
    assert!(matches!(
      allocator.free(a.wrapping_add(16)),
      Err(AllocError::UnknownPointer { .. })
    ));
    assert!(matches!(
      allocator.free(a.wrapping_add(3)),
      Err(AllocError::UnknownPointer { .. })
    ));
    assert_eq!(states(&allocator), vec![(64, BlockState::Used)]);
  }

  #[test]
  fn test_reuse_splits_freed_block() {
    let mut allocator = region_heap(4096);
    let a = allocator.allocate(512);
    allocator.allocate(16);
    allocator.free(a).unwrap();

    let b = allocator.allocate(64);

    assert_eq!(a, b);
    assert_eq!(
      states(&allocator),
      vec![
        (64, BlockState::Used),
        (512 - 64 - HEADER_SIZE, BlockState::Free),
        (16, BlockState::Used),
      ]
    );
  }

  #[test]
  fn test_split_remainder_found_by_search() {
    let mut allocator = region_heap(4096);
    let a = allocator.allocate(512);
    allocator.allocate(16);
    allocator.free(a).unwrap();

    // the remainder of this split is not indexed until the next free
    allocator.allocate(64);
    let arena = allocator.arena_bytes();
    let c = allocator.allocate(128);

    assert_eq!(allocator.arena_bytes(), arena);
    assert_eq!(c as usize, a as usize + 64 + HEADER_SIZE);
  }

  #[test]
  fn test_out_of_memory() {
    let mut allocator = region_heap(256);

    let a = allocator.allocate(128);
    assert!(!a.is_null());

    assert_eq!(
      allocator.try_allocate(256),
      Err(AllocError::OutOfMemory { requested: 256 })
    );
    assert!(allocator.allocate(256).is_null());
    assert_eq!(states(&allocator), vec![(128, BlockState::Used)]);
  }

  #[test]
  fn test_zeroed_allocate() {
    let mut allocator = heap();

    // dirty a block, free it, and get it back zeroed
    let dirty = allocator.allocate(64);
    unsafe { ptr::write_bytes(dirty, 0xAB, 64) };
    allocator.allocate(16);
    allocator.free(dirty).unwrap();

    let zeroed = allocator.zeroed_allocate(4, 16);
    assert_eq!(zeroed, dirty);

    let bytes = unsafe { std::slice::from_raw_parts(zeroed, 64) };
    assert!(bytes.iter().all(|&b| b == 0));
  }

  #[test]
  fn test_zeroed_allocate_rejections() {
    let mut allocator = heap();

    assert_eq!(allocator.try_zeroed_allocate(0, 8), Err(AllocError::ZeroCount));
    assert_eq!(allocator.try_zeroed_allocate(8, 0), Err(AllocError::ZeroSize));
    assert_eq!(
      allocator.try_zeroed_allocate(2, usize::MAX),
      Err(AllocError::SizeOverflow {
        count: 2,
        size: usize::MAX
      })
    );
    assert!(allocator.zeroed_allocate(2, usize::MAX).is_null());
    assert_eq!(allocator.arena_bytes(), 0);
  }

  #[test]
  fn test_resize_null_allocates() {
    let mut allocator = heap();
    let ptr = allocator.resize(ptr::null_mut(), 40);

    assert!(!ptr.is_null());
    assert_eq!(allocator.usable_size(ptr), Some(48));
  }

  #[test]
  fn test_resize_to_zero_frees() {
    let mut allocator = heap();
    let ptr = allocator.allocate(40);

    assert_eq!(allocator.try_resize(ptr, 0), Ok(None));
    assert_eq!(states(&allocator), vec![(48, BlockState::Free)]);
  }

  #[test]
  fn test_resize_shrinks_in_place() {
    let mut allocator = region_heap(4096);
    let ptr = allocator.allocate(1024);

    assert_eq!(allocator.resize(ptr, 100), ptr);
    assert_eq!(
      states(&allocator),
      vec![
        (112, BlockState::Used),
        (1024 - 112 - HEADER_SIZE, BlockState::Free),
      ]
    );
  }

  #[test]
  fn test_resize_shrink_merges_with_free_neighbour() {
    let mut allocator = region_heap(4096);
    let a = allocator.allocate(512);
    let b = allocator.allocate(256);
    allocator.allocate(16);
    allocator.free(b).unwrap();

    assert_eq!(allocator.resize(a, 64), a);
    assert_eq!(
      states(&allocator),
      vec![
        (64, BlockState::Used),
        (512 - 64 + 256, BlockState::Free),
        (16, BlockState::Used),
      ]
    );
  }

  #[test]
  fn test_resize_grows_into_free_neighbour() {
    let mut allocator = region_heap(4096);
    let a = allocator.allocate(64);
    let b = allocator.allocate(512);
    allocator.allocate(16);
    allocator.free(b).unwrap();

    unsafe { ptr::write_bytes(a, 0x5A, 64) };

    assert_eq!(allocator.resize(a, 200), a);
    assert_eq!(
      states(&allocator),
      vec![
        (208, BlockState::Used),
        (64 + 512 - 208, BlockState::Free),
        (16, BlockState::Used),
      ]
    );

    let bytes = unsafe { std::slice::from_raw_parts(a, 64) };
    assert!(bytes.iter().all(|&b| b == 0x5A));
  }

  #[test]
  fn test_resize_relocates_and_copies() {
    let mut allocator = region_heap(4096);
    let a = allocator.allocate(32);
    allocator.allocate(16);

    unsafe {
      for i in 0..32 {
        a.add(i).write(i as u8);
      }
    }

    let moved = allocator.resize(a, 300);

    assert_ne!(moved, a);
    let bytes = unsafe { std::slice::from_raw_parts(moved, 32) };
    assert!(bytes.iter().enumerate().all(|(i, &b)| b == i as u8));
    assert_eq!(
      states(&allocator),
      vec![
        (32, BlockState::Free),
        (16, BlockState::Used),
        (304, BlockState::Used),
      ]
    );
  }

  #[test]
  fn test_failed_relocation_keeps_original() {
    let mut allocator = region_heap(256);
    let a = allocator.allocate(32);
    unsafe { a.write(7) };

    assert_eq!(
      allocator.try_resize(a, 4096),
      Err(AllocError::OutOfMemory { requested: 4096 })
    );
    assert!(allocator.resize(a, 4096).is_null());
    assert_eq!(states(&allocator), vec![(32, BlockState::Used)]);
    assert_eq!(unsafe { a.read() }, 7);
  }

  #[test]
  fn test_resize_of_freed_pointer_is_rejected() {
    let mut allocator = heap();
    let a = allocator.allocate(32);
    allocator.allocate(32);
    allocator.free(a).unwrap();

    assert!(matches!(
      allocator.try_resize(a, 64),
      Err(AllocError::UnknownPointer { .. })
    ));
  }

  #[test]
  fn test_strategy_switch() {
    let mut allocator = heap();
    assert_eq!(allocator.strategy(), Strategy::FirstFit);

    allocator.set_strategy(Strategy::NextFit);
    assert_eq!(allocator.strategy(), Strategy::NextFit);
  }
}
