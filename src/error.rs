//! Error taxonomy for the allocator.

use thiserror::Error;

/// Every recoverable failure the allocator reports.
///
/// None of these leave the heap in a modified state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// Zero-byte allocation request.
  #[error("cannot allocate zero bytes")]
  ZeroSize,

  /// Zero-element zeroed allocation request.
  #[error("cannot allocate zero elements")]
  ZeroCount,

  /// `count * size` does not fit in a `usize`.
  #[error("allocation of {count} x {size} bytes overflows")]
  SizeOverflow { count: usize, size: usize },

  /// The arena source refused to grow.
  #[error("out of memory while requesting {requested} bytes")]
  OutOfMemory { requested: usize },

  /// `free` on a block that is already free.
  #[error("double free detected at {address:#x}")]
  DoubleFree { address: usize },

  /// Pointer does not match the payload of any block in the chain.
  #[error("pointer {address:#x} was not handed out by this allocator")]
  UnknownPointer { address: usize },
}

pub type Result<T> = std::result::Result<T, AllocError>;
