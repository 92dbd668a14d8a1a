//! # segalloc - A Segregated-Fit Memory Allocator
//!
//! This crate provides a general-purpose **free-list allocator** that manages
//! its own arena of raw memory, carved from the process address space with
//! `sbrk(2)` (or from the platform allocator on hosts without a program
//! break).
//!
//! ## Overview
//!
//! Every block carries a header and lives in one chain, in arena order. Free
//! blocks are additionally indexed by size class:
//!
//! ```text
//!   Block chain (ownership order):
//!
//!   ┌────┬──────┐   ┌────┬────────────┐   ┌────┬────┐   ┌────┬──────────┐
//!   │ H  │ USED │──►│ H  │    FREE    │──►│ H  │USED│──►│ H  │   FREE   │
//!   └────┴──────┘   └────┴────────────┘   └────┴────┘   └────┴──────────┘
//!                          ▲                                   ▲
//!   Bins (size classes):   │                                   │
//!                          │                                   │
//!   ≤64 ≤128 ≤256 ≤512 ───┘                      ≤1024  >1024 ─┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - 16-byte alignment helpers (align!)
//!   ├── block      - Block header and snapshots (internal)
//!   ├── bins       - Size-class free-list index (internal)
//!   ├── chain      - Block chain, split and coalesce (internal)
//!   ├── strategy   - First/best/worst/next-fit search policies
//!   ├── source     - Arena growth providers (Sbrk, System, Region)
//!   ├── heap       - Allocator: allocate, zeroed_allocate, free, resize
//!   ├── report     - Heap dumps and statistics
//!   └── error      - AllocError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Allocator, Strategy, System};
//!
//! let mut allocator = Allocator::with_strategy(System::new(), Strategy::BestFit);
//!
//! let ptr = allocator.allocate(100) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//! }
//!
//! let ptr = allocator.resize(ptr as *mut u8, 400);
//! allocator.free(ptr).unwrap();
//! ```
//!
//! ## How It Works
//!
//! A request is rounded up to 16 bytes, then served by the first of:
//!
//! ```text
//!   allocate(n)
//!       │
//!       ├── 1. bin index     tightest free block in the lowest fitting class
//!       ├── 2. fit strategy  scan of the whole chain (first/best/worst/next)
//!       └── 3. arena growth  a brand new block appended at the tail
//! ```
//!
//! An oversized block is split and the tail becomes a new free block:
//!
//! ```text
//!   ┌────────┬───────────────────────────────────────┐
//!   │ header │              FREE, 512                │
//!   └────────┴───────────────────────────────────────┘
//!                        allocate(64)
//!   ┌────────┬──────────┬────────┬───────────────────┐
//!   │ header │ USED, 64 │ header │     FREE, 416     │
//!   └────────┴──────────┴────────┴───────────────────┘
//! ```
//!
//! Freeing marks the block free, merges every run of address-adjacent free
//! blocks, and rebuilds the bin index from the chain.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Grow-only arena**: Memory is never handed back to the OS
//! - **No compaction**: Only adjacent free blocks are merged

pub mod align;
mod bins;
mod block;
mod chain;
pub mod error;
mod heap;
mod report;
pub mod source;
mod strategy;

pub use block::{BlockInfo, BlockState, HEADER_SIZE};
pub use error::{AllocError, Result};
pub use heap::Allocator;
pub use report::HeapStats;
#[cfg(unix)]
pub use source::Sbrk;
pub use source::{ArenaSource, DefaultSource, Region, System};
pub use strategy::{ParseStrategyError, STRATEGY_ENV, Strategy};

/// Installs a `tracing` subscriber printing to stderr, filtered by
/// `RUST_LOG` (default `info`).
pub fn init_logging() {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .try_init();
}
