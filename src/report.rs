//! Human-readable heap dumps and summary counters.

use std::{
  fmt,
  io::{self, Write},
};

use crate::{
  block::{BlockState, HEADER_SIZE, Header},
  heap::Allocator,
  source::ArenaSource,
};

/// Aggregate view of the chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  pub used_bytes: usize,
  pub free_bytes: usize,
  /// Bytes obtained from the arena source.
  pub arena_bytes: usize,
}

impl HeapStats {
  /// Bytes spent on headers.
  pub fn overhead(&self) -> usize {
    self.blocks * HEADER_SIZE
  }
}

impl fmt::Display for HeapStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{} blocks ({} free), {} bytes used, {} bytes free, {} bytes of arena",
      self.blocks, self.free_blocks, self.used_bytes, self.free_bytes, self.arena_bytes
    )
  }
}

impl<S: ArenaSource> Allocator<S> {
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      arena_bytes: self.arena_bytes(),
      ..HeapStats::default()
    };

    for info in self.blocks() {
      stats.blocks += 1;
      match info.state {
        BlockState::Free => {
          stats.free_blocks += 1;
          stats.free_bytes += info.size;
        }
        BlockState::Used => stats.used_bytes += info.size,
      }
    }

    stats
  }

  /// Writes every block's address, payload pointer, size and state, in chain
  /// order.
  pub fn dump_to<W: Write>(
    &self,
    out: &mut W,
  ) -> io::Result<()> {
    writeln!(out, "\n=========Heap Layout============")?;

    for (index, block) in self.chain.iter().enumerate() {
      let (size, state, next) = unsafe { ((*block).size, (*block).state, (*block).next) };

      writeln!(out, "Block {index}:")?;
      writeln!(out, "  Address     : {block:?}")?;
      writeln!(out, "  User ptr    : {:?}", Header::payload(block))?;
      writeln!(out, "  Size        : {size} bytes")?;
      writeln!(out, "  Status      : {state}")?;
      writeln!(out, "  Next (heap) : {next:?}\n")?;
    }

    writeln!(out, "=================================")
  }

  /// [`dump_to`](Self::dump_to) on standard output.
  pub fn dump_state(&self) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = self.dump_to(&mut out);
  }
}
