//! Fit strategies used when the bin index cannot answer a request.
//!
//! ```text
//!   free blocks:   [ 64 ]  [ 512 ]  [ 96 ]  [ 2048 ]       request: 80
//!
//!   first-fit  ─────────────►  512     first block that fits
//!   best-fit   ──────────────────────►  96   smallest that fits
//!   worst-fit  ────────────────────────────────► 2048  largest that fits
//!   next-fit   resumes after the previous hit, wrapping around to the head
//! ```

use std::{env, fmt, ptr, str::FromStr};

use thiserror::Error;
use tracing::trace;

use crate::{block::Header, chain::Chain};

/// Environment variable read by [`Strategy::from_env`].
pub const STRATEGY_ENV: &str = "SEGALLOC_STRATEGY";

/// Which fit policy the allocator searches the chain with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
  #[default]
  FirstFit,
  BestFit,
  WorstFit,
  NextFit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fit strategy `{0}` (expected first, best, worst or next)")]
pub struct ParseStrategyError(String);

impl Strategy {
  pub const ALL: [Strategy; 4] = [
    Strategy::FirstFit,
    Strategy::BestFit,
    Strategy::WorstFit,
    Strategy::NextFit,
  ];

  /// Reads [`STRATEGY_ENV`], falling back to the default when it is unset or
  /// unparsable.
  pub fn from_env() -> Self {
    env::var(STRATEGY_ENV)
      .ok()
      .and_then(|value| value.parse().ok())
      .unwrap_or_default()
  }

  pub(crate) fn into_policy(self) -> Box<dyn SearchPolicy> {
    match self {
      Strategy::FirstFit => Box::new(FirstFit),
      Strategy::BestFit => Box::new(BestFit),
      Strategy::WorstFit => Box::new(WorstFit),
      Strategy::NextFit => Box::new(NextFit::new()),
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let name = match self {
      Strategy::FirstFit => "first-fit",
      Strategy::BestFit => "best-fit",
      Strategy::WorstFit => "worst-fit",
      Strategy::NextFit => "next-fit",
    };
    f.write_str(name)
  }
}

impl FromStr for Strategy {
  type Err = ParseStrategyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
    let name = normalized.strip_suffix("-fit").unwrap_or(&normalized);

    match name {
      "first" => Ok(Strategy::FirstFit),
      "best" => Ok(Strategy::BestFit),
      "worst" => Ok(Strategy::WorstFit),
      "next" => Ok(Strategy::NextFit),
      _ => Err(ParseStrategyError(s.to_string())),
    }
  }
}

/// A policy picking a free block of at least `size` bytes from the chain.
///
/// `find` never changes any block; the caller claims what it returns.
pub(crate) trait SearchPolicy {
  fn kind(&self) -> Strategy;

  /// # Safety
  ///
  /// Every header reachable from `chain` must be live.
  unsafe fn find(
    &mut self,
    chain: &Chain,
    size: usize,
  ) -> *mut Header;

  /// Whether the bin index may answer for this policy before a chain scan.
  fn uses_bins(&self) -> bool {
    true
  }

  /// Called when coalescing folds `absorbed` into `survivor`.
  fn on_merge(
    &mut self,
    _absorbed: *mut Header,
    _survivor: *mut Header,
  ) {
  }
}

unsafe fn fits(
  block: *mut Header,
  size: usize,
) -> bool {
  unsafe { (*block).is_free() && (*block).size >= size }
}

pub(crate) struct FirstFit;

impl SearchPolicy for FirstFit {
  fn kind(&self) -> Strategy {
    Strategy::FirstFit
  }

  unsafe fn find(
    &mut self,
    chain: &Chain,
    size: usize,
  ) -> *mut Header {
    chain
      .iter()
      .find(|&block| unsafe { fits(block, size) })
      .unwrap_or(ptr::null_mut())
  }
}

pub(crate) struct BestFit;

impl SearchPolicy for BestFit {
  fn kind(&self) -> Strategy {
    Strategy::BestFit
  }

  unsafe fn find(
    &mut self,
    chain: &Chain,
    size: usize,
  ) -> *mut Header {
    let mut best: *mut Header = ptr::null_mut();

    for block in chain.iter() {
      unsafe {
        if fits(block, size) && (best.is_null() || (*block).size < (*best).size) {
          best = block;
        }
      }
    }

    best
  }
}

/// Picks the largest fitting block. Skips the bin index, whose classes are
/// searched smallest first.
pub(crate) struct WorstFit;

impl SearchPolicy for WorstFit {
  fn kind(&self) -> Strategy {
    Strategy::WorstFit
  }

  unsafe fn find(
    &mut self,
    chain: &Chain,
    size: usize,
  ) -> *mut Header {
    let mut worst: *mut Header = ptr::null_mut();

    for block in chain.iter() {
      unsafe {
        if fits(block, size) && (worst.is_null() || (*block).size > (*worst).size) {
          worst = block;
        }
      }
    }

    worst
  }

  fn uses_bins(&self) -> bool {
    false
  }
}

/// First-fit that resumes from the previous hit.
pub(crate) struct NextFit {
  cursor: *mut Header,
}

impl NextFit {
  pub(crate) fn new() -> Self {
    Self {
      cursor: ptr::null_mut(),
    }
  }
}

impl SearchPolicy for NextFit {
  fn kind(&self) -> Strategy {
    Strategy::NextFit
  }

  unsafe fn find(
    &mut self,
    chain: &Chain,
    size: usize,
  ) -> *mut Header {
    let head = chain.head();
    if head.is_null() {
      return ptr::null_mut();
    }

    if self.cursor.is_null() {
      self.cursor = head;
    }

    let start = self.cursor;
    let mut current = start;

    unsafe {
      loop {
        if fits(current, size) {
          trace!(block = ?current, size, "next-fit hit");
          self.cursor = current;
          return current;
        }

        current = if (*current).next.is_null() {
          head
        } else {
          (*current).next
        };

        if current == start {
          return ptr::null_mut();
        }
      }
    }
  }

  fn uses_bins(&self) -> bool {
    false
  }

  fn on_merge(
    &mut self,
    absorbed: *mut Header,
    survivor: *mut Header,
  ) {
    if self.cursor == absorbed {
      self.cursor = survivor;
    }
  }
}
