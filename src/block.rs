use std::{fmt, mem, ptr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  Free,
  Used,
}

impl fmt::Display for BlockState {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      BlockState::Free => f.write_str("FREE"),
      BlockState::Used => f.write_str("USED"),
    }
  }
}

/// Metadata placed immediately before every payload.
///
/// `next` orders the whole chain by arena position and is only ever spliced.
/// `next_free` is meaningful only while the block sits in a bin.
#[repr(C, align(16))]
pub struct Header {
  pub size: usize,
  pub state: BlockState,
  pub next: *mut Header,
  pub next_free: *mut Header,
}

pub const HEADER_SIZE: usize = mem::size_of::<Header>();

impl Header {
  /// Writes a fresh header at `at` and returns it.
  ///
  /// # Safety
  ///
  /// `at` must be 16-aligned and valid for `HEADER_SIZE + size` bytes.
  pub unsafe fn write(
    at: *mut u8,
    size: usize,
    state: BlockState,
    next: *mut Header,
  ) -> *mut Header {
    let header = at as *mut Header;
    unsafe {
      header.write(Header {
        size,
        state,
        next,
        next_free: ptr::null_mut(),
      });
    }
    header
  }

  pub fn is_free(&self) -> bool {
    self.state == BlockState::Free
  }

  /// Address of the first payload byte.
  pub fn payload(header: *mut Header) -> *mut u8 {
    (header as *mut u8).wrapping_add(HEADER_SIZE)
  }

  /// Address one past the last payload byte.
  ///
  /// # Safety
  ///
  /// `header` must point to a live header.
  pub unsafe fn end(header: *mut Header) -> *mut u8 {
    Self::payload(header).wrapping_add(unsafe { (*header).size })
  }

  /// Recovers the header sitting right before a payload pointer.
  pub fn from_payload(payload: *mut u8) -> *mut Header {
    payload.wrapping_sub(HEADER_SIZE) as *mut Header
  }
}

/// Read-only snapshot of one block, as handed to reports and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub address: usize,
  pub payload: usize,
  pub size: usize,
  pub state: BlockState,
}

impl BlockInfo {
  /// # Safety
  ///
  /// `header` must point to a live header.
  pub(crate) unsafe fn of(header: *mut Header) -> Self {
    unsafe {
      Self {
        address: header as usize,
        payload: Header::payload(header) as usize,
        size: (*header).size,
        state: (*header).state,
      }
    }
  }

  pub fn is_free(&self) -> bool {
    self.state == BlockState::Free
  }

  /// One past the last payload byte.
  pub fn end(&self) -> usize {
    self.payload + self.size
  }
}
