use std::{fmt, mem, ptr};

/// Bit pattern stamped into every live header.
///
/// Absorbed headers get their tag zeroed, so a stale pointer to one never
/// passes for a live block.
pub(crate) const TAG: u64 = 0x6d65_6d72_6567_696f;

/// Bytes taken by a header in front of every payload.
pub(crate) const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % mem::size_of::<usize>() == 0);

/// Whether a block is available to the search or owned by a caller.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  Free,
  Allocated,
}

impl fmt::Display for BlockState {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      BlockState::Free => f.pad("FREE"),
      BlockState::Allocated => f.pad("ALLOCATED"),
    }
  }
}

/// Metadata embedded at the start of every block of the region.
#[repr(C)]
pub(crate) struct BlockHeader {
  pub tag: u64,
  pub state: BlockState,
  pub size: usize,
  pub next: *mut BlockHeader,
  pub prev: *mut BlockHeader,
}

impl BlockHeader {
  pub fn new(
    state: BlockState,
    size: usize,
    prev: *mut BlockHeader,
    next: *mut BlockHeader,
  ) -> Self {
    Self {
      tag: TAG,
      state,
      size,
      next,
      prev,
    }
  }

  /// Writes a fresh header at `address` and returns it.
  ///
  /// # Safety
  ///
  /// `address` must be word-aligned and have `HEADER_SIZE` writable bytes
  /// inside the region.
  pub unsafe fn write_at(
    address: *mut u8,
    header: BlockHeader,
  ) -> *mut BlockHeader {
    let block = address.cast::<BlockHeader>();
    unsafe { ptr::write(block, header) };
    block
  }

  pub fn is_live(&self) -> bool {
    self.tag == TAG
  }

  pub fn is_free(&self) -> bool {
    self.state == BlockState::Free
  }

  pub fn is_allocated(&self) -> bool {
    self.state == BlockState::Allocated
  }

  /// Clears the tag of a header that is being absorbed by a neighbor.
  pub fn retire(&mut self) {
    self.tag = 0;
  }

  /// First payload byte of the block starting at `block`.
  pub fn payload(block: *mut BlockHeader) -> *mut u8 {
    block.cast::<u8>().wrapping_add(HEADER_SIZE)
  }

  /// One past the last payload byte of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header.
  pub unsafe fn payload_end(block: *mut BlockHeader) -> *mut u8 {
    unsafe { Self::payload(block).add((*block).size) }
  }

  /// Whether `address` falls inside the payload of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header.
  pub unsafe fn contains(
    block: *mut BlockHeader,
    address: usize,
  ) -> bool {
    let start = Self::payload(block) as usize;
    let end = unsafe { Self::payload_end(block) } as usize;
    start <= address && address < end
  }
}
