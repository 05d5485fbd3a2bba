use std::{mem, ptr};

use crate::block::{BlockHeader, HEADER_SIZE};

/// Bytes reserved at the start of the region for [`ArenaState`].
pub(crate) const STATE_SIZE: usize = mem::size_of::<ArenaState>();

const _: () = assert!(STATE_SIZE % mem::size_of::<usize>() == 0);

/// Bookkeeping record living at the start of the region, right before the
/// first header.
#[repr(C)]
pub(crate) struct ArenaState {
  /// Payload bytes of a fresh region. Never changes after init.
  pub total_free_capacity: usize,
  /// Blocks currently marked free.
  pub free_block_count: usize,
  /// Upper bound on the largest free payload.
  pub largest_free_hint: usize,
  pub head: *mut BlockHeader,
  pub tail: *mut BlockHeader,
}

impl ArenaState {
  /// Payload bytes available in a fresh region of `region_len` bytes.
  pub fn usable(region_len: usize) -> usize {
    region_len.saturating_sub(STATE_SIZE + HEADER_SIZE)
  }

  pub fn new(total_free_capacity: usize) -> Self {
    Self {
      total_free_capacity,
      free_block_count: 1,
      largest_free_hint: total_free_capacity,
      head: ptr::null_mut(),
      tail: ptr::null_mut(),
    }
  }

  pub fn raise_hint(
    &mut self,
    size: usize,
  ) {
    if size > self.largest_free_hint {
      self.largest_free_hint = size;
    }
  }
}
