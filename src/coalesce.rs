//! Returning blocks to the chain.
//!
//! A freed block is merged with every free neighbor right away, so two
//! free blocks never sit next to each other once a free completes:
//!
//! ```text
//!   prev   self   next          result
//!   ─────  ─────  ─────         ───────────────────────────────
//!     -    ALLOC    -     ──▶   self FREE                  (+1)
//!   FREE   ALLOC  FREE    ──▶   prev absorbs self + next   (-1)
//!   FREE   ALLOC  ALLOC   ──▶   prev absorbs self          ( 0)
//!   ALLOC  ALLOC  FREE    ──▶   self absorbs next          ( 0)
//!   ALLOC  ALLOC  ALLOC   ──▶   self FREE                  (+1)
//! ```
//!
//! The number on the right is the change of the free-block count. The
//! surviving block's payload is zeroed.

use std::ptr;

use crate::{
  block::{BlockHeader, BlockState, HEADER_SIZE},
  chain::Chain,
  error::{AllocError, AllocResult},
};

impl Chain {
  /// Marks `block` free and merges it with its free neighbors.
  ///
  /// # Safety
  ///
  /// `block` must be a header of this chain.
  pub unsafe fn release(
    &mut self,
    block: *mut BlockHeader,
  ) -> AllocResult<()> {
    unsafe {
      if !(*block).is_live() || !(*block).is_allocated() {
        return Err(AllocError::invalid_pointer(BlockHeader::payload(block)));
      }

      let prev = (*block).prev;
      let next = (*block).next;
      let prev_free = !prev.is_null() && (*prev).is_free();
      let next_free = !next.is_null() && (*next).is_free();

      let survivor = if prev.is_null() && next.is_null() {
        (*block).state = BlockState::Free;
        self.state_mut().free_block_count += 1;
        block
      } else if prev_free && next_free {
        (*prev).size += (*block).size + (*next).size + 2 * HEADER_SIZE;
        self.unlink(block);
        self.unlink(next);
        self.state_mut().free_block_count -= 1;
        prev
      } else if prev_free {
        (*prev).size += (*block).size + HEADER_SIZE;
        self.unlink(block);
        prev
      } else if next_free {
        (*block).size += (*next).size + HEADER_SIZE;
        (*block).state = BlockState::Free;
        self.unlink(next);
        block
      } else {
        (*block).state = BlockState::Free;
        self.state_mut().free_block_count += 1;
        block
      };

      ptr::write_bytes(BlockHeader::payload(survivor), 0, (*survivor).size);
      self.state_mut().raise_hint((*survivor).size);

      Ok(())
    }
  }
}
