use std::{collections::BTreeMap, fmt, iter, ptr};

use crate::{
  block::{BlockHeader, BlockState, HEADER_SIZE},
  error::{AllocError, AllocResult},
  region::Region,
  state::{ArenaState, STATE_SIZE},
};

/// One entry of the chain as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the header from the start of the region.
  pub offset: usize,
  /// Address of the first payload byte.
  pub payload: usize,
  pub state: BlockState,
  /// Payload bytes.
  pub size: usize,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "+{:<8} {:#014x} {:>9} {:>10} bytes",
      self.offset, self.payload, self.state, self.size
    )
  }
}

/// Snapshot of the allocator bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
  /// Bytes mapped from the operating system.
  pub region_len: usize,
  /// Payload bytes of a fresh region.
  pub total_free_capacity: usize,
  pub free_block_count: usize,
  /// Upper bound on the largest free payload.
  pub largest_free_hint: usize,
  pub block_count: usize,
  /// Payload bytes currently handed out.
  pub allocated_bytes: usize,
}

/// The header chain of a reserved region.
///
/// ```text
///   ┌────────────┬────────┬─────────┬────────┬─────────┬────────┬──────────┐
///   │ ArenaState │ Header │ payload │ Header │ payload │ Header │ payload  │
///   │ head, tail │ ALLOC  │         │ FREE   │         │ ALLOC  │          │
///   └────────────┴────────┴─────────┴────────┴─────────┴────────┴──────────┘
///                    ▲  ──next──▶      ▲  ──next──▶      ▲
///                    └───◀──prev──     └───◀──prev──     │
///                  head                                 tail
/// ```
///
/// Every live header is also registered in an ordered index keyed by its
/// address, which resolves interior pointers to their owning block.
pub(crate) struct Chain {
  region: Region,
  state: *mut ArenaState,
  index: BTreeMap<usize, *mut BlockHeader>,
}

// The chain is only ever touched behind the allocator lock.
unsafe impl Send for Chain {}

impl Chain {
  /// Writes the state record and a single free block spanning the region.
  pub fn init(region: Region) -> Self {
    let base = region.base();
    let total = ArenaState::usable(region.len());

    let mut index = BTreeMap::new();

    let state = unsafe {
      let state = base.cast::<ArenaState>();
      ptr::write(state, ArenaState::new(total));

      let first = BlockHeader::write_at(
        base.add(STATE_SIZE),
        BlockHeader::new(BlockState::Free, total, ptr::null_mut(), ptr::null_mut()),
      );

      (*state).head = first;
      (*state).tail = first;
      index.insert(first as usize, first);

      state
    };

    Self {
      region,
      state,
      index,
    }
  }

  pub fn region(&self) -> &Region {
    &self.region
  }

  pub fn state(&self) -> &ArenaState {
    unsafe { &*self.state }
  }

  pub fn state_mut(&mut self) -> &mut ArenaState {
    unsafe { &mut *self.state }
  }

  pub fn head(&self) -> *mut BlockHeader {
    self.state().head
  }

  pub fn tail(&self) -> *mut BlockHeader {
    self.state().tail
  }

  /// Headers in address order, from head to tail.
  pub fn iter(&self) -> impl Iterator<Item = *mut BlockHeader> + '_ {
    let head = self.head();
    iter::successors((!head.is_null()).then_some(head), |&block| {
      let next = unsafe { (*block).next };
      (!next.is_null()).then_some(next)
    })
  }

  /// Resolves `address` to the allocated block whose payload contains it.
  pub fn owner_of(
    &self,
    address: usize,
  ) -> AllocResult<*mut BlockHeader> {
    let invalid = AllocError::InvalidPointer { addr: address };
    if !self.region.contains(address) {
      return Err(invalid);
    }

    let Some((&key, &block)) = self.index.range(..=address).next_back() else {
      return Err(invalid);
    };

    unsafe {
      if !(*block).is_live() {
        log::warn!("header at {key:#x} lost its tag");
        return Err(AllocError::Corrupted { addr: key });
      }

      if (*block).is_allocated() && BlockHeader::contains(block, address) {
        Ok(block)
      } else {
        Err(invalid)
      }
    }
  }

  /// Hands `size` bytes of the free block `elt` to a caller and returns the
  /// payload address.
  ///
  /// # Safety
  ///
  /// `elt` must be a live free header of this chain, `size` must be
  /// word-aligned and no larger than `elt`'s payload.
  pub unsafe fn claim(
    &mut self,
    elt: *mut BlockHeader,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      debug_assert!((*elt).is_live() && (*elt).is_free() && (*elt).size >= size);

      let remainder = (*elt).size - size;
      let next = (*elt).next;

      if !next.is_null() && (*next).is_free() {
        // The free successor takes over the spare bytes.
        if remainder > 0 {
          self.shift_down(next, remainder);
        }
        (*elt).size = size;
        (*elt).state = BlockState::Allocated;
        self.state_mut().free_block_count -= 1;
      } else if remainder > HEADER_SIZE {
        self.split(elt, size);
        (*elt).state = BlockState::Allocated;
      } else {
        // Too small for another header: the caller gets the slack.
        (*elt).state = BlockState::Allocated;
        self.state_mut().free_block_count -= 1;
      }

      BlockHeader::payload(elt)
    }
  }

  /// Carves a free block out of the tail of `block`'s payload, leaving it
  /// `size` bytes.
  unsafe fn split(
    &mut self,
    block: *mut BlockHeader,
    size: usize,
  ) {
    unsafe {
      let next = (*block).next;
      let spare = (*block).size - size - HEADER_SIZE;

      let carved = BlockHeader::write_at(
        BlockHeader::payload(block).add(size),
        BlockHeader::new(BlockState::Free, spare, block, next),
      );

      if next.is_null() {
        self.state_mut().tail = carved;
      } else {
        (*next).prev = carved;
      }

      (*block).next = carved;
      (*block).size = size;
      self.index.insert(carved as usize, carved);
    }
  }

  /// Rebuilds the free block `block` `by` bytes lower, growing its payload
  /// by the same amount.
  unsafe fn shift_down(
    &mut self,
    block: *mut BlockHeader,
    by: usize,
  ) {
    unsafe {
      let old = ptr::read(block);
      (*block).retire();
      self.index.remove(&(block as usize));

      let moved = BlockHeader::write_at(
        block.cast::<u8>().sub(by),
        BlockHeader::new(BlockState::Free, old.size + by, old.prev, old.next),
      );
      ptr::write_bytes(BlockHeader::payload(moved), 0, by);

      if old.prev.is_null() {
        self.state_mut().head = moved;
      } else {
        (*old.prev).next = moved;
      }
      if old.next.is_null() {
        self.state_mut().tail = moved;
      } else {
        (*old.next).prev = moved;
      }

      self.index.insert(moved as usize, moved);
      self.state_mut().raise_hint((*moved).size);
    }
  }

  /// Removes `block` from the chain and the index and clears its tag. Its
  /// bytes are left for a neighbor to absorb.
  pub(crate) unsafe fn unlink(
    &mut self,
    block: *mut BlockHeader,
  ) {
    unsafe {
      let prev = (*block).prev;
      let next = (*block).next;

      if prev.is_null() {
        self.state_mut().head = next;
      } else {
        (*prev).next = next;
      }
      if next.is_null() {
        self.state_mut().tail = prev;
      } else {
        (*next).prev = prev;
      }

      (*block).retire();
      self.index.remove(&(block as usize));
    }
  }

  pub fn info(
    &self,
    block: *mut BlockHeader,
  ) -> BlockInfo {
    unsafe {
      BlockInfo {
        offset: block as usize - self.region().base() as usize,
        payload: BlockHeader::payload(block) as usize,
        state: (*block).state,
        size: (*block).size,
      }
    }
  }

  pub fn blocks(&self) -> Vec<BlockInfo> {
    self.iter().map(|block| self.info(block)).collect()
  }

  pub fn stats(&self) -> AllocatorStats {
    let state = self.state();
    let (block_count, allocated_bytes) = self.iter().fold((0, 0), |(count, bytes), block| {
      let header = unsafe { &*block };
      let bytes = if header.is_allocated() { bytes + header.size } else { bytes };
      (count + 1, bytes)
    });

    AllocatorStats {
      region_len: self.region().len(),
      total_free_capacity: state.total_free_capacity,
      free_block_count: state.free_block_count,
      largest_free_hint: state.largest_free_hint,
      block_count,
      allocated_bytes,
    }
  }

  /// Checks every structural invariant of the chain.
  #[cfg(test)]
  pub fn verify(&self) -> Result<(), String> {
    let state = self.state();
    let mut prev: *mut BlockHeader = ptr::null_mut();
    let mut accounted = 0;
    let mut free_blocks = 0;
    let mut largest_free = 0;
    let mut count = 0;

    for block in self.iter() {
      let header = unsafe { &*block };
      if !header.is_live() {
        return Err(format!("header at {block:p} lost its tag"));
      }
      if header.prev != prev {
        return Err(format!("header at {block:p} has a broken prev link"));
      }
      if !prev.is_null() {
        if (prev as usize) >= (block as usize) {
          return Err(format!("header at {block:p} is out of address order"));
        }
        if unsafe { BlockHeader::payload_end(prev) } != block.cast::<u8>() {
          return Err(format!("gap or overlap before {block:p}"));
        }
        if header.is_free() && unsafe { (*prev).is_free() } {
          return Err(format!("adjacent free blocks at {prev:p} and {block:p}"));
        }
        accounted += HEADER_SIZE;
      }
      if !self.index.contains_key(&(block as usize)) {
        return Err(format!("header at {block:p} missing from the index"));
      }
      if header.is_free() {
        free_blocks += 1;
        largest_free = largest_free.max(header.size);
      }
      accounted += header.size;
      count += 1;
      prev = block;
    }

    if prev != state.tail {
      return Err("tail does not match the last header".into());
    }
    if !prev.is_null() && unsafe { BlockHeader::payload_end(prev) } as usize != self.region.end() {
      return Err("last block does not reach the end of the region".into());
    }
    if count != self.index.len() {
      return Err(format!("index holds {} entries for {count} headers", self.index.len()));
    }
    if accounted != state.total_free_capacity {
      return Err(format!(
        "blocks account for {accounted} bytes, expected {}",
        state.total_free_capacity
      ));
    }
    if free_blocks != state.free_block_count {
      return Err(format!(
        "{free_blocks} free blocks but the counter says {}",
        state.free_block_count
      ));
    }
    if largest_free > state.largest_free_hint {
      return Err(format!(
        "free block of {largest_free} bytes above the hint {}",
        state.largest_free_hint
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::page_size;

  fn chain() -> Chain {
    Chain::init(Region::reserve(page_size()).unwrap())
  }

  #[test]
  fn init_spans_whole_region() {
    let chain = chain();
    let blocks = chain.blocks();

    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].offset, STATE_SIZE);
    assert_eq!(blocks[0].state, BlockState::Free);
    assert_eq!(blocks[0].size, page_size() - STATE_SIZE - HEADER_SIZE);
    assert_eq!(chain.head(), chain.tail());
    chain.verify().unwrap();
  }

  #[test]
  fn claim_splits_the_tail() {
    let mut chain = chain();
    let first = chain.head();

    let payload = unsafe { chain.claim(first, 64) };
    assert_eq!(payload, BlockHeader::payload(first));

    let blocks = chain.blocks();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].state, BlockState::Allocated);
    assert_eq!(blocks[0].size, 64);
    assert_eq!(blocks[1].state, BlockState::Free);
    assert_eq!(blocks[1].offset, STATE_SIZE + HEADER_SIZE + 64);
    assert_eq!(chain.state().free_block_count, 1);
    chain.verify().unwrap();
  }

  #[test]
  fn claim_keeps_slack_when_no_room_for_header() {
    let mut chain = chain();
    let total = chain.state().total_free_capacity;
    let first = chain.head();

    unsafe { chain.claim(first, total - HEADER_SIZE) };

    let blocks = chain.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].state, BlockState::Allocated);
    assert_eq!(blocks[0].size, total);
    assert_eq!(chain.state().free_block_count, 0);
    chain.verify().unwrap();
  }

  #[test]
  fn claim_splits_between_allocated_blocks() {
    let mut chain = chain();
    unsafe {
      chain.claim(chain.head(), 256);
      let tail = chain.tail();
      chain.claim(tail, 64);

      // Free the first block by hand, then carve it again.
      let first = chain.head();
      (*first).state = BlockState::Free;
      chain.state_mut().free_block_count += 1;
      chain.verify().unwrap();

      chain.claim(first, 64);
    }

    let blocks = chain.blocks();
    assert_eq!(blocks.len(), 4);
    assert_eq!(blocks[0].size, 64);
    assert_eq!(blocks[1].state, BlockState::Free);
    assert_eq!(blocks[1].size, 256 - 64 - HEADER_SIZE);
    assert_eq!(blocks[2].state, BlockState::Allocated);
    chain.verify().unwrap();
  }

  #[test]
  fn claim_hands_spare_bytes_to_free_successor() {
    let mut chain = chain();
    unsafe {
      let first = chain.head();
      // Split into two free neighbors by hand.
      chain.split(first, 128);
      chain.state_mut().free_block_count += 1;
      let second_size = (*chain.tail()).size;

      chain.claim(first, 32);

      let blocks = chain.blocks();
      assert_eq!(blocks.len(), 2);
      assert_eq!(blocks[0].state, BlockState::Allocated);
      assert_eq!(blocks[0].size, 32);
      assert_eq!(blocks[1].state, BlockState::Free);
      assert_eq!(blocks[1].offset, STATE_SIZE + HEADER_SIZE + 32);
      assert_eq!(blocks[1].size, second_size + 96);
      assert_eq!(chain.state().free_block_count, 1);
    }
    chain.verify().unwrap();
  }

  #[test]
  fn owner_of_resolves_interior_pointers() {
    let mut chain = chain();
    let payload = unsafe { chain.claim(chain.head(), 64) } as usize;

    assert_eq!(chain.owner_of(payload).unwrap(), chain.head());
    assert_eq!(chain.owner_of(payload + 63).unwrap(), chain.head());

    // The trailing free block does not own anything.
    assert!(chain.owner_of(payload + 64 + HEADER_SIZE).is_err());
    // Header bytes are not payload.
    assert!(chain.owner_of(payload - 1).is_err());
    assert!(chain.owner_of(chain.region().base() as usize).is_err());
    assert!(chain.owner_of(0).is_err());
    assert!(chain.owner_of(chain.region().end()).is_err());
    assert!(chain.owner_of(usize::MAX).is_err());
  }

  #[test]
  fn owner_of_reports_lost_tag() {
    let mut chain = chain();
    let payload = unsafe { chain.claim(chain.head(), 64) } as usize;

    unsafe { (*chain.head()).tag = 0 };
    assert!(matches!(chain.owner_of(payload), Err(AllocError::Corrupted { .. })));
  }

  #[test]
  fn stats_count_allocated_bytes() {
    let mut chain = chain();
    unsafe {
      chain.claim(chain.head(), 64);
      let tail = chain.tail();
      chain.claim(tail, 32);
    }

    let stats = chain.stats();
    assert_eq!(stats.region_len, page_size());
    assert_eq!(stats.block_count, 3);
    assert_eq!(stats.allocated_bytes, 96);
    assert_eq!(stats.free_block_count, 1);
  }
}
