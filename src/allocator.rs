use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::{
  align,
  block::BlockHeader,
  chain::{AllocatorStats, BlockInfo, Chain},
  config::AllocatorConfig,
  error::{AllocError, AllocResult},
  region::Region,
  search::{self, PublishSlot},
};

/// Allocator over a single region reserved on first use.
///
/// All operations serialize on one lock owned by the allocator, held from
/// the start of the free-block search to the last link update. Several
/// independent allocators can live side by side; each unmaps its region
/// when dropped.
pub struct RegionAllocator {
  config: AllocatorConfig,
  chain: Mutex<Option<Chain>>,
  slot: PublishSlot,
}

impl RegionAllocator {
  /// Creates an allocator. No memory is reserved until the first
  /// allocation.
  pub fn new(config: AllocatorConfig) -> AllocResult<Self> {
    config.validate()?;

    Ok(Self {
      config,
      chain: Mutex::new(None),
      slot: PublishSlot::default(),
    })
  }

  pub fn with_capacity(capacity: usize) -> AllocResult<Self> {
    Self::new(AllocatorConfig::new(capacity))
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn is_initialized(&self) -> bool {
    self.chain.lock().is_some()
  }

  /// Reserves the region now instead of on the first allocation.
  pub fn ensure_initialized(&self) -> AllocResult<()> {
    let mut guard = self.chain.lock();
    self.chain_or_init(&mut guard).map(|_| ())
  }

  fn chain_or_init<'a>(
    &self,
    cell: &'a mut Option<Chain>,
  ) -> AllocResult<&'a mut Chain> {
    let chain = match cell.take() {
      Some(chain) => chain,
      None => {
        let capacity = self.config.capacity;
        let region = Region::reserve(capacity).map_err(|source| AllocError::Reserve {
          requested: capacity,
          source,
        })?;
        let chain = Chain::init(region);
        log::debug!(
          "region ready: {} usable bytes, {} search",
          chain.state().total_free_capacity,
          self.config.search
        );
        chain
      }
    };
    Ok(cell.insert(chain))
  }

  /// Hands out a block of at least `size` bytes.
  ///
  /// Sizes are rounded up to the machine word; a zero-byte request gets one
  /// word. The returned memory is zeroed.
  pub fn allocate(
    &self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    let mut guard = self.chain.lock();
    let chain = self.chain_or_init(&mut guard)?;
    let out_of_memory = AllocError::OutOfMemory { requested: size };

    let state = chain.state();
    if size > state.total_free_capacity {
      return Err(out_of_memory);
    }

    let aligned = align!(size.max(1));
    if state.free_block_count == 0 || state.largest_free_hint < aligned {
      log::trace!("allocate({size}) rejected up front");
      return Err(out_of_memory);
    }

    let outcome = search::find_free(chain, aligned, self.config.search, &self.slot);
    let Some(block) = outcome.block else {
      chain.state_mut().largest_free_hint = outcome.largest_free;
      log::trace!(
        "allocate({size}) found no block, largest free is {}",
        outcome.largest_free
      );
      return Err(out_of_memory);
    };

    let payload = unsafe { chain.claim(block, aligned) };
    log::trace!("allocate({size}) -> {payload:p}");

    NonNull::new(payload).ok_or(out_of_memory)
  }

  /// Frees the allocated block containing `ptr`, which may point anywhere
  /// inside its payload.
  pub fn free(
    &self,
    ptr: *const u8,
  ) -> AllocResult<()> {
    let mut guard = self.chain.lock();
    let chain = guard.as_mut().ok_or_else(|| AllocError::invalid_pointer(ptr))?;

    let block = chain.owner_of(ptr as usize).inspect_err(|err| {
      log::trace!("free({ptr:p}) rejected: {err}");
    })?;
    unsafe { chain.release(block) }?;

    log::trace!("free({ptr:p}) released {:p}", BlockHeader::payload(block));
    Ok(())
  }

  /// Payload size of the allocated block containing `ptr`.
  pub fn size_of(
    &self,
    ptr: *const u8,
  ) -> AllocResult<usize> {
    let guard = self.chain.lock();
    let chain = guard.as_ref().ok_or_else(|| AllocError::invalid_pointer(ptr))?;

    let block = chain.owner_of(ptr as usize)?;
    Ok(unsafe { (*block).size })
  }

  /// Whether `ptr` points into a currently allocated block.
  pub fn is_valid(
    &self,
    ptr: *const u8,
  ) -> bool {
    self.size_of(ptr).is_ok()
  }

  /// Bookkeeping snapshot, or `None` before the region is reserved.
  pub fn stats(&self) -> Option<AllocatorStats> {
    self.chain.lock().as_ref().map(Chain::stats)
  }

  /// Every block of the chain in address order.
  pub fn blocks(&self) -> Vec<BlockInfo> {
    self.chain.lock().as_ref().map(Chain::blocks).unwrap_or_default()
  }

  /// Dumps the chain at debug level.
  pub fn log_chain(&self) {
    let guard = self.chain.lock();
    let Some(chain) = guard.as_ref() else {
      log::debug!("region not reserved yet");
      return;
    };

    let stats = chain.stats();
    log::debug!(
      "chain: {} blocks, {} free, hint {}, {} of {} bytes allocated",
      stats.block_count,
      stats.free_block_count,
      stats.largest_free_hint,
      stats.allocated_bytes,
      stats.total_free_capacity
    );
    for block in chain.iter() {
      log::debug!("  {}", chain.info(block));
    }
  }

  #[cfg(test)]
  fn verify(&self) {
    if let Some(chain) = self.chain.lock().as_ref() {
      if let Err(problem) = chain.verify() {
        panic!("chain invariant broken: {problem}");
      }
    }
  }
}
