//! Process-wide allocator.
//!
//! The region behind these functions is reserved on the first call to
//! [`allocate`] and stays mapped until the process exits. Its size comes
//! from [`configure`] if that was called first, otherwise from the
//! `MEMREGION_CAPACITY` / `MEMREGION_SEARCH` environment variables, and
//! otherwise from [`AllocatorConfig::default`].

use std::{process, ptr::NonNull, sync::OnceLock};

use crate::{
  allocator::RegionAllocator,
  chain::AllocatorStats,
  config::AllocatorConfig,
  error::{AllocError, AllocResult},
};

static GLOBAL: OnceLock<RegionAllocator> = OnceLock::new();

fn instance() -> &'static RegionAllocator {
  GLOBAL.get_or_init(|| {
    let config = AllocatorConfig::from_env().unwrap_or_else(|err| {
      log::warn!("ignoring allocator environment: {err}");
      AllocatorConfig::default()
    });
    build(config)
  })
}

fn build(config: AllocatorConfig) -> RegionAllocator {
  RegionAllocator::new(config).unwrap_or_else(|err| fatal(&err))
}

fn fatal(err: &AllocError) -> ! {
  eprintln!("[memregion] {err}");
  process::abort()
}

/// Sets the configuration of the process-wide allocator.
///
/// Fails once the allocator has been used or configured.
pub fn configure(config: AllocatorConfig) -> AllocResult<()> {
  config.validate()?;

  let mut installed = false;
  GLOBAL.get_or_init(|| {
    installed = true;
    build(config)
  });

  if installed {
    Ok(())
  } else {
    Err(AllocError::config("the process-wide allocator is already in use"))
  }
}

/// Allocates `size` bytes from the process-wide region.
///
/// Returns `None` when no free block is large enough. Aborts the process if
/// the region cannot be reserved.
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
  match instance().allocate(size) {
    Ok(ptr) => Some(ptr),
    Err(err @ AllocError::Reserve { .. }) => fatal(&err),
    Err(_) => None,
  }
}

/// Frees the block containing `ptr`.
pub fn free(ptr: *const u8) -> AllocResult<()> {
  instance().free(ptr)
}

/// Payload size of the block containing `ptr`, if it is allocated.
pub fn size_of(ptr: *const u8) -> Option<usize> {
  instance().size_of(ptr).ok()
}

/// Whether `ptr` points into an allocated block.
pub fn is_valid(ptr: *const u8) -> bool {
  instance().is_valid(ptr)
}

pub fn stats() -> Option<AllocatorStats> {
  instance().stats()
}

/// Dumps the process-wide chain at debug level.
pub fn log_chain() {
  instance().log_chain();
}
