//! Allocator errors.

use std::io;

use thiserror::Error;

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors reported by the allocator.
#[derive(Debug, Error)]
pub enum AllocError {
  /// The operating system refused to map the region.
  #[error("failed to reserve a region of {requested} bytes: {source}")]
  Reserve {
    requested: usize,
    #[source]
    source: io::Error,
  },

  /// No free block is large enough for the request.
  #[error("out of memory: no free block can hold {requested} bytes")]
  OutOfMemory { requested: usize },

  /// The address is not inside the payload of an allocated block.
  #[error("address {addr:#x} does not belong to an allocated block")]
  InvalidPointer { addr: usize },

  /// A header reachable through the owner index lost its tag.
  #[error("block header at {addr:#x} is corrupted")]
  Corrupted { addr: usize },

  /// Configuration error.
  #[error("configuration error: {message}")]
  Config { message: String },
}

impl AllocError {
  /// Creates a configuration error.
  pub fn config(message: impl Into<String>) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  pub fn invalid_pointer(ptr: *const u8) -> Self {
    Self::InvalidPointer { addr: ptr as usize }
  }

  /// Returns true if the caller may retry once memory has been freed.
  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, Self::OutOfMemory { .. })
  }
}
