//! # memregion - A Fixed-Region Heap Allocator
//!
//! This crate provides a **first-fit, coalescing** heap allocator over a
//! single memory region mapped once from the operating system with
//! `mmap(2)`.
//!
//! ## Overview
//!
//! The region is reserved lazily, on the first allocation, and carved into
//! variable-size blocks. Every block starts with a header, and the headers
//! form a doubly linked list in address order:
//!
//! ```text
//!   Region Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              REGION                                  │
//!   │                                                                      │
//!   │  ┌───────┬─────┬────────┬─────┬────────┬─────┬──────────────────────┐│
//!   │  │ State │ Hdr │  A1    │ Hdr │  free  │ Hdr │        free          ││
//!   │  └───────┴─────┴────────┴─────┴────────┴─────┴──────────────────────┘│
//!   │      │      ▲              ▲              ▲                          │
//!   │      │      └── head       │              └── tail                   │
//!   │      └── counters, head/tail pointers                                │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   memregion
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── allocator  - RegionAllocator: lock, lazy init, public operations
//!   ├── block      - Block header layout (internal)
//!   ├── chain      - Header chain, owner index, block splitting (internal)
//!   ├── coalesce   - Freeing and merging of neighbors (internal)
//!   ├── config     - AllocatorConfig and SearchMode
//!   ├── error      - AllocError
//!   ├── global     - Process-wide allocator
//!   ├── region     - mmap-backed region reservation
//!   ├── search     - Two-ended concurrent free-block search (internal)
//!   └── state      - Region bookkeeping record (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use memregion::RegionAllocator;
//!
//! let allocator = RegionAllocator::with_capacity(10_000).unwrap();
//!
//! let ptr = allocator.allocate(64).unwrap().as_ptr();
//! unsafe { ptr.cast::<u64>().write(42) };
//!
//! assert!(allocator.is_valid(ptr));
//! assert!(allocator.size_of(ptr).unwrap() >= 64);
//!
//! // Any address inside the block frees it.
//! allocator.free(ptr.wrapping_add(10)).unwrap();
//! assert!(!allocator.is_valid(ptr));
//! ```
//!
//! ## How It Works
//!
//! Allocation searches the chain for a free block large enough. Two
//! workers scan at once, one from the head and one from the tail, each
//! over its half of the chain. The winning block is then either split or
//! handed out whole:
//!
//! ```text
//!   Split (spare bytes can hold a header):
//!
//!   ┌─────┬──────────────────────────────┐      ┌─────┬────────┬─────┬──────────┐
//!   │ Hdr │           FREE               │ ──▶  │ Hdr │ ALLOC  │ Hdr │   FREE   │
//!   └─────┴──────────────────────────────┘      └─────┴────────┴─────┴──────────┘
//!
//!   Whole (spare bytes too small): the caller keeps the slack.
//! ```
//!
//! Freeing marks the block free and immediately merges it with free
//! neighbors, so the chain never holds two adjacent free blocks:
//!
//! ```text
//!   ┌─────┬──────┬─────┬───────┬─────┬──────┐      ┌─────┬────────────────────────────┐
//!   │ Hdr │ FREE │ Hdr │ freed │ Hdr │ FREE │ ──▶  │ Hdr │           FREE             │
//!   └─────┴──────┴─────┴───────┴─────┴──────┘      └─────┴────────────────────────────┘
//! ```
//!
//! Freed payloads are zeroed.
//!
//! ## Limitations
//!
//! - **Fixed capacity**: the region never grows after it is reserved
//! - **Word alignment only**: payloads are aligned to the machine word
//! - **No resize**: blocks cannot grow or shrink in place
//! - **Unix-only**: requires `libc` and `mmap` (POSIX systems)
//!
//! ## Safety
//!
//! The operations themselves are safe to call with any address: addresses
//! are resolved through an index of live headers and never dereferenced
//! blindly. Reading or writing through a returned pointer is up to the
//! caller, as with any raw allocation.

pub mod align;
mod allocator;
mod block;
mod chain;
mod coalesce;
pub mod config;
pub mod error;
pub mod global;
pub mod region;
mod search;
mod state;

pub use allocator::RegionAllocator;
pub use block::BlockState;
pub use chain::{AllocatorStats, BlockInfo};
pub use config::{AllocatorConfig, SearchMode};
pub use error::{AllocError, AllocResult};
