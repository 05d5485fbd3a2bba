//! The process-wide allocator, exercised in its own test process.
//!
//! Everything runs in one test because the region is shared by the whole
//! process.

use memregion::{AllocatorConfig, SearchMode, global};

#[test]
fn process_wide_allocator() {
  global::configure(AllocatorConfig::new(10_000).with_search(SearchMode::Sequential)).unwrap();
  assert!(global::configure(AllocatorConfig::default()).is_err());

  let stats = global::stats();
  assert!(stats.is_none(), "region reserved before first use");

  let p1 = global::allocate(64).unwrap().as_ptr();
  let p2 = global::allocate(128).unwrap().as_ptr();
  assert!(global::is_valid(p1));
  assert_eq!(global::size_of(p2), Some(128));

  global::free(p1).unwrap();
  assert!(!global::is_valid(p1));
  assert!(global::free(p1).is_err());
  assert_eq!(global::size_of(p1), None);

  let p3 = global::allocate(32).unwrap().as_ptr();
  assert_eq!(p3, p1);

  global::free(p2.wrapping_add(100)).unwrap();
  global::free(p3).unwrap();

  let stats = global::stats().unwrap();
  assert_eq!(stats.block_count, 1);
  assert_eq!(stats.free_block_count, 1);
  assert_eq!(stats.allocated_bytes, 0);

  // Out of memory is a plain `None`.
  assert!(global::allocate(stats.total_free_capacity + 1).is_none());
  let all = global::allocate(stats.total_free_capacity).unwrap().as_ptr();
  assert!(global::allocate(1).is_none());
  global::free(all).unwrap();

  global::log_chain();
  assert_eq!(global::stats().map(|s| s.free_block_count), Some(1));
}
