//! Two-ended free-block search.
//!
//! The chain is cut in two at the address halfway between head and tail.
//! One worker walks forward from the head over the lower half, the other
//! walks backward from the tail over the upper half:
//!
//! ```text
//!   head                      midpoint                       tail
//!    │                           │                             │
//!    ▼                           ▼                             ▼
//!   [A]──[F]──[A]──[A]──[F]──────┼──[A]──[F]──[A]──[F]──[A]──[F]
//!    ────────── forward ──────▶  │  ◀────────── backward ──────
//! ```
//!
//! The first worker to land on a free block large enough publishes it
//! under the publish lock and raises the `found` flag, which makes the
//! other worker give up at its next step. Within each half the choice is
//! first-fit; which half wins is up to the scheduler.

use std::{
  panic,
  sync::atomic::{AtomicBool, Ordering},
  thread,
};

use parking_lot::Mutex;

use crate::{block::BlockHeader, chain::Chain, config::SearchMode};

/// A header published by a search worker.
pub(crate) struct Candidate(*mut BlockHeader);

// Only produced and consumed while the chain lock is held.
unsafe impl Send for Candidate {}

/// Lock shared by the workers of a search to publish their result.
pub(crate) type PublishSlot = Mutex<Option<Candidate>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
  Forward,
  Backward,
}

/// Ends and midpoint of the chain, captured before the workers start.
#[derive(Clone, Copy)]
struct Span {
  head: *mut BlockHeader,
  tail: *mut BlockHeader,
  midpoint: usize,
}

// Workers only read headers, and the chain lock keeps writers out until
// they are joined.
unsafe impl Send for Span {}
unsafe impl Sync for Span {}

impl Span {
  fn of(chain: &Chain) -> Self {
    let head = chain.head();
    let tail = chain.tail();
    let (low, high) = (head as usize, tail as usize);

    Self {
      head,
      tail,
      midpoint: low + (high - low) / 2,
    }
  }

  fn start(
    &self,
    direction: Direction,
  ) -> *mut BlockHeader {
    match direction {
      Direction::Forward => self.head,
      Direction::Backward => self.tail,
    }
  }

  fn covers(
    &self,
    direction: Direction,
    block: *mut BlockHeader,
  ) -> bool {
    match direction {
      Direction::Forward => block as usize <= self.midpoint,
      Direction::Backward => block as usize > self.midpoint,
    }
  }
}

/// What a search came back with.
pub(crate) struct SearchOutcome {
  pub block: Option<*mut BlockHeader>,
  /// Largest free payload the workers walked past. Exact when `block` is
  /// `None`, since both halves were then scanned in full.
  pub largest_free: usize,
}

fn fits(
  block: &BlockHeader,
  min_size: usize,
) -> bool {
  block.is_live() && block.is_free() && block.size >= min_size
}

/// Walks one half of the chain. Returns the largest free payload seen.
fn scan(
  span: &Span,
  direction: Direction,
  min_size: usize,
  found: &AtomicBool,
  slot: &PublishSlot,
) -> usize {
  let mut largest = 0;
  let mut cursor = span.start(direction);

  unsafe {
    while !cursor.is_null() && span.covers(direction, cursor) && !found.load(Ordering::Acquire) {
      let block = &*cursor;
      if block.is_free() {
        largest = largest.max(block.size);
        if block.size >= min_size {
          break;
        }
      }
      cursor = match direction {
        Direction::Forward => block.next,
        Direction::Backward => block.prev,
      };
    }

    if cursor.is_null() || !span.covers(direction, cursor) {
      return largest;
    }

    let mut published = slot.lock();
    if published.is_none() && !found.load(Ordering::Acquire) && fits(&*cursor, min_size) {
      *published = Some(Candidate(cursor));
      found.store(true, Ordering::Release);
    }
  }

  largest
}

/// Result of a worker, or of `inline` when the worker never started.
fn settle<T>(
  handle: Option<thread::ScopedJoinHandle<'_, T>>,
  inline: impl FnOnce() -> T,
) -> T {
  match handle {
    Some(handle) => handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)),
    None => inline(),
  }
}

/// Looks for a free block of at least `min_size` payload bytes.
///
/// The caller must hold the chain lock for the whole call.
pub(crate) fn find_free(
  chain: &Chain,
  min_size: usize,
  mode: SearchMode,
  slot: &PublishSlot,
) -> SearchOutcome {
  let span = Span::of(chain);
  let found = AtomicBool::new(false);
  *slot.lock() = None;

  let (forward, backward) = match mode {
    SearchMode::Parallel => thread::scope(|s| {
      let run = |direction| scan(&span, direction, min_size, &found, slot);
      let spawn = move |direction: Direction| {
        thread::Builder::new()
          .spawn_scoped(s, move || run(direction))
          .inspect_err(|err| log::warn!("{direction:?} search runs inline: {err}"))
          .ok()
      };

      let forward = spawn(Direction::Forward);
      let backward = spawn(Direction::Backward);
      (
        settle(forward, || run(Direction::Forward)),
        settle(backward, || run(Direction::Backward)),
      )
    }),
    SearchMode::Sequential => {
      let forward = scan(&span, Direction::Forward, min_size, &found, slot);
      let backward = scan(&span, Direction::Backward, min_size, &found, slot);
      (forward, backward)
    }
  };

  let block = slot.lock().take().map(|candidate| candidate.0);

  SearchOutcome {
    block,
    largest_free: forward.max(backward),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::{Region, page_size};

  /// Allocated blocks of the given sizes, then the free rest of the region.
  fn chain_with(sizes: &[usize]) -> (Chain, Vec<*mut BlockHeader>) {
    let mut chain = Chain::init(Region::reserve(4 * page_size()).unwrap());
    let mut blocks = Vec::new();
    for &size in sizes {
      let tail = chain.tail();
      unsafe { chain.claim(tail, size) };
      blocks.push(tail);
    }
    (chain, blocks)
  }

  #[test]
  fn halves_cover_every_header_once() {
    let (chain, _) = chain_with(&[64; 12]);
    let span = Span::of(&chain);

    for block in chain.iter() {
      let forward = span.covers(Direction::Forward, block);
      let backward = span.covers(Direction::Backward, block);
      assert!(forward ^ backward);
    }
    assert!(span.covers(Direction::Forward, chain.head()));
    assert!(span.covers(Direction::Backward, chain.tail()));
  }

  #[test]
  fn single_block_is_found() {
    let chain = Chain::init(Region::reserve(page_size()).unwrap());
    let slot = PublishSlot::default();

    for mode in [SearchMode::Sequential, SearchMode::Parallel] {
      let outcome = find_free(&chain, 64, mode, &slot);
      assert_eq!(outcome.block, Some(chain.head()));
    }
  }

  #[test]
  fn sequential_prefers_the_lower_half() {
    let (mut chain, blocks) = chain_with(&[64, 64, 64]);
    unsafe { chain.release(blocks[0]).unwrap() };
    let slot = PublishSlot::default();

    let outcome = find_free(&chain, 32, SearchMode::Sequential, &slot);
    assert_eq!(outcome.block, Some(blocks[0]));
  }

  #[test]
  fn parallel_picks_one_of_the_candidates() {
    let (mut chain, blocks) = chain_with(&[64, 64, 64]);
    unsafe { chain.release(blocks[0]).unwrap() };
    let slot = PublishSlot::default();

    for _ in 0..50 {
      let block = find_free(&chain, 32, SearchMode::Parallel, &slot).block.unwrap();
      assert!(block == blocks[0] || block == chain.tail());
    }
  }

  #[test]
  fn skips_blocks_that_are_too_small() {
    let (mut chain, blocks) = chain_with(&[64, 64, 256, 64]);
    unsafe {
      chain.release(blocks[0]).unwrap();
      chain.release(blocks[2]).unwrap();
    }
    let slot = PublishSlot::default();

    let outcome = find_free(&chain, 128, SearchMode::Sequential, &slot);
    assert_eq!(outcome.block, Some(blocks[2]));
  }

  #[test]
  fn miss_reports_exact_largest_free() {
    let mut chain = Chain::init(Region::reserve(page_size()).unwrap());
    let total = chain.state().total_free_capacity;
    let head = chain.head();
    unsafe { chain.claim(head, 256) };
    let tail_size = unsafe { (*chain.tail()).size };
    assert_eq!(tail_size, total - 256 - crate::block::HEADER_SIZE);

    let slot = PublishSlot::default();
    for mode in [SearchMode::Sequential, SearchMode::Parallel] {
      let outcome = find_free(&chain, total, mode, &slot);
      assert!(outcome.block.is_none());
      assert_eq!(outcome.largest_free, tail_size);
    }
  }

  #[test]
  fn worker_that_never_started_runs_inline() {
    thread::scope(|s| {
      let spawned = thread::Builder::new().spawn_scoped(s, || 7).ok();
      assert_eq!(settle(spawned, || 0), 7);
      assert_eq!(settle(None, || 9), 9);
    });
  }

  #[test]
  fn allocated_blocks_are_never_returned() {
    let (chain, _) = chain_with(&[64; 8]);
    let slot = PublishSlot::default();

    let outcome = find_free(&chain, 8, SearchMode::Parallel, &slot);
    let block = outcome.block.unwrap();
    assert_eq!(block, chain.tail());
    assert!(unsafe { (*block).is_free() });
  }
}
