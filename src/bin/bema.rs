//! Benchmark driver for the process-wide region allocator.
//!
//! Allocates a batch of blocks, frees them again and reports how long it
//! took.
//!
//! # Usage
//!
//! ```bash
//! # Run the 12 combinations with 100 blocks each
//! bema 100
//!
//! # A single combination: small uniform blocks, free by halves, interior pointers
//! bema 100 --alloc uniform --order halves --free interior
//! ```

use std::{
  mem::MaybeUninit,
  time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};

use memregion::{AllocatorConfig, SearchMode, global};

const MIN_ALLOCATION_SIZE: usize = 8;
const MAX_ALLOCATION_SIZE: usize = 256;
const MAX_BLOCKS: usize = 8000;

/// Benchmark for the memregion allocator
#[derive(Parser, Debug)]
#[command(name = "bema", version, about = "Benchmark the memregion allocator")]
struct Args {
  /// Number of blocks to allocate per run
  #[arg(default_value_t = 1)]
  num_blocks: usize,

  /// Block size pattern; all patterns run when omitted
  #[arg(long, value_enum)]
  alloc: Option<SizePattern>,

  /// Order in which blocks are freed
  #[arg(long, value_enum)]
  order: Option<FreeOrder>,

  /// Pointer handed to free
  #[arg(long, value_enum)]
  free: Option<FreeMode>,

  /// Region capacity in bytes
  #[arg(long, default_value_t = memregion::config::DEFAULT_CAPACITY, env = "MEMREGION_CAPACITY")]
  capacity: usize,

  /// Free-block search mode (parallel or sequential)
  #[arg(long, default_value = "parallel", env = "MEMREGION_SEARCH")]
  search: String,

  /// Stop a run after this many seconds
  #[arg(long, default_value_t = 60)]
  duration: u64,

  /// Seed for sizes and interior offsets; random when omitted
  #[arg(long)]
  seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SizePattern {
  /// Uniform sizes between 8 and 256 bytes
  Uniform,
  /// 64 bytes and 64 KiB, alternating
  Alternate,
  /// Powers of two
  Power2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FreeOrder {
  /// Free every block in allocation order
  All,
  /// Free the first half, then half of what is left, and so on
  Halves,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FreeMode {
  /// The pointer returned by allocate
  Exact,
  /// A random address inside the block
  Interior,
}

struct Report {
  elapsed: Duration,
  iterations: usize,
  errors: usize,
  timed_out: bool,
}

fn block_sizes(
  pattern: SizePattern,
  count: usize,
  rng: &mut StdRng,
) -> Vec<usize> {
  let mut sizes: Vec<usize> = Vec::with_capacity(count);
  for i in 0..count {
    let size = match pattern {
      SizePattern::Uniform => rng.gen_range(MIN_ALLOCATION_SIZE..MAX_ALLOCATION_SIZE),
      SizePattern::Alternate => match sizes.last() {
        Some(64) => 64 * 1024,
        _ => 64,
      },
      SizePattern::Power2 => 1usize.checked_shl(i as u32).unwrap_or(usize::MAX),
    };
    sizes.push(size);
  }
  sizes
}

/// Indices in the order they get freed.
fn free_order(
  order: FreeOrder,
  count: usize,
) -> Vec<usize> {
  match order {
    FreeOrder::All => (0..count).collect(),
    FreeOrder::Halves => {
      let mut indices = Vec::with_capacity(count);
      let (mut start, end) = (0, count);
      while end - start > 1 {
        let mid = (start + end) / 2;
        indices.extend(start..mid);
        start = mid;
      }
      if start < end {
        indices.push(start);
      }
      indices
    }
  }
}

fn run(
  num_blocks: usize,
  pattern: SizePattern,
  order: FreeOrder,
  mode: FreeMode,
  deadline: Duration,
  rng: &mut StdRng,
) -> Report {
  let started = Instant::now();
  let sizes = block_sizes(pattern, num_blocks, rng);

  let mut errors = 0;
  let mut timed_out = false;
  let mut working_set = Vec::with_capacity(num_blocks);

  for &size in &sizes {
    if started.elapsed() > deadline {
      timed_out = true;
      break;
    }
    let ptr = global::allocate(size);
    if ptr.is_none() {
      errors += 1;
    }
    working_set.push(ptr);
  }

  let mut iterations = 0;
  for index in free_order(order, working_set.len()) {
    if started.elapsed() > deadline {
      timed_out = true;
      break;
    }
    iterations += 1;

    let Some(ptr) = working_set[index] else {
      continue;
    };
    let offset = match mode {
      FreeMode::Exact => 0,
      FreeMode::Interior => rng.gen_range(0..sizes[index]),
    };
    if let Err(err) = global::free(ptr.as_ptr().wrapping_add(offset)) {
      warn!("free of block {index} failed: {err}");
    }
  }

  Report {
    elapsed: started.elapsed(),
    iterations,
    errors,
    timed_out,
  }
}

/// Peak resident set size in kilobytes.
fn max_rss_kb() -> Result<i64> {
  let mut usage = MaybeUninit::<libc::rusage>::zeroed();
  let result = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
  if result != 0 {
    return Err(std::io::Error::last_os_error()).context("getrusage failed");
  }
  Ok(unsafe { usage.assume_init() }.ru_maxrss as i64)
}

fn print_report(
  num_blocks: usize,
  report: &Report,
) -> Result<()> {
  let nanos = report.elapsed.as_nanos() as f64;
  println!("Number of blocks {num_blocks}");
  println!("duration {nanos:.3} nano seconds");
  println!("iterations {}", report.iterations);
  println!("errors {}", report.errors);
  if report.iterations > 0 {
    println!(
      "Mean time per iteration {:.3} nano seconds",
      nanos / report.iterations as f64
    );
  }
  if report.timed_out {
    println!("run stopped at the deadline");
  }
  println!("max_rss {} Kb", max_rss_kb()?);
  Ok(())
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

  let args = Args::parse();
  if args.num_blocks == 0 || args.num_blocks > MAX_BLOCKS {
    bail!("number of blocks must be between 1 and {MAX_BLOCKS}");
  }

  let search: SearchMode = args.search.parse()?;
  global::configure(
    AllocatorConfig::new(args.capacity).with_search(search),
  )
  .context("failed to configure the allocator")?;

  let seed = args.seed.unwrap_or_else(rand::random);
  info!("seed {seed}, capacity {}, {search} search", args.capacity);
  let mut rng = StdRng::seed_from_u64(seed);
  let deadline = Duration::from_secs(args.duration);

  println!("----------- Start benchmarking memory allocator ----------------------");
  println!("Number of blocks {}", args.num_blocks);
  println!("process memory usage {} Kb", max_rss_kb()?);

  let patterns = args
    .alloc
    .map_or_else(|| SizePattern::value_variants().to_vec(), |p| vec![p]);
  let orders = args
    .order
    .map_or_else(|| FreeOrder::value_variants().to_vec(), |o| vec![o]);
  let modes = args
    .free
    .map_or_else(|| FreeMode::value_variants().to_vec(), |m| vec![m]);

  let mut test = 0;
  for &pattern in &patterns {
    for &order in &orders {
      for &mode in &modes {
        test += 1;
        println!(
          "-------------------- Test {test} [{pattern:?}, {order:?}, {mode:?}] ------------------------"
        );
        let report = run(args.num_blocks, pattern, order, mode, deadline, &mut rng);
        print_report(args.num_blocks, &report)?;
      }
    }
  }

  global::log_chain();
  Ok(())
}
