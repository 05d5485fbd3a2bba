use std::{io::Read, ptr};

use memregion::{RegionAllocator, SearchMode};

/// Waits until the user presses ENTER when `--pause` was given.
/// Useful when you want to inspect the mapping with tools like `pmap` or
/// `gdb` between steps.
fn block_until_enter_pressed(pause: bool) {
  if !pause {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block of the chain.
fn print_chain(
  label: &str,
  allocator: &RegionAllocator,
) {
  println!("[{label}] chain:");
  for block in allocator.blocks() {
    println!("    {block}");
  }
}

fn main() -> memregion::AllocResult<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
  let pause = std::env::args().any(|arg| arg == "--pause");

  // The region is only mapped on the first allocation.
  let allocator = RegionAllocator::new(
    memregion::AllocatorConfig::new(10_000).with_search(SearchMode::Sequential),
  )?;

  // --------------------------------------------------------------------
  // 1) Allocate space for a u32. The first call reserves the region.
  // --------------------------------------------------------------------
  let first_block = allocator.allocate(size_of::<u32>())?.as_ptr();
  println!("\n[1] Allocate u32 at {first_block:?}");
  if let Some(stats) = allocator.stats() {
    println!(
      "[1] region of {} bytes, {} usable, {} search",
      stats.region_len,
      stats.total_free_capacity,
      allocator.config().search
    );
  }

  let first_ptr = first_block.cast::<u32>();
  unsafe { first_ptr.write(0xDEADBEEF) };
  println!("[1] Value written to first_block = 0x{:X}", unsafe { first_ptr.read() });
  print_chain("1", &allocator);

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes. The size is rounded up to the machine word.
  // --------------------------------------------------------------------
  let second_block = allocator.allocate(12)?.as_ptr();
  println!(
    "\n[2] Allocate [u8; 12] at {second_block:?}, size_of = {}",
    allocator.size_of(second_block)?
  );
  unsafe { ptr::write_bytes(second_block, 0xAB, 12) };
  print_chain("2", &allocator);

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 3) Allocate a [u16; 16] and fill it.
  // --------------------------------------------------------------------
  let third_block = allocator.allocate(32)?.as_ptr();
  let third_ptr = third_block.cast::<u16>();
  for i in 0..16 {
    unsafe { third_ptr.add(i).write(i as u16) };
  }
  println!("\n[3] Wrote 0..15 into the u16 array at {third_block:?}");

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 4) Free the second block through an interior pointer. Its payload is
  //    zeroed and it stays between two allocated neighbors.
  // --------------------------------------------------------------------
  allocator.free(second_block.wrapping_add(5))?;
  println!(
    "\n[4] Freed second_block, still valid? {}",
    allocator.is_valid(second_block)
  );
  print_chain("4", &allocator);

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 5) A small allocation lands in the hole left by the second block.
  // --------------------------------------------------------------------
  let fourth_block = allocator.allocate(2)?.as_ptr();
  println!(
    "\n[5] fourth_block == second_block? {}",
    if fourth_block == second_block {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 6) Ask for more than the region holds.
  // --------------------------------------------------------------------
  match allocator.allocate(64 * 1024) {
    Ok(ptr) => println!("\n[6] Unexpectedly got {ptr:?}"),
    Err(err) => println!("\n[6] Large request refused: {err}"),
  }

  // --------------------------------------------------------------------
  // 7) Free everything. The chain collapses back to one free block.
  // --------------------------------------------------------------------
  for block in [first_block, third_block, fourth_block] {
    allocator.free(block)?;
  }
  print_chain("7", &allocator);

  println!("\n[8] End of example. The region is unmapped when the allocator is dropped.");
  Ok(())
}
