use std::{io::Read, ptr};

use libc::sbrk;
use segalloc::SegregatedAllocator;

/// Waits until the user presses ENTER.
/// Handy for looking at the process with `pmap` or `gdb` between steps.
/// Set `SEGALLOC_DEMO_NONINTERACTIVE` to skip the pauses.
fn block_until_enter_pressed() {
  if std::env::var_os("SEGALLOC_DEMO_NONINTERACTIVE").is_some() {
    return;
  }

  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

/// Turns a null allocation into an error, which happens when something else
/// in the process moved the program break and the heap can no longer grow.
fn non_null(
  ptr: *mut u8,
  what: &str,
) -> Result<*mut u8, Box<dyn std::error::Error>> {
  if ptr.is_null() {
    return Err(format!("allocating {what} failed: the program break can no longer be grown").into());
  }

  Ok(ptr)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  // RUST_LOG=segalloc=trace shows every call and every time the heap grows
  env_logger::init();

  print_program_break("start");

  let mut allocator = SegregatedAllocator::new()?;

  print_program_break("heap formatted");
  println!("{}", allocator.dump());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) A few small blocks. Each one grows the heap by exactly its size.
  // --------------------------------------------------------------------
  let first = non_null(allocator.allocate(4), "first")?;
  let second = non_null(allocator.allocate(40), "second")?;
  let third = non_null(allocator.allocate(100), "third")?;

  unsafe {
    (first as *mut u32).write(0xDEADBEEF);
    ptr::write_bytes(second, 0xAB, 40);
    ptr::write_bytes(third, 0xCD, 100);
  }

  println!("\n[1] first = {first:p}, second = {second:p}, third = {third:p}");
  println!("{}", allocator.dump());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free the middle block, then the first. They merge into one.
  // --------------------------------------------------------------------
  unsafe {
    allocator.release(second);
    allocator.release(first);
  }

  println!("\n[2] released second and first");
  println!("{}", allocator.dump());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) A small request is carved out of the merged block.
  // --------------------------------------------------------------------
  let fourth = allocator.allocate(16);

  println!(
    "\n[3] fourth = {fourth:p}, reused the freed space? {}",
    if fourth == first { "yes" } else { "no" }
  );
  println!("{}", allocator.dump());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) A large block moves the program break.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");

  let big = non_null(allocator.allocate(64 * 1024), "big")?;

  println!("\n[4] big = {big:p}");
  print_program_break("after large alloc");

  // --------------------------------------------------------------------
  // 5) Release it again. The heap keeps the space for later requests.
  // --------------------------------------------------------------------
  unsafe { allocator.release(big) };

  println!("\n[5] released big");
  println!("{:#?}", allocator.stats());
  print_program_break("after release");

  allocator.check()?;

  println!("\n[6] heap is consistent. End of demo.");

  Ok(())
}
