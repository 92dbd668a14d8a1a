use std::{env, io::Read, ptr};

use segalloc::{Allocator, ArenaSource, Strategy};

/// Waits until the user presses ENTER when `--step` was given.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb` between allocator calls.
fn block_until_enter_pressed(step: bool) {
  if !step {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break, the upper boundary of the heap grown
/// through brk/sbrk.
#[cfg(unix)]
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    segalloc::Sbrk::program_break(),
  );
}

#[cfg(not(unix))]
fn print_program_break(_label: &str) {}

fn main() {
  segalloc::init_logging();

  let mut step = false;
  let mut strategy = Strategy::from_env();

  for arg in env::args().skip(1) {
    if arg == "--step" {
      step = true;
      continue;
    }
    match arg.parse() {
      Ok(parsed) => strategy = parsed,
      Err(err) => {
        eprintln!("{err}");
        std::process::exit(2);
      }
    }
  }

  let mut allocator = Allocator::new();
  allocator.set_strategy(strategy);
  println!("Using {} over {}", allocator.strategy(), allocator.source().name());

  print_program_break("start");
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 1) Two allocations back to back: both blocks are USED.
  // --------------------------------------------------------------------
  let a = allocator.allocate(100);
  let b = allocator.allocate(200);
  println!("\n[1] allocate(100) = {a:?}, allocate(200) = {b:?}");
  allocator.dump_state();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) Free the first: one FREE block followed by a USED one.
  // --------------------------------------------------------------------
  let _ = allocator.free(a);
  println!("\n[2] free(a)");
  allocator.dump_state();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) Free the second: the two neighbours merge into one FREE block.
  // --------------------------------------------------------------------
  let _ = allocator.free(b);
  println!("\n[3] free(b)");
  allocator.dump_state();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) Allocate 150 bytes: carved from the merged block by a split.
  // --------------------------------------------------------------------
  let c = allocator.allocate(150);
  println!(
    "\n[4] allocate(150) = {c:?} (reused first block? {})",
    if c == a { "yes" } else { "no" }
  );
  allocator.dump_state();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) Zeroed allocation, including one whose size overflows.
  // --------------------------------------------------------------------
  let zeroed = allocator.zeroed_allocate(8, 16);
  if zeroed.is_null() || c.is_null() {
    eprintln!("out of memory");
    std::process::exit(1);
  }
  let all_zero = unsafe { std::slice::from_raw_parts(zeroed, 128) }
    .iter()
    .all(|&byte| byte == 0);
  println!("\n[5] zeroed_allocate(8, 16) = {zeroed:?}, all zero: {all_zero}");

  let overflow = allocator.try_zeroed_allocate(2, usize::MAX);
  println!("[5] zeroed_allocate(2, usize::MAX) = {overflow:?}");
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 6) Resize: shrink in place, then grow past the neighbour.
  // --------------------------------------------------------------------
  unsafe { ptr::write_bytes(c, 0xAB, 150) };
  let shrunk = allocator.resize(c, 32);
  println!("\n[6] resize(c, 32) = {shrunk:?} (in place? {})", shrunk == c);

  let grown = allocator.resize(shrunk, 4096);
  if grown.is_null() {
    eprintln!("out of memory");
    std::process::exit(1);
  }
  let kept = unsafe { std::slice::from_raw_parts(grown, 32) }
    .iter()
    .all(|&byte| byte == 0xAB);
  println!("[6] resize(c, 4096) = {grown:?}, contents kept: {kept}");
  allocator.dump_state();
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 7) Double free: reported, nothing changes.
  // --------------------------------------------------------------------
  let _ = allocator.free(zeroed);
  match allocator.free(zeroed) {
    Ok(()) => println!("\n[7] second free(zeroed) unexpectedly succeeded"),
    Err(err) => println!("\n[7] second free(zeroed): {err}"),
  }

  let _ = allocator.free(grown);
  print_program_break("end");
  println!("\n[8] {}", allocator.stats());
}
