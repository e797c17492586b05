use std::io::Read;

use libc::sbrk;
use rallocator::Allocator;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // The process-wide heap. All state behind this handle -- the sentinel,
  // the two one-shot latches, and the block list -- lives in process-wide
  // statics, not on `heap` itself; see `Allocator`'s docs.
  let heap = Allocator::new();

  unsafe {
    // Initial heap state
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate space for a u32 (4 bytes).
    // --------------------------------------------------------------------
    let first_block = heap.allocate(4);
    println!("\n[1] Allocate 4 bytes, address = {:?}", first_block);

    let first_ptr = first_block as *mut u32;
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", first_ptr.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 12 bytes.
    //    This shows how the allocator handles "odd-sized" allocations.
    // --------------------------------------------------------------------
    let second_block = heap.allocate(12);
    println!("\n[2] Allocate 12 bytes, address = {:?}", second_block);

    std::ptr::write_bytes(second_block, 0xAB, 12);
    println!("[2] Initialized second block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate 8 bytes to observe the fixed 8-byte payload alignment.
    // --------------------------------------------------------------------
    let third_block = heap.allocate(8);
    println!("\n[3] Allocate 8 bytes, address = {:?}", third_block);

    let third_ptr = third_block as *mut u64;
    third_ptr.write(0x1122334455667788);
    println!("[3] Value written = 0x{:X}", third_ptr.read());
    println!(
      "[3] Address = {:#X}, addr % 8 = {}",
      third_block as usize,
      (third_block as usize) % 8
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Allocate an array of 16 u16s (32 bytes) to force more movement.
    // --------------------------------------------------------------------
    let fourth_block = heap.allocate(32);
    println!("\n[4] Allocate 32 bytes, address = {:?}", fourth_block);

    let fourth_ptr = fourth_block as *mut u16;
    for i in 0..16 {
      fourth_ptr.add(i).write(i as u16);
    }
    println!("[4] Wrote 0..15 into the u16 array");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Release the first block.
    //
    //    Unlike a pure bump allocator, this one tracks freed blocks and
    //    can reuse them -- but not before the next heap-bound allocation,
    //    since coalescing and reuse are deferred to that point.
    // --------------------------------------------------------------------
    heap.release(first_block);
    println!("\n[5] Released first_block at {:?}", first_block);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Allocate a small block (2 bytes) to see if the allocator
    //    reuses the freed block.
    // --------------------------------------------------------------------
    let fifth_block = heap.allocate(2);
    println!("\n[6] Allocate 2 bytes, address = {:?}", fifth_block);

    println!(
      "[6] fifth_block == first_block? {}",
      if fifth_block == first_block {
        "Yes, it reused the freed block"
      } else {
        "No, it was served from elsewhere"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Allocate a large block to observe the mapping threshold.
    //    This does NOT move the program break.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big_block = heap.allocate(200 * 1024);
    println!("\n[7] Allocate 200 KiB (above the mapping threshold)");
    println!("[7] address = {:?}", big_block);

    print_program_break("after large alloc (unchanged: it was mapped, not sbrk'd)");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 8) Resize the array block in place and then past its neighbors.
    // --------------------------------------------------------------------
    let grown = heap.resize(fourth_block, 64);
    println!(
      "\n[8] Resized 32-byte block to 64 bytes, address changed? {}",
      grown != fourth_block
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 9) End of demo: release everything still outstanding.
    // --------------------------------------------------------------------
    heap.release(second_block);
    heap.release(third_block);
    heap.release(grown);
    heap.release(fifth_block);
    heap.release(big_block);

    println!("\n[9] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
