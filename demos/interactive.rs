//! Interactive demo of the segregated-list engine, driven over a real
//! `sbrk`-backed heap. Allocates a handful of blocks of varying size, writes
//! through them, frees a few out of order, and runs the heap checker after
//! each step so any corruption is reported immediately instead of crashing
//! somewhere downstream.

use segalloc::engine::Engine;
use segalloc::provider::SbrkProvider;

fn main() {
  tracing_subscriber::fmt::init();

  let mut engine = Engine::new(SbrkProvider::default());
  assert!(engine.init(), "failed to initialize the heap");

  let sizes = [16usize, 512, 64, 4096, 24];
  let mut blocks = Vec::new();

  for size in sizes {
    let ptr = engine.malloc(size).expect("malloc failed");
    unsafe { ptr.as_ptr().write_bytes(0xAB, size) };
    println!("malloc({size}) -> {ptr:?}");
    blocks.push(ptr);
    assert!(engine.check_heap(line!()), "heap corrupted after malloc");
  }

  // free the second and fourth allocations, out of order, to exercise
  // coalescing with both a free predecessor and a free successor.
  unsafe {
    engine.free(Some(blocks.remove(3)));
    engine.free(Some(blocks.remove(1)));
  }
  assert!(engine.check_heap(line!()), "heap corrupted after free");

  let grown = unsafe { engine.realloc(Some(blocks[0]), 2048) }.expect("realloc failed");
  println!("realloc(blocks[0], 2048) -> {grown:?}");
  blocks[0] = grown;
  assert!(engine.check_heap(line!()), "heap corrupted after realloc");

  for ptr in blocks {
    unsafe { engine.free(Some(ptr)) };
  }
  assert!(engine.check_heap(line!()), "heap corrupted after final frees");

  println!("all checks passed");
}
