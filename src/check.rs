//! Heap invariant checker.
//!
//! Mirrors `mm_checkheap` from the source engine: a sequence walk from the
//! first block to the epilogue sentinel, a per-list walk of every segregated
//! free list, and a cross-check that both methods of counting free blocks
//! agree. Findings are logged at `warn` with the call site line number
//! (mirroring the `lineno` argument threaded through the original C checker)
//! rather than returned as an error value, since this function exists purely
//! for debug instrumentation.

use tracing::warn;

use crate::block::Block;
use crate::consts::{ALIGNMENT, NUM_LISTS};
use crate::engine::Engine;
use crate::freelist::find_free_list;
use crate::provider::Provider;

fn aligned(ptr: *mut u8) -> bool {
  (ptr as usize) % ALIGNMENT == 0
}

impl<P: Provider> Engine<P> {
  fn in_heap(&self, ptr: *mut u8) -> bool {
    let lo = self.provider().heap_lo();
    let hi = self.provider().heap_hi();
    !lo.is_null() && ptr >= lo && ptr <= hi
  }

  /// Walks the heap looking for boundary-tag and free-list corruption.
  /// Returns `true` if no problem was found. `line` is the caller's source
  /// line, included in any logged warning to make failures easy to trace
  /// back to the call site, the way the original checker's `lineno`
  /// parameter did.
  pub fn check_heap(&self, line: u32) -> bool {
    let Some(heap_listp) = self.heap_listp() else {
      return true;
    };

    let mut ok = true;
    let mut bad = |msg: &str| {
      warn!(line, "check_heap: {msg}");
      ok = false;
    };

    // Sequence walk: every block in address order, header/footer agreement,
    // alignment, bounds, and the "no two adjacent free blocks" invariant.
    let mut block = heap_listp;
    let mut prev_was_free = false;
    let mut free_count_by_walk = 0usize;
    loop {
      if block.size() == 0 {
        // epilogue
        if !block.alloc() {
          bad("epilogue is not marked allocated");
        }
        if block.prev_alloc() == prev_was_free {
          bad("epilogue's prev_alloc bit disagrees with last_block's actual state");
        }
        break;
      }

      if !aligned(block.payload().as_ptr()) {
        bad("payload is not 16-byte aligned");
      }
      if !self.in_heap(block.addr()) || !self.in_heap(block.find_next().addr()) {
        bad("block lies outside the heap region");
      }
      if block.prev_alloc() == prev_was_free {
        bad("prev_alloc bit disagrees with the predecessor's actual state");
      }
      if !block.alloc() {
        if block.header() != block.footer() {
          bad("header/footer mismatch on a free block");
        }
        if prev_was_free {
          bad("two consecutive free blocks escaped coalescing");
        }
        free_count_by_walk += 1;
      }

      prev_was_free = !block.alloc();
      let next = block.find_next();
      if next == block {
        bad("zero-size non-epilogue block (infinite loop guard tripped)");
        break;
      }
      block = next;
    }

    // Per-list walk: every block is in its correct size class, links are
    // mutually consistent, and each list is acyclic (tortoise and hare).
    let mut free_count_by_lists = 0usize;
    for idx in 0..NUM_LISTS {
      let mut slow = self.lists().root(idx);
      let mut fast = self.lists().root(idx);
      loop {
        fast = fast.and_then(Block::link_next).and_then(Block::link_next);
        slow = slow.and_then(Block::link_next);
        match (slow, fast) {
            (Some(s), Some(f)) if s == f => {
              bad("cycle detected in a free list");
              break;
            }
            (None, _) => break,
            (Some(_), None) => break,
            _ => {}
        }
      }

      for b in self.lists().iter(idx) {
        free_count_by_lists += 1;
        if b.alloc() {
          bad("allocated block found on a free list");
        }
        if find_free_list(b.size()) != idx {
          bad("block filed under the wrong size class");
        }
        if let Some(p) = b.link_prev() {
          if p.link_next() != Some(b) {
            bad("free-list prev/next links are inconsistent");
          }
        }
        if !self.in_heap(b.addr()) {
          bad("free-listed block lies outside the heap region");
        }
      }
    }

    if free_count_by_walk != free_count_by_lists {
      bad("free block count disagrees between the sequence walk and the free lists");
    }

    ok
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::ArenaProvider;

  #[test]
  fn freshly_initialized_heap_passes() {
    let mut e = Engine::new(ArenaProvider::new(1 << 16));
    assert!(e.init());
    assert!(e.check_heap(line!()));
  }

  #[test]
  fn uninitialized_heap_trivially_passes() {
    let e: Engine<ArenaProvider> = Engine::new(ArenaProvider::new(16));
    assert!(e.check_heap(line!()));
  }
}
