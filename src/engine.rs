//! The allocation engine: heap layout, fit search, splitting, coalescing.
//!
//! [`Engine`] bundles the per-heap state the distilled spec describes as
//! "module-level" — the first-block pointer, the last-block pointer, and the
//! segregated free lists — into an explicit handle, generalizing the
//! teacher crate's `BumpAllocator` (which bundled its own `first`/`last`
//! pointers the same way) to the segregated-list design. A process that
//! wants the classic single-instance-per-process model gets it via
//! [`crate::global`], which is a thin wrapper around one `Engine` per thread.

use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::align::align16;
use crate::block::Block;
use crate::consts::{CHUNK, MIN_BLOCK, WORD};
use crate::freelist::{find_free_list, FreeLists};
use crate::provider::Provider;

/// Bootstrap metadata size: one prologue footer word, one epilogue header
/// word. The segregated-list roots and resume cursors the original C engine
/// stores in the first 22 heap words live instead as native fields of
/// [`FreeLists`] — see `DESIGN.md` for the rationale. Only the two sentinel
/// words actually need to live on the heap.
const BOOTSTRAP_WORDS: usize = 2;

/// The heap-management engine, generic over the region [`Provider`] it
/// drives.
pub struct Engine<P: Provider> {
  provider: P,
  /// Address of the first real block's header, fixed at `init` time. The
  /// bytes it points at are rewritten by every `extend_heap`, but the
  /// pointer itself never moves (mirrors `heap_listp` in the source engine).
  heap_listp: Option<Block>,
  /// The block whose successor is the epilogue.
  last_block: Option<Block>,
  lists: FreeLists,
}

impl<P: Provider> Engine<P> {
  /// Creates an uninitialized engine over `provider`. Call [`Engine::init`]
  /// (or just [`Engine::malloc`], which calls it lazily) before use.
  pub fn new(provider: P) -> Self {
    Self { provider, heap_listp: None, last_block: None, lists: FreeLists::new() }
  }

  pub fn is_initialized(&self) -> bool {
    self.heap_listp.is_some()
  }

  /// Bootstraps the heap: writes the prologue/epilogue sentinels, then
  /// extends by one [`CHUNK`] and files the resulting free block. Idempotent
  /// once initialization has succeeded; returns `false` (engine stays
  /// uninitialized) if the first `sbrk` call fails.
  pub fn init(&mut self) -> bool {
    if self.is_initialized() {
      return true;
    }

    let Some(base) = self.provider.sbrk(BOOTSTRAP_WORDS * WORD) else {
      warn!("heap initialization failed: provider refused the bootstrap request");
      return false;
    };

    let prologue_footer: NonNull<u64> = base.cast();
    let epilogue_header: NonNull<u64> =
      unsafe { NonNull::new_unchecked(base.as_ptr().add(WORD).cast()) };

    // SAFETY: both words were just carved out by `sbrk` above.
    unsafe {
      prologue_footer.as_ptr().write(crate::block::pack(0, true, true));
      epilogue_header.as_ptr().write(crate::block::pack(0, true, true));
    }

    self.last_block = Some(Block::from_header(prologue_footer));
    self.heap_listp = Some(Block::from_header(epilogue_header));

    let Some(first_free) = self.extend_heap(CHUNK) else {
      // Sentinels are written but the chunk extension failed; leave the
      // engine uninitialized rather than expose a heap with no free space.
      self.heap_listp = None;
      self.last_block = None;
      return false;
    };
    self.lists.insert_free_block(first_free);
    debug!(size = first_free.size(), "heap initialized");
    true
  }

  /// Extends the heap by `size` bytes (rounded up to [`crate::consts::ALIGNMENT`]),
  /// rewrites the sentinel, and coalesces the result with a free predecessor
  /// if one exists. Returns `None` on provider failure.
  ///
  /// The new block's header reuses the word that used to hold the epilogue
  /// sentinel (one word *before* the freshly granted region), so that the
  /// new epilogue — one word past the end of the new block — always lands
  /// inside memory the provider has already granted: the invariant is that
  /// exactly one spare word always sits at the current end of the heap,
  /// ready to be repurposed as the next block's header.
  fn extend_heap(&mut self, size: usize) -> Option<Block> {
    let size = align16(size);
    let prev_last = self.last_block.expect("extend_heap requires init to have run");
    let prev_alloc = prev_last.alloc();

    let region = self.provider.sbrk(size)?;
    // SAFETY: `region - WORD` is the word that held the previous epilogue
    // sentinel, written by either `init` or the prior `extend_heap` call.
    let header = unsafe { NonNull::new_unchecked(region.as_ptr().sub(WORD).cast()) };
    let block = Block::from_header(header);
    block.write_header(size, false, prev_alloc);
    block.write_footer(size, false, prev_alloc);

    let epilogue = block.find_next();
    epilogue.write_header(0, true, false);

    self.last_block = Some(block);
    trace!(size, addr = ?block.addr(), "heap extended");
    Some(self.coalesce(block))
  }

  /// Classifies a user request into an adjusted block size: `max(MIN_BLOCK,
  /// align16(n.saturating_sub(WORD)) + 2*WORD)`. The `saturating_sub` avoids
  /// the unsigned-underflow edge case in the naive `n - WORD` for `n < WORD`
  /// — see `DESIGN.md`.
  fn adjust_size(n: usize) -> usize {
    MIN_BLOCK.max(align16(n.saturating_sub(WORD)) + 2 * WORD)
  }

  /// Sets the `prev_alloc` bit of `block`'s successor to `alloc`. Only ever
  /// called when that successor is allocated (so it has no footer to keep
  /// in sync) — see the invariant discussion in `DESIGN.md`.
  fn set_successor_prev_alloc(block: Block, alloc: bool) {
    let next = block.find_next();
    debug_assert!(next.alloc(), "set_successor_prev_alloc requires an allocated successor");
    next.write_header(next.size(), next.alloc(), alloc);
  }

  /// Coalesces `block` (already marked free, header and footer written,
  /// not yet linked into any free list) with any free contiguous neighbors.
  /// Returns the (possibly merged) block; does not link it into a free list.
  fn coalesce(&mut self, block: Block) -> Block {
    let next = block.find_next();
    let prev_alloc = block.prev_alloc();
    let next_alloc = next.alloc();

    if prev_alloc && next_alloc {
      return block;
    }

    if prev_alloc && !next_alloc {
      let size = block.size() + next.size();
      if Some(next) == self.last_block {
        self.last_block = Some(block);
      }
      self.lists.remove_block(next);
      block.write_header(size, false, true);
      block.write_footer(size, false, true);
      return block;
    }

    let prev = block.find_prev();
    if !prev_alloc && next_alloc {
      let size = prev.size() + block.size();
      if Some(block) == self.last_block {
        self.last_block = Some(prev);
      }
      self.lists.remove_block(prev);
      prev.write_header(size, false, prev.prev_alloc());
      prev.write_footer(size, false, prev.prev_alloc());
      return prev;
    }

    // both free
    let size = prev.size() + block.size() + next.size();
    if Some(next) == self.last_block {
      self.last_block = Some(prev);
    }
    self.lists.remove_block(next);
    self.lists.remove_block(prev);
    prev.write_header(size, false, prev.prev_alloc());
    prev.write_footer(size, false, prev.prev_alloc());
    prev
  }

  /// Places an allocation of `asize` bytes at the start of `block` (which
  /// must be free and already unlinked). Splits off a free remainder when
  /// there's room for one, otherwise allocates the whole block.
  fn place(&mut self, block: Block, asize: usize) {
    let csize = block.size();
    if csize - asize >= MIN_BLOCK {
      block.write_header(asize, true, block.prev_alloc());

      let remainder = block.find_next();
      remainder.write_header(csize - asize, false, true);
      remainder.write_footer(csize - asize, false, true);
      Self::set_successor_prev_alloc(remainder, false);

      if Some(block) == self.last_block {
        self.last_block = Some(remainder);
      }
      self.lists.insert_free_block(remainder);
    } else {
      block.write_header(csize, true, block.prev_alloc());
    }
  }

  /// Allocates at least `size` bytes, 16-byte aligned. Returns `None` if
  /// `size` is zero or the heap cannot grow to satisfy the request.
  pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
    if !self.is_initialized() && !self.init() {
      return None;
    }
    if size == 0 {
      return None;
    }

    let asize = Self::adjust_size(size);

    let block = match self.lists.find_fit(asize) {
      Some(block) => {
        self.lists.remove_block(block);
        Self::set_successor_prev_alloc(block, true);
        block
      }
      None => {
        let extend_size = asize.max(CHUNK);
        self.extend_heap(extend_size)?
      }
    };

    self.place(block, asize);
    trace!(size, asize, addr = ?block.addr(), "malloc");
    Some(block.payload())
  }

  /// Frees a pointer previously returned by [`Engine::malloc`]/[`Engine::calloc`]/
  /// [`Engine::realloc`]. A no-op if `ptr` is `None`.
  ///
  /// # Safety
  /// `ptr`, if present, must have been returned by this same engine and not
  /// already freed.
  pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
    let Some(ptr) = ptr else { return };
    let block = Block::from_payload(ptr);
    let size = block.size();
    let prev_alloc = block.prev_alloc();

    block.write_header(size, false, prev_alloc);
    block.write_footer(size, false, prev_alloc);

    let merged = self.coalesce(block);
    Self::set_successor_prev_alloc(merged, false);
    self.lists.insert_free_block(merged);
    trace!(addr = ?block.addr(), "free");
  }

  /// Reallocates `ptr` to hold at least `size` bytes, per the semantics in
  /// `SPEC_FULL.md` §4.4: null pointer behaves as `malloc`, zero size frees
  /// and returns `None`, otherwise a fresh block is allocated, the smaller of
  /// the old/new sizes is copied, and the old block is freed. Does not
  /// attempt in-place growth or shrink.
  ///
  /// # Safety
  /// `ptr`, if present, must have been returned by this same engine.
  pub unsafe fn realloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
    let Some(ptr) = ptr else { return self.malloc(size) };
    if size == 0 {
      // SAFETY: caller's contract for `realloc` covers `free` here too.
      unsafe { self.free(Some(ptr)) };
      return None;
    }

    let new_ptr = self.malloc(size)?;
    let old_block = Block::from_payload(ptr);
    let old_payload_size = old_block.size() - WORD;
    let copy_len = old_payload_size.min(size);

    // SAFETY: both pointers are valid for `copy_len` bytes and do not
    // overlap (the new block is distinct from the old one).
    unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len) };

    // SAFETY: caller's contract for `realloc` covers `free` here too.
    unsafe { self.free(Some(ptr)) };
    Some(new_ptr)
  }

  /// Allocates space for `nmemb` elements of `size` bytes each, zeroed.
  /// Returns `None` on multiplicative overflow or allocation failure,
  /// without growing the heap in the overflow case.
  pub fn calloc(&mut self, nmemb: usize, size: usize) -> Option<NonNull<u8>> {
    let total = nmemb.checked_mul(size)?;
    let ptr = self.malloc(total)?;
    // SAFETY: `malloc` guarantees at least `total` writable bytes at `ptr`.
    unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, total) };
    Some(ptr)
  }

  pub(crate) fn heap_listp(&self) -> Option<Block> {
    self.heap_listp
  }

  pub(crate) fn last_block(&self) -> Option<Block> {
    self.last_block
  }

  pub(crate) fn lists(&self) -> &FreeLists {
    &self.lists
  }

  pub(crate) fn provider(&self) -> &P {
    &self.provider
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::ArenaProvider;

  fn engine() -> Engine<ArenaProvider> {
    let mut e = Engine::new(ArenaProvider::new(1 << 20));
    assert!(e.init());
    e
  }

  #[test]
  fn init_leaves_one_chunk_sized_free_block_on_list_six() {
    let e = engine();
    let idx = find_free_list(CHUNK);
    assert_eq!(idx, 6);
    let blocks: Vec<_> = e.lists().iter(idx).collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].size(), CHUNK);
    assert!(e.check_heap(line!()));
  }

  #[test]
  fn malloc_returns_aligned_pointer_and_splits_remainder() {
    let mut e = engine();
    let p = e.malloc(24).expect("malloc(24) should succeed");
    assert_eq!(p.as_ptr() as usize % 16, 0);

    let block = Block::from_payload(p);
    assert_eq!(block.size(), 32);

    let idx = find_free_list(CHUNK - 32);
    let remainder = e.lists().iter(idx).next().expect("remainder should be on the list");
    assert_eq!(remainder.size(), CHUNK - 32);
    assert!(e.check_heap(line!()));
  }

  #[test]
  fn malloc_zero_returns_none_without_side_effects() {
    let mut e = engine();
    assert!(e.malloc(0).is_none());
    assert!(e.check_heap(line!()));
  }

  #[test]
  fn freeing_adjacent_blocks_coalesces_with_tail_remainder() {
    let mut e = engine();
    let a = e.malloc(2000).unwrap();
    let b = e.malloc(2000).unwrap();
    unsafe {
      e.free(Some(a));
      e.free(Some(b));
    }
    assert!(e.check_heap(line!()));

    let total_free: usize = (0..crate::consts::NUM_LISTS).map(|i| e.lists().iter(i).map(Block::size).sum::<usize>()).sum();
    // two 2000-ish blocks plus the remainder coalesce into a single run.
    let mut biggest = 0usize;
    for i in 0..crate::consts::NUM_LISTS {
      for blk in e.lists().iter(i) {
        biggest = biggest.max(blk.size());
      }
    }
    assert!(biggest >= 4064, "expected a single coalesced tail block, got {biggest}");
    assert_eq!(total_free, biggest, "freed space should have merged into one block");
  }

  #[test]
  fn realloc_preserves_prefix_bytes_and_frees_old_block() {
    let mut e = engine();
    let p = e.malloc(40).unwrap();
    unsafe {
      for i in 0..40u8 {
        p.as_ptr().add(i as usize).write(i);
      }
    }
    let q = unsafe { e.realloc(Some(p), 200) }.unwrap();
    unsafe {
      for i in 0..40u8 {
        assert_eq!(q.as_ptr().add(i as usize).read(), i);
      }
    }
    assert!(!Block::from_payload(p).alloc() || p != q, "old block should no longer be the live allocation");
    assert!(e.check_heap(line!()));
  }

  #[test]
  fn realloc_null_behaves_as_malloc() {
    let mut e = engine();
    let p = unsafe { e.realloc(None, 64) }.unwrap();
    assert_eq!(Block::from_payload(p).alloc(), true);
  }

  #[test]
  fn realloc_zero_frees_and_returns_none() {
    let mut e = engine();
    let p = e.malloc(64).unwrap();
    assert!(unsafe { e.realloc(Some(p), 0) }.is_none());
    assert!(e.check_heap(line!()));
  }

  #[test]
  fn calloc_zeroes_memory_and_rejects_overflow() {
    let mut e = engine();
    let p = e.calloc(16, 4).unwrap();
    unsafe {
      for i in 0..64 {
        assert_eq!(p.as_ptr().add(i).read(), 0);
      }
    }
    assert!(e.calloc(usize::MAX / 2, 4).is_none());
  }

  #[test]
  fn free_of_null_is_a_no_op() {
    let mut e = engine();
    unsafe { e.free(None) };
    assert!(e.check_heap(line!()));
  }

  #[test]
  fn randomized_malloc_free_sequence_keeps_heap_valid() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut e = Engine::new(ArenaProvider::new(16 << 20));
    assert!(e.init());
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let sizes = [16usize, 64, 256, 1024, 4096];
    let mut live: Vec<NonNull<u8>> = Vec::new();

    for _ in 0..1000 {
      if live.is_empty() || rng.gen_bool(0.6) {
        let size = sizes[rng.gen_range(0..sizes.len())];
        if let Some(p) = e.malloc(size) {
          live.push(p);
        }
      } else {
        let idx = rng.gen_range(0..live.len());
        let p = live.swap_remove(idx);
        unsafe { e.free(Some(p)) };
      }
      assert!(e.check_heap(line!()), "heap invariant violated mid-sequence");
    }
  }
}
