//! Segregated explicit free lists.
//!
//! Free blocks are bucketed into [`crate::consts::NUM_LISTS`] size classes.
//! Each class is an unordered, doubly-linked, in-place chain through the
//! first two words of each free block's payload (see [`crate::block::Block::link_prev`]/
//! [`crate::block::Block::link_next`]), plus a resume cursor used by
//! [`FreeLists::find_fit`] to approximate a rotating first-fit without a
//! global scan.

use crate::block::Block;
use crate::consts::NUM_LISTS;

/// Classifies a block size into one of the `NUM_LISTS` size classes, by
/// doubling thresholds: `[32,64], (64,128], (128,256], ..., (16384,32768],
/// (32768, inf)`.
pub(crate) fn find_free_list(size: usize) -> usize {
  const THRESHOLDS: [usize; NUM_LISTS - 1] = [64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768];
  THRESHOLDS
    .iter()
    .position(|&t| size <= t)
    .unwrap_or(NUM_LISTS - 1)
}

#[derive(Default)]
struct List {
  root: Option<Block>,
  cursor: Option<Block>,
}

/// The full array of segregated free lists and their resume cursors.
pub(crate) struct FreeLists {
  lists: [List; NUM_LISTS],
}

impl FreeLists {
  pub(crate) fn new() -> Self {
    Self { lists: std::array::from_fn(|_| List::default()) }
  }

  /// Inserts `block` at the head of the list matching its current size.
  /// Does not touch the block's header/footer bits — callers are
  /// responsible for having already marked it free.
  pub(crate) fn insert_free_block(&mut self, block: Block) {
    let idx = find_free_list(block.size());
    let list = &mut self.lists[idx];
    block.set_link_prev(None);
    block.set_link_next(list.root);
    if let Some(old_head) = list.root {
      old_head.set_link_prev(Some(block));
    }
    list.root = Some(block);
  }

  /// Removes `block` from the list matching its current size, repairing the
  /// resume cursor if it pointed at `block`.
  pub(crate) fn remove_block(&mut self, block: Block) {
    let idx = find_free_list(block.size());
    let prev = block.link_prev();
    let next = block.link_next();

    match (prev, next) {
      (None, None) => self.lists[idx].root = None,
      (None, Some(n)) => {
        n.set_link_prev(None);
        self.lists[idx].root = Some(n);
      }
      (Some(p), None) => p.set_link_next(None),
      (Some(p), Some(n)) => {
        p.set_link_next(Some(n));
        n.set_link_prev(Some(p));
      }
    }

    let list = &mut self.lists[idx];
    if list.cursor == Some(block) {
      list.cursor = next.or(list.root);
    }
  }

  /// First-fit search starting from each list's resume cursor, from the
  /// size class of `asize` up through the top (open-ended) class. Advances
  /// the winning list's cursor past the returned block before returning it.
  pub(crate) fn find_fit(&mut self, asize: usize) -> Option<Block> {
    let start_idx = find_free_list(asize);
    for idx in start_idx..NUM_LISTS {
      let list = &mut self.lists[idx];
      let mut iter = list.cursor.or(list.root);
      while let Some(block) = iter {
        if block.size() >= asize {
          list.cursor = block.link_next();
          return Some(block);
        }
        iter = block.link_next();
      }
    }
    None
  }

  /// Iterates every free block currently linked into list `index`, in
  /// traversal order. Used by the heap checker.
  pub(crate) fn iter(&self, index: usize) -> impl Iterator<Item = Block> + '_ {
    let mut cur = self.lists[index].root;
    std::iter::from_fn(move || {
      let block = cur?;
      cur = block.link_next();
      Some(block)
    })
  }

  pub(crate) fn root(&self, index: usize) -> Option<Block> {
    self.lists[index].root
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_word_buf(n: usize) -> Box<[u64]> {
    vec![0u64; n].into_boxed_slice()
  }

  fn block_at(buf: &mut [u64], idx: usize, size: usize) -> Block {
    let ptr = unsafe { std::ptr::NonNull::new_unchecked(buf.as_mut_ptr().add(idx)) };
    let b = Block::from_header(ptr);
    b.write_header(size, false, true);
    b.write_footer(size, false, true);
    b
  }

  #[test]
  fn find_free_list_classifies_boundaries() {
    assert_eq!(find_free_list(32), 0);
    assert_eq!(find_free_list(64), 0);
    assert_eq!(find_free_list(65), 1);
    assert_eq!(find_free_list(128), 1);
    assert_eq!(find_free_list(129), 2);
    assert_eq!(find_free_list(4096), 6);
    assert_eq!(find_free_list(32768), 9);
    assert_eq!(find_free_list(32769), 10);
    assert_eq!(find_free_list(usize::MAX), 10);
  }

  #[test]
  fn insert_is_lifo_and_remove_unlinks() {
    let mut buf = make_word_buf(32);
    let a = block_at(&mut buf, 0, 64);
    let b = block_at(&mut buf, 8, 64);
    let c = block_at(&mut buf, 16, 64);

    let mut lists = FreeLists::new();
    lists.insert_free_block(a);
    lists.insert_free_block(b);
    lists.insert_free_block(c);

    let idx = find_free_list(64);
    assert_eq!(lists.iter(idx).collect::<Vec<_>>(), vec![c, b, a]);

    lists.remove_block(b);
    assert_eq!(lists.iter(idx).collect::<Vec<_>>(), vec![c, a]);
    assert_eq!(c.link_prev(), None);
    assert_eq!(a.link_prev(), Some(c));
  }

  #[test]
  fn find_fit_returns_first_large_enough_block_and_advances_cursor() {
    let mut buf = make_word_buf(32);
    let small = block_at(&mut buf, 0, 64);
    let big = block_at(&mut buf, 8, 128);

    let mut lists = FreeLists::new();
    lists.insert_free_block(small);
    lists.insert_free_block(big);

    let found = lists.find_fit(100).expect("should find the 128-byte block");
    assert_eq!(found, big);
  }

  #[test]
  fn remove_repairs_cursor_pointing_at_removed_block() {
    let mut buf = make_word_buf(32);
    let a = block_at(&mut buf, 0, 64);
    let b = block_at(&mut buf, 8, 64);

    let mut lists = FreeLists::new();
    lists.insert_free_block(a);
    lists.insert_free_block(b);

    // Drive the cursor to point at `a` (the tail of the size-64 list).
    assert_eq!(lists.find_fit(64), Some(b));
    assert_eq!(lists.find_fit(64), Some(a));

    let idx = find_free_list(64);
    lists.lists[idx].cursor = Some(a);
    lists.remove_block(a);
    assert_eq!(lists.lists[idx].cursor, lists.lists[idx].root);
  }
}
