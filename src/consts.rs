//! Compile-time knobs.
//!
//! These mirror the constants from `mm_final_v3.c` (`wsize`, `dsize`,
//! `min_block_size`, `chunksize`) one-to-one, plus the size of the
//! segregated-list array. Changing [`ALIGNMENT`] or [`WORD`] would require
//! re-deriving the size-class thresholds in [`crate::freelist::find_free_list`]
//! and is not supported by this port.

use static_assertions::const_assert_eq;

/// Size in bytes of a header/footer word.
pub const WORD: usize = 8;

/// Alignment, in bytes, guaranteed for every returned payload address.
pub const ALIGNMENT: usize = 16;

/// Smallest block size: one header word, two free-list link words, one footer word.
pub const MIN_BLOCK: usize = 32;

/// Heap extension granularity used when a fit search misses.
pub const CHUNK: usize = 4096;

/// Number of segregated free lists (and matching resume cursors).
pub const NUM_LISTS: usize = 11;

const_assert_eq!(MIN_BLOCK, 2 * WORD + 2 * WORD);
const_assert_eq!(MIN_BLOCK % ALIGNMENT, 0);
const_assert_eq!(CHUNK % ALIGNMENT, 0);
const_assert_eq!(NUM_LISTS, 11);
