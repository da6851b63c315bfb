//! The process-facing, single-instance surface.
//!
//! The engine itself is generic and stateless beyond its own fields, but
//! most callers just want "the" allocator, the way libc's `malloc` is a
//! single implicit instance per process. This module binds one
//! [`Engine<SbrkProvider>`] per thread behind a `thread_local!` + `RefCell`,
//! which is the idiomatic way to express "exactly one logical instance,
//! non-`Sync`, no locking" in Rust — `sbrk` is a process-wide resource, so
//! running this on more than one thread at a time is a caller error, not
//! something this module tries to arbitrate.

use std::cell::RefCell;
use std::ptr::NonNull;

thread_local! {
  static ENGINE: RefCell<Engine<SbrkProvider>> = RefCell::new(Engine::new(SbrkProvider::default()));
}

use crate::engine::Engine;
use crate::provider::SbrkProvider;

/// Initializes the thread-local heap. A no-op if already initialized.
/// Returns `false` if the first heap extension fails.
pub fn init() -> bool {
  ENGINE.with(|e| e.borrow_mut().init())
}

pub fn malloc(size: usize) -> Option<NonNull<u8>> {
  ENGINE.with(|e| e.borrow_mut().malloc(size))
}

/// # Safety
/// `ptr`, if present, must have been returned by [`malloc`]/[`calloc`]/[`realloc`]
/// on this same thread and not already freed.
pub unsafe fn free(ptr: Option<NonNull<u8>>) {
  ENGINE.with(|e| unsafe { e.borrow_mut().free(ptr) });
}

/// # Safety
/// `ptr`, if present, must have been returned by [`malloc`]/[`calloc`]/[`realloc`]
/// on this same thread.
pub unsafe fn realloc(ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
  ENGINE.with(|e| unsafe { e.borrow_mut().realloc(ptr, size) })
}

pub fn calloc(nmemb: usize, size: usize) -> Option<NonNull<u8>> {
  ENGINE.with(|e| e.borrow_mut().calloc(nmemb, size))
}

/// Runs the heap invariant checker against the calling thread's heap.
pub fn check_heap(line: u32) -> bool {
  ENGINE.with(|e| e.borrow().check_heap(line))
}

/// A [`std::alloc::GlobalAlloc`] adapter over the thread-local engine.
///
/// Registering this as `#[global_allocator]` makes every thread drive its
/// own independent `sbrk`-backed heap through the engine in this crate,
/// generalizing the teacher crate's direct `Allocator`/`GlobalAlloc` impls
/// over `BumpAllocator` to the segregated-list engine. Because `ENGINE` is
/// thread-local, this is safe to register process-wide even though
/// `Engine`/`SbrkProvider` are themselves `!Sync`.
pub struct SegAlloc;

unsafe impl std::alloc::GlobalAlloc for SegAlloc {
  unsafe fn alloc(&self, layout: std::alloc::Layout) -> *mut u8 {
    malloc(layout.size()).map_or(std::ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: std::alloc::Layout) {
    // SAFETY: caller upholds `GlobalAlloc::dealloc`'s contract, which is at
    // least as strong as `free`'s.
    unsafe { free(NonNull::new(ptr)) };
  }

  unsafe fn realloc(&self, ptr: *mut u8, _layout: std::alloc::Layout, new_size: usize) -> *mut u8 {
    // SAFETY: caller upholds `GlobalAlloc::realloc`'s contract.
    unsafe { realloc(NonNull::new(ptr), new_size) }.map_or(std::ptr::null_mut(), NonNull::as_ptr)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn thread_local_engine_round_trips_an_allocation() {
    let p = malloc(64).expect("malloc should succeed");
    unsafe {
      p.as_ptr().write(0xAB);
      assert_eq!(p.as_ptr().read(), 0xAB);
      free(Some(p));
    }
    assert!(check_heap(line!()));
  }
}
