//! # segalloc - A Segregated Free-List Memory Allocator
//!
//! This crate provides a **segregated explicit free-list** allocator
//! implementation in Rust that manages memory using the `sbrk` system call.
//!
//! ## Overview
//!
//! Free blocks are bucketed by size class into a fixed number of explicit,
//! doubly-linked lists. Each block carries boundary tags — a header word and,
//! for free blocks only, a footer word — encoding its size and two flag
//! bits: whether it is allocated, and whether its predecessor is allocated.
//! Folding the predecessor's allocation state into the header lets allocated
//! blocks skip the footer entirely, trimming their overhead to one word.
//!
//! ```text
//!   Block layouts:
//!
//!   allocated: [ header | payload ................................ ]
//!   free:      [ header | ptr_prev | ptr_next | ....... | footer ]
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── consts     - compile-time layout constants
//!   ├── align      - alignment helper
//!   ├── provider   - the sbrk/arena region abstraction
//!   ├── block      - boundary-tag block encoding and accessors
//!   ├── freelist   - segregated free lists and size classification
//!   ├── engine     - malloc/free/realloc/calloc and heap growth
//!   ├── check      - heap invariant checker
//!   └── global     - thread-local default instance + GlobalAlloc adapter
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segalloc::Engine;
//! use segalloc::provider::SbrkProvider;
//!
//! let mut engine = Engine::new(SbrkProvider::default());
//! let ptr = engine.malloc(64).expect("allocation failed");
//! unsafe { ptr.as_ptr().write(42) };
//! unsafe { engine.free(Some(ptr)) };
//! ```
//!
//! Or, to use the thread-local default instance directly:
//!
//! ```rust,ignore
//! let ptr = segalloc::malloc(64).expect("allocation failed");
//! unsafe { segalloc::free(Some(ptr)) };
//! ```
//!
//! ## How It Works
//!
//! Each [`Engine`] drives a single, monotonically growable heap region
//! through a [`Provider`](provider::Provider) — `sbrk` in production, an
//! in-memory arena in tests. A fit search walks the segregated free lists
//! from the requested size's class upward, resuming each list from where the
//! last search left off; a miss extends the heap by a chunk-sized increment.
//! Freed blocks are coalesced with free neighbors before being re-filed.
//!
//! ## Limitations
//!
//! - **Single-threaded per instance**: the default global instance binds one
//!   `Engine` per thread; an `Engine` itself is `!Sync`.
//! - **No shrink-to-fit**: `realloc` never returns heap space to the
//!   provider, and never grows or shrinks a block in place.
//! - **Unix-only in production**: [`provider::SbrkProvider`] requires
//!   `libc::sbrk` (POSIX systems); [`provider::ArenaProvider`] has no such
//!   restriction and is what the test suite exercises.
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! Freeing or reallocating a pointer not obtained from the same engine, or
//! already freed, is undefined behavior — these operations are `unsafe`.

pub mod align;
mod block;
mod check;
mod consts;
pub mod engine;
mod freelist;
pub mod global;
pub mod provider;

pub use engine::Engine;
pub use global::{calloc, check_heap, free, init, malloc, realloc, SegAlloc};
