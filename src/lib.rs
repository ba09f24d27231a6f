//! # segalloc - A Segregated-Fit Heap Allocator
//!
//! This crate provides a **segregated free list** allocator that manages one
//! contiguous, growable heap extent, the way a classic `malloc` sits on top
//! of `sbrk`.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌─────┬──────────┬────────┬──────────────┬────────┬──────────┬──────────┐
//!   │ pad │ prologue │ alloc  │     free     │ alloc  │   free   │ epilogue │
//!   └─────┴──────────┴────────┴──────────────┴────────┴──────────┴──────────┘
//!                                    ▲                     ▲          ▲
//!                                    │                     │          │
//!                              class 4 list          class 2 list   heap end
//!                                                                 (grows →)
//! ```
//!
//! Free blocks are kept in 14 size classes (32, 48, then power-of-two ranges
//! up to "131072 and more"), each a doubly linked list threaded through the
//! free blocks themselves. Allocation runs a bounded best-fit search over the
//! native class and the larger ones, splits off any usable leftover, and
//! only grows the heap when nothing fits, preferring to stretch a free block
//! sitting at the end of the heap over appending a new one. Release merges
//! the block with free neighbours right away, so no two free blocks ever
//! touch.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Header codec and BlockView (internal)
//!   ├── size_class - Class table and intrusive free lists (internal)
//!   ├── extent     - Heap bounds and sentinels (internal)
//!   ├── fit        - Bounded best-fit search (internal)
//!   ├── split      - Splitting and coalescing (internal)
//!   ├── grow       - Heap extension (internal)
//!   ├── check      - Invariant checker (internal)
//!   ├── source     - HeapSource trait, Sbrk and Region
//!   ├── config     - Config
//!   ├── error      - AllocError, HeapViolation
//!   └── allocator  - SegregatedAllocator
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Region, SegregatedAllocator};
//!
//! let mut allocator = SegregatedAllocator::with_source(Region::new(1 << 20)?)?;
//!
//! let ptr = allocator.allocate(64) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//!
//!     allocator.release(ptr as *mut u8);
//! }
//!
//! assert!(allocator.check().is_ok());
//! # Ok::<(), segalloc::AllocError>(())
//! ```
//!
//! ## Blocks
//!
//! ```text
//!   Allocated block:                      Free block:
//!   ┌────────────┬───────────────────┐    ┌────────┬──────┬──────┬─────┬────────┐
//!   │ header     │ payload           │    │ header │ prev │ next │ ... │ footer │
//!   │ size|p|a   │ (caller's bytes)  │    │ size|p │      │      │     │ size   │
//!   └────────────┴───────────────────┘    └────────┴──────┴──────┴─────┴────────┘
//!     8 bytes    ▲                          8        8      8             8
//!                └── 16-byte aligned pointer returned to the caller
//!
//!   a = this block is allocated, p = the block before it is allocated
//! ```
//!
//! Allocated blocks carry no footer. The `p` bit in the next header says
//! whether the previous block is allocated, so the footer (needed only to
//! walk backwards into a free neighbour) is only written on free blocks.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization, `&mut self` everywhere
//! - **Never shrinks**: memory goes back to the heap, not to the source
//! - **One extent per allocator**: a second allocator on `Sbrk` stops
//!   growing as soon as the other one moves the break
//!
//! ## Safety
//!
//! Releasing or resizing a pointer that did not come from the same
//! allocator, or using it after release, is undefined behavior. Those entry
//! points are `unsafe fn`. Debug builds run the invariant checker after
//! every operation (see [`Config::check_heap`]) and stop at the first
//! corruption.

pub mod align;
mod allocator;
mod block;
mod check;
mod config;
mod error;
mod extent;
mod fit;
mod grow;
mod size_class;
mod source;
mod split;

pub use allocator::{BlockInfo, HeapDump, HeapStats, SegregatedAllocator};
pub use block::{ALIGNMENT, HEADER_SIZE, Header, MIN_BLOCK_SIZE};
pub use config::{Config, DEFAULT_PROBE_BUDGET};
pub use error::{AllocError, HeapViolation};
pub use size_class::{CLASS_COUNT, class_of};
#[cfg(unix)]
pub use source::Sbrk;
pub use source::{HeapSource, Region};
