use std::alloc::LayoutError;

use thiserror::Error;

/// Failures while setting up a heap.
///
/// Once a heap exists, running out of memory is reported by a null pointer
/// instead.
#[derive(Debug, Error)]
pub enum AllocError {
  #[error("heap source could not provide {0} bytes")]
  SourceExhausted(usize),

  #[error("heap source returned {found:#x}, expected the range to continue at {expected:#x}")]
  NonContiguous { expected: usize, found: usize },

  #[error("invalid region layout")]
  Layout(#[from] LayoutError),

  #[error("invalid configuration: {0}")]
  InvalidConfig(&'static str),
}

/// A broken heap invariant, found by the checker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapViolation {
  #[error("prologue at {addr:#x} is damaged")]
  BadPrologue { addr: usize },

  #[error("epilogue at {addr:#x} is damaged or not at the end of the heap (end {end:#x})")]
  BadEpilogue { addr: usize, end: usize },

  #[error("block {addr:#x} lies outside the heap [{low:#x}, {high:#x}]")]
  OutOfBounds { addr: usize, low: usize, high: usize },

  #[error("payload of block {addr:#x} is not 16-byte aligned")]
  Misaligned { addr: usize },

  #[error("block {addr:#x} has invalid size {size}")]
  BadSize { addr: usize, size: usize },

  #[error("free block {addr:#x} has header size {header} but footer size {footer}")]
  FooterMismatch { addr: usize, header: usize, footer: usize },

  #[error("block {addr:#x} says its predecessor is {} but it is not", state(.flag))]
  StalePredecessorFlag { addr: usize, flag: bool },

  #[error("free block {addr:#x} follows another free block")]
  Uncoalesced { addr: usize },

  #[error("allocated block {addr:#x} is linked in size class {class}")]
  AllocatedInFreeList { addr: usize, class: usize },

  #[error("free block {addr:#x} of size {size} is linked in class {class}")]
  WrongClass { addr: usize, size: usize, class: usize },

  #[error("free list link at {addr:#x} is inconsistent")]
  BrokenLink { addr: usize },

  #[error("free block {addr:#x} is not linked in any size class")]
  Unlisted { addr: usize },
}

fn state(allocated: &bool) -> &'static str {
  if *allocated { "allocated" } else { "free" }
}

impl HeapViolation {
  /// Address of the block the violation was found at.
  pub fn addr(&self) -> usize {
    match *self {
      HeapViolation::BadPrologue { addr }
      | HeapViolation::BadEpilogue { addr, .. }
      | HeapViolation::OutOfBounds { addr, .. }
      | HeapViolation::Misaligned { addr }
      | HeapViolation::BadSize { addr, .. }
      | HeapViolation::FooterMismatch { addr, .. }
      | HeapViolation::StalePredecessorFlag { addr, .. }
      | HeapViolation::Uncoalesced { addr }
      | HeapViolation::AllocatedInFreeList { addr, .. }
      | HeapViolation::WrongClass { addr, .. }
      | HeapViolation::BrokenLink { addr }
      | HeapViolation::Unlisted { addr } => addr,
    }
  }
}
