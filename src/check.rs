//! Read-only heap consistency checker.

use std::collections::HashSet;

use crate::{
  ALIGNMENT,
  block::{BlockView, HEADER_SIZE, Header, Link, MIN_BLOCK_SIZE},
  error::HeapViolation,
  extent::{Extent, PROLOGUE_SIZE},
  size_class::{CLASS_COUNT, SizeClassTable, class_of},
};

/// Walks the heap from prologue to epilogue, then every free list, and
/// reports the first broken invariant.
///
/// `low` and `high` are the first and last valid bytes of the source.
pub(crate) fn verify(
  extent: &Extent,
  table: &SizeClassTable,
  low: usize,
  high: usize,
) -> Result<(), HeapViolation> {
  let prologue = extent.prologue();

  if prologue.header() != Header::allocated(PROLOGUE_SIZE, true) {
    return Err(HeapViolation::BadPrologue { addr: prologue.addr() });
  }

  let free = walk(extent, low, high)?;
  let listed = lists(extent, table, free.len())?;

  if let Some(&addr) = free.iter().find(|addr| !listed.contains(addr)) {
    return Err(HeapViolation::Unlisted { addr });
  }

  Ok(())
}

/// Physical walk. Returns the addresses of all free blocks.
fn walk(
  extent: &Extent,
  low: usize,
  high: usize,
) -> Result<HashSet<usize>, HeapViolation> {
  let epilogue = extent.epilogue();
  let mut free = HashSet::new();
  let mut prev_allocated = true;
  let mut block = extent.prologue().next();

  while block != epilogue {
    let addr = block.addr();

    if addr < low || addr + HEADER_SIZE > high + 1 || addr > epilogue.addr() {
      return Err(HeapViolation::OutOfBounds { addr, low, high });
    }

    if block.payload().as_ptr() as usize % ALIGNMENT != 0 {
      return Err(HeapViolation::Misaligned { addr });
    }

    let header = block.header();
    let size = header.size();

    if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 || addr + size > epilogue.addr() {
      return Err(HeapViolation::BadSize { addr, size });
    }

    if header.is_prev_allocated() != prev_allocated {
      return Err(HeapViolation::StalePredecessorFlag {
        addr,
        flag: header.is_prev_allocated(),
      });
    }

    if !header.is_allocated() {
      if !prev_allocated {
        return Err(HeapViolation::Uncoalesced { addr });
      }

      let footer = block.footer_size();
      if footer != size {
        return Err(HeapViolation::FooterMismatch {
          addr,
          header: size,
          footer,
        });
      }

      free.insert(addr);
    }

    prev_allocated = header.is_allocated();
    block = block.next();
  }

  let header = epilogue.header();
  let end = extent.end();

  if header.size() != 0 || !header.is_allocated() || end != high + 1 {
    return Err(HeapViolation::BadEpilogue {
      addr: epilogue.addr(),
      end: high + 1,
    });
  }

  if header.is_prev_allocated() != prev_allocated {
    return Err(HeapViolation::StalePredecessorFlag {
      addr: epilogue.addr(),
      flag: header.is_prev_allocated(),
    });
  }

  Ok(free)
}

/// Free-list walk. Returns the addresses of all listed blocks.
///
/// `free_count` bounds how many blocks the lists can hold, which keeps a
/// corrupted (cyclic) list from looping forever.
fn lists(
  extent: &Extent,
  table: &SizeClassTable,
  free_count: usize,
) -> Result<HashSet<usize>, HeapViolation> {
  let mut listed = HashSet::new();

  for class in 0..CLASS_COUNT {
    let mut prev: Option<BlockView> = None;

    for block in table.iter(extent, class) {
      let addr = block.addr();

      if !extent.contains(addr) {
        return Err(HeapViolation::OutOfBounds {
          addr,
          low: extent.base().as_ptr() as usize,
          high: extent.end() - 1,
        });
      }

      if block.is_allocated() {
        return Err(HeapViolation::AllocatedInFreeList { addr, class });
      }

      if class_of(block.size()) != class {
        return Err(HeapViolation::WrongClass {
          addr,
          size: block.size(),
          class,
        });
      }

      let back = block.link(Link::Prev);
      let expected = prev.map_or(0, |prev| extent.offset_of(prev));

      if back != expected || !listed.insert(addr) || listed.len() > free_count {
        return Err(HeapViolation::BrokenLink { addr });
      }

      prev = Some(block);
    }
  }

  Ok(listed)
}
