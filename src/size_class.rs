//! Segregated free lists.
//!
//! ```text
//!   class   block size (bytes)
//!   0       32
//!   1       48
//!   2       64 - 127
//!   3       128 - 255
//!   ...     doubling
//!   12      65536 - 131071
//!   13      >= 131072
//! ```
//!
//! Each class heads a doubly linked list threaded through the payloads of the
//! free blocks themselves. Links are extent offsets, 0 meaning none.

use crate::{
  block::{BlockView, Link},
  extent::Extent,
};

pub const CLASS_COUNT: usize = 14;

const NIL: usize = 0;

/// Size class of a block of `size` bytes.
pub fn class_of(size: usize) -> usize {
  match size {
    0..=32 => 0,
    33..=63 => 1,
    _ => {
      let log2 = (usize::BITS - 1 - size.leading_zeros()) as usize;
      (log2 - 4).min(CLASS_COUNT - 1)
    }
  }
}

/// Heads of the fourteen free lists.
#[derive(Debug, Clone, Default)]
pub(crate) struct SizeClassTable {
  heads: [usize; CLASS_COUNT],
}

impl SizeClassTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(
    &self,
    class: usize,
  ) -> bool {
    self.heads[class] == NIL
  }

  /// Pushes a free block onto the front of its class list.
  pub fn insert(
    &mut self,
    extent: &Extent,
    block: BlockView,
  ) {
    debug_assert!(!block.is_allocated(), "inserting allocated block {:#x}", block.addr());

    let class = class_of(block.size());
    let offset = extent.offset_of(block);
    let old_head = self.heads[class];

    block.set_link(Link::Prev, NIL);
    block.set_link(Link::Next, old_head);

    if old_head != NIL {
      extent.block_at(old_head).set_link(Link::Prev, offset);
    }

    self.heads[class] = offset;
  }

  /// Unlinks a free block. Its size must not have changed since it was
  /// inserted, since the size decides which head may need repairing.
  pub fn remove(
    &mut self,
    extent: &Extent,
    block: BlockView,
  ) {
    debug_assert!(!block.is_allocated(), "removing allocated block {:#x}", block.addr());

    let class = class_of(block.size());
    let prev = block.link(Link::Prev);
    let next = block.link(Link::Next);

    if prev != NIL {
      extent.block_at(prev).set_link(Link::Next, next);
    }

    if next != NIL {
      extent.block_at(next).set_link(Link::Prev, prev);
    }

    if self.heads[class] == extent.offset_of(block) {
      self.heads[class] = next;
    }
  }

  /// Walks one class list front to back.
  pub fn iter<'a>(
    &self,
    extent: &'a Extent,
    class: usize,
  ) -> FreeListIter<'a> {
    FreeListIter {
      extent,
      cursor: self.heads[class],
    }
  }
}

pub(crate) struct FreeListIter<'a> {
  extent: &'a Extent,
  cursor: usize,
}

impl Iterator for FreeListIter<'_> {
  type Item = BlockView;

  fn next(&mut self) -> Option<Self::Item> {
    if self.cursor == NIL {
      return None;
    }

    let block = self.extent.block_at(self.cursor);
    self.cursor = block.link(Link::Next);

    Some(block)
  }
}
