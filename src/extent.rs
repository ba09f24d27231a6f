//! The managed extent: bounds, sentinels, and offset <-> block translation.
//!
//! ```text
//!   base                                                          end
//!    │ pad │ prologue hdr │ prologue ftr │ block … block │ epilogue │
//!    0     8             16             24                end - 8
//! ```

use std::ptr::NonNull;

use crate::block::{BlockView, HEADER_SIZE, Header, WORD_SIZE};

/// The prologue is a header and a footer with no payload.
pub const PROLOGUE_SIZE: usize = 2 * WORD_SIZE;

const PROLOGUE_OFFSET: usize = WORD_SIZE;

/// Bytes written when a heap is formatted: padding, prologue and epilogue.
pub const INITIAL_EXTENT: usize = PROLOGUE_OFFSET + PROLOGUE_SIZE + HEADER_SIZE;

/// Bounds of the heap, addressed by byte offsets from a 16-byte aligned base.
///
/// Offsets double as the free-list link encoding: no block header ever lives
/// at offset 0 (the padding word), so 0 stands for "no link".
#[derive(Debug)]
pub(crate) struct Extent {
  base: NonNull<u8>,
  epilogue: usize,
}

impl Extent {
  /// Writes the padding word, the prologue and the first epilogue.
  ///
  /// # Safety
  ///
  /// `base` must be 16-byte aligned and the first [`INITIAL_EXTENT`] bytes
  /// behind it must be writable and owned by the caller.
  pub unsafe fn format(base: NonNull<u8>) -> Self {
    debug_assert_eq!(base.as_ptr() as usize % crate::ALIGNMENT, 0);

    let prologue = Header::allocated(PROLOGUE_SIZE, true).encode();

    unsafe {
      let words = base.cast::<u64>();
      words.write(0);
      words.add(1).write(prologue);
      words.add(2).write(prologue);
    }

    let extent = Self {
      base,
      epilogue: PROLOGUE_OFFSET + PROLOGUE_SIZE,
    };
    extent.epilogue().set_header(Header::allocated(0, true));

    extent
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  /// Bytes from the base up to and including the epilogue.
  pub fn len(&self) -> usize {
    self.epilogue + HEADER_SIZE
  }

  /// One past the last byte of the extent.
  pub fn end(&self) -> usize {
    self.base.as_ptr() as usize + self.len()
  }

  pub fn contains(
    &self,
    addr: usize,
  ) -> bool {
    let base = self.base.as_ptr() as usize;
    addr >= base && addr < self.end()
  }

  pub fn block_at(
    &self,
    offset: usize,
  ) -> BlockView {
    debug_assert!(
      (PROLOGUE_OFFSET..=self.epilogue).contains(&offset),
      "offset {offset:#x} outside the heap"
    );

    // SAFETY: offsets handed out by `offset_of` address headers of this extent.
    unsafe { BlockView::from_header(self.base.add(offset)) }
  }

  pub fn offset_of(
    &self,
    block: BlockView,
  ) -> usize {
    debug_assert!(self.contains(block.addr()));

    block.addr() - self.base.as_ptr() as usize
  }

  pub fn prologue(&self) -> BlockView {
    self.block_at(PROLOGUE_OFFSET)
  }

  pub fn epilogue(&self) -> BlockView {
    self.block_at(self.epilogue)
  }

  /// Moves the epilogue `grown` bytes further and rewrites it.
  ///
  /// Both growth paths leave an allocated block right before the new
  /// epilogue, so its predecessor flag is always set here.
  pub fn relocate_epilogue(
    &mut self,
    grown: usize,
  ) {
    self.epilogue += grown;
    self.epilogue().set_header(Header::allocated(0, true));
  }

  /// Blocks in address order, sentinels excluded.
  pub fn walk(&self) -> Walk<'_> {
    Walk {
      extent: self,
      cursor: self.prologue().next(),
    }
  }
}

pub(crate) struct Walk<'a> {
  extent: &'a Extent,
  cursor: BlockView,
}

impl Iterator for Walk<'_> {
  type Item = BlockView;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.cursor;

    if block == self.extent.epilogue() || block.size() == 0 {
      return None;
    }

    self.cursor = block.next();
    Some(block)
  }
}
