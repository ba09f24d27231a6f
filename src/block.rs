//! Block header codec and the `BlockView` through which all address
//! arithmetic on the heap goes.
//!
//! ```text
//!   free block:       | header | prev_free | next_free | ........ | footer |
//!   allocated block:  | header | payload ................................ |
//!                     ^        ^
//!                     |        └── payload, 16-byte aligned
//!                     └── header, 8 mod 16
//! ```

use std::{mem, ptr::NonNull};

/// Alignment of every payload and granularity of every block size.
pub const ALIGNMENT: usize = 16;

/// Size of one heap word (headers, footers and links are one word each).
pub const WORD_SIZE: usize = mem::size_of::<u64>();

pub const HEADER_SIZE: usize = WORD_SIZE;
pub const FOOTER_SIZE: usize = WORD_SIZE;

/// Header, two links and a footer: the smallest block that can be free.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + 2 * WORD_SIZE + FOOTER_SIZE;

const ALLOCATED_BIT: u64 = 0b01;
const PREV_ALLOCATED_BIT: u64 = 0b10;
const SIZE_MASK: u64 = !(ALIGNMENT as u64 - 1);

/// Decoded form of a header word.
///
/// The size occupies the word above the low four bits (sizes are multiples of
/// 16), bit 0 is the allocated flag and bit 1 records whether the block
/// physically before this one is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  size: usize,
  allocated: bool,
  prev_allocated: bool,
}

impl Header {
  pub fn new(
    size: usize,
    allocated: bool,
    prev_allocated: bool,
  ) -> Self {
    debug_assert_eq!(size % ALIGNMENT, 0, "block size {size} is not 16-byte aligned");

    Self {
      size,
      allocated,
      prev_allocated,
    }
  }

  pub fn allocated(
    size: usize,
    prev_allocated: bool,
  ) -> Self {
    Self::new(size, true, prev_allocated)
  }

  pub fn free(
    size: usize,
    prev_allocated: bool,
  ) -> Self {
    Self::new(size, false, prev_allocated)
  }

  pub fn size(self) -> usize {
    self.size
  }

  pub fn is_allocated(self) -> bool {
    self.allocated
  }

  pub fn is_prev_allocated(self) -> bool {
    self.prev_allocated
  }

  pub fn with_size(
    self,
    size: usize,
  ) -> Self {
    Self::new(size, self.allocated, self.prev_allocated)
  }

  pub fn with_allocated(
    self,
    allocated: bool,
  ) -> Self {
    Self { allocated, ..self }
  }

  pub fn with_prev_allocated(
    self,
    prev_allocated: bool,
  ) -> Self {
    Self { prev_allocated, ..self }
  }

  pub fn encode(self) -> u64 {
    let mut word = self.size as u64 & SIZE_MASK;

    if self.allocated {
      word |= ALLOCATED_BIT;
    }
    if self.prev_allocated {
      word |= PREV_ALLOCATED_BIT;
    }

    word
  }

  pub fn decode(word: u64) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOCATED_BIT != 0,
      prev_allocated: word & PREV_ALLOCATED_BIT != 0,
    }
  }
}

/// The two intrusive link slots of a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
  Prev,
  Next,
}

impl Link {
  fn word(self) -> usize {
    match self {
      Link::Prev => 1,
      Link::Next => 2,
    }
  }
}

/// A handle on the header word of one block inside the managed extent.
///
/// Every `BlockView` points at a header the allocator wrote itself, so the
/// accessors below are safe to call as long as the allocator that produced
/// the view is alive and has not handed the block back to a caller in a way
/// that invalidates it (merging, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockView {
  header: NonNull<u64>,
}

impl BlockView {
  /// # Safety
  ///
  /// `header` must address a header word inside a managed extent.
  pub unsafe fn from_header(header: NonNull<u8>) -> Self {
    debug_assert_eq!(header.as_ptr() as usize % WORD_SIZE, 0);

    Self { header: header.cast() }
  }

  /// # Safety
  ///
  /// `payload` must be a pointer previously returned by
  /// [`BlockView::payload`] on a block of the same extent.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    unsafe { Self::from_header(payload.sub(HEADER_SIZE)) }
  }

  pub fn addr(self) -> usize {
    self.header.as_ptr() as usize
  }

  pub fn header(self) -> Header {
    // SAFETY: a view always addresses a live header word.
    Header::decode(unsafe { self.header.read() })
  }

  pub fn set_header(
    self,
    header: Header,
  ) {
    // SAFETY: a view always addresses a live header word.
    unsafe { self.header.write(header.encode()) }
  }

  pub fn size(self) -> usize {
    self.header().size()
  }

  pub fn is_allocated(self) -> bool {
    self.header().is_allocated()
  }

  pub fn is_prev_allocated(self) -> bool {
    self.header().is_prev_allocated()
  }

  pub fn set_prev_allocated(
    self,
    prev_allocated: bool,
  ) {
    self.set_header(self.header().with_prev_allocated(prev_allocated));
  }

  fn footer_word(self) -> NonNull<u64> {
    // SAFETY: the last word of a block lies inside the block.
    unsafe { self.header.byte_add(self.size() - FOOTER_SIZE) }
  }

  /// Size recorded in the footer. Only meaningful on free blocks.
  pub fn footer_size(self) -> usize {
    debug_assert!(!self.is_allocated(), "allocated block {:#x} has no footer", self.addr());

    // SAFETY: free blocks are at least MIN_BLOCK_SIZE, so the footer does not
    // overlap the header.
    Header::decode(unsafe { self.footer_word().read() }).size()
  }

  /// Copies the header size into the footer.
  pub fn write_footer(self) {
    let size = self.size();

    debug_assert!(size >= MIN_BLOCK_SIZE);

    // SAFETY: see `footer_size`.
    unsafe { self.footer_word().write(Header::free(size, false).encode()) }
  }

  /// The block physically after this one.
  pub fn next(self) -> BlockView {
    // SAFETY: every block is followed by another block or the epilogue.
    Self {
      header: unsafe { self.header.byte_add(self.size()) },
    }
  }

  /// The block physically before this one, found through its footer.
  ///
  /// Only free blocks carry footers, so this is only legal when the
  /// predecessor-allocated flag is clear.
  pub fn previous(self) -> BlockView {
    debug_assert!(!self.is_prev_allocated(), "block {:#x} has an allocated predecessor", self.addr());

    // SAFETY: the word before a header is the predecessor's footer when the
    // predecessor is free.
    unsafe {
      let footer = self.header.sub(1);
      let size = Header::decode(footer.read()).size();

      Self {
        header: self.header.byte_sub(size),
      }
    }
  }

  pub fn payload(self) -> NonNull<u8> {
    // SAFETY: the payload starts right after the header.
    unsafe { self.header.cast::<u8>().add(HEADER_SIZE) }
  }

  /// Bytes available to the caller when the block is allocated.
  pub fn payload_size(self) -> usize {
    self.size() - HEADER_SIZE
  }

  pub fn link(
    self,
    link: Link,
  ) -> usize {
    // SAFETY: link slots sit inside the payload, which every block but the
    // sentinels has.
    unsafe { self.header.add(link.word()).read() as usize }
  }

  pub fn set_link(
    self,
    link: Link,
    offset: usize,
  ) {
    debug_assert!(!self.is_allocated());

    // SAFETY: see `link`.
    unsafe { self.header.add(link.word()).write(offset as u64) }
  }
}
