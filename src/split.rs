//! Carving free blocks on allocation and merging them back on release.

use crate::{
  block::{BlockView, Header, MIN_BLOCK_SIZE},
  extent::Extent,
  size_class::SizeClassTable,
};

/// Turns the free block `block` into an allocated block of `size` bytes.
///
/// A leftover of at least [`MIN_BLOCK_SIZE`] becomes a new free block right
/// after it; anything smaller stays inside the allocation.
pub(crate) fn place(
  table: &mut SizeClassTable,
  extent: &Extent,
  block: BlockView,
  size: usize,
) {
  debug_assert!(!block.is_allocated());
  debug_assert!(block.size() >= size);

  table.remove(extent, block);

  let header = block.header();
  let leftover = header.size() - size;

  if leftover >= MIN_BLOCK_SIZE {
    block.set_header(Header::allocated(size, header.is_prev_allocated()));

    let rest = block.next();
    rest.set_header(Header::free(leftover, true));
    rest.write_footer();

    table.insert(extent, rest);
  } else {
    block.set_header(header.with_allocated(true));
    block.next().set_prev_allocated(true);
  }
}

/// Frees the allocated block `block`, merges it with free neighbours and
/// files the result. Returns the block that ends up in the free list.
pub(crate) fn release(
  table: &mut SizeClassTable,
  extent: &Extent,
  block: BlockView,
) -> BlockView {
  debug_assert!(block.is_allocated(), "block {:#x} is already free", block.addr());

  block.set_header(block.header().with_allocated(false));
  block.write_footer();
  block.next().set_prev_allocated(false);

  let mut merged = block;

  if !merged.is_prev_allocated() {
    let prev = merged.previous();
    table.remove(extent, prev);

    prev.set_header(prev.header().with_size(prev.size() + merged.size()));
    prev.write_footer();
    merged = prev;
  }

  let next = merged.next();

  if !next.is_allocated() {
    table.remove(extent, next);

    let after = next.next();
    merged.set_header(merged.header().with_size(merged.size() + next.size()));
    merged.write_footer();
    after.set_prev_allocated(false);
  }

  table.insert(extent, merged);
  merged
}

#[cfg(test)]
mod tests {
  use std::ptr::NonNull;

  use super::*;
  use crate::size_class::class_of;

  #[repr(C, align(16))]
  struct Scratch([u64; 128]);

  /// A heap of back to back allocated blocks of the given sizes.
  fn allocated_blocks(
    scratch: &mut Scratch,
    sizes: &[usize],
  ) -> (Extent, Vec<BlockView>) {
    let base = NonNull::from(&mut scratch.0).cast::<u8>();
    let mut extent = unsafe { Extent::format(base) };
    let mut blocks = Vec::new();

    for &size in sizes {
      let block = extent.epilogue();
      block.set_header(Header::allocated(size, true));
      extent.relocate_epilogue(size);
      blocks.push(block);
    }

    (extent, blocks)
  }

  fn listed(
    table: &SizeClassTable,
    extent: &Extent,
  ) -> Vec<(usize, usize)> {
    (0..crate::CLASS_COUNT)
      .flat_map(|class| table.iter(extent, class).map(move |block| (class, block.size())))
      .collect()
  }

  #[test]
  fn test_release_isolated() {
    let mut scratch = Scratch([0; 128]);
    let (extent, blocks) = allocated_blocks(&mut scratch, &[48, 48, 48]);
    let mut table = SizeClassTable::new();

    let free = release(&mut table, &extent, blocks[1]);

    assert_eq!(free, blocks[1]);
    assert_eq!(free.footer_size(), 48);
    assert!(!blocks[2].is_prev_allocated());
    assert_eq!(listed(&table, &extent), vec![(1, 48)]);
  }

  #[test]
  fn test_release_merges_predecessor() {
    let mut scratch = Scratch([0; 128]);
    let (extent, blocks) = allocated_blocks(&mut scratch, &[32, 64, 48]);
    let mut table = SizeClassTable::new();

    release(&mut table, &extent, blocks[0]);
    let merged = release(&mut table, &extent, blocks[1]);

    assert_eq!(merged, blocks[0]);
    assert_eq!(merged.size(), 96);
    assert_eq!(merged.footer_size(), 96);
    assert!(merged.is_prev_allocated());
    assert!(!blocks[2].is_prev_allocated());
    assert_eq!(listed(&table, &extent), vec![(class_of(96), 96)]);
  }

  #[test]
  fn test_release_merges_successor() {
    let mut scratch = Scratch([0; 128]);
    let (extent, blocks) = allocated_blocks(&mut scratch, &[32, 64, 48]);
    let mut table = SizeClassTable::new();

    release(&mut table, &extent, blocks[1]);
    let merged = release(&mut table, &extent, blocks[0]);

    assert_eq!(merged, blocks[0]);
    assert_eq!(merged.size(), 96);
    assert!(!blocks[2].is_prev_allocated());
    assert_eq!(listed(&table, &extent), vec![(class_of(96), 96)]);
  }

  #[test]
  fn test_release_merges_both_sides() {
    let mut scratch = Scratch([0; 128]);
    let (extent, blocks) = allocated_blocks(&mut scratch, &[48, 48, 48, 32]);
    let mut table = SizeClassTable::new();

    release(&mut table, &extent, blocks[0]);
    release(&mut table, &extent, blocks[2]);
    let merged = release(&mut table, &extent, blocks[1]);

    assert_eq!(merged, blocks[0]);
    assert_eq!(merged.size(), 144);
    assert_eq!(merged.footer_size(), 144);
    assert!(!blocks[3].is_prev_allocated());
    assert_eq!(listed(&table, &extent), vec![(class_of(144), 144)]);
  }

  #[test]
  fn test_release_before_epilogue() {
    let mut scratch = Scratch([0; 128]);
    let (extent, blocks) = allocated_blocks(&mut scratch, &[64]);
    let mut table = SizeClassTable::new();

    release(&mut table, &extent, blocks[0]);

    assert!(!extent.epilogue().is_prev_allocated());
    assert!(extent.epilogue().is_allocated());
  }

  #[test]
  fn test_place_splits_large_leftover() {
    let mut scratch = Scratch([0; 128]);
    let (extent, blocks) = allocated_blocks(&mut scratch, &[160, 32]);
    let mut table = SizeClassTable::new();

    release(&mut table, &extent, blocks[0]);
    place(&mut table, &extent, blocks[0], 48);

    let rest = blocks[0].next();

    assert_eq!(blocks[0].header(), Header::allocated(48, true));
    assert_eq!(rest.header(), Header::free(112, true));
    assert_eq!(rest.footer_size(), 112);
    assert!(!blocks[1].is_prev_allocated());
    assert_eq!(listed(&table, &extent), vec![(class_of(112), 112)]);
  }

  #[test]
  fn test_place_absorbs_small_leftover() {
    let mut scratch = Scratch([0; 128]);
    let (extent, blocks) = allocated_blocks(&mut scratch, &[64, 32]);
    let mut table = SizeClassTable::new();

    release(&mut table, &extent, blocks[0]);
    place(&mut table, &extent, blocks[0], 48);

    assert_eq!(blocks[0].header(), Header::allocated(64, true));
    assert!(blocks[1].is_prev_allocated());
    assert!(listed(&table, &extent).is_empty());
  }
}
