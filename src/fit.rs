//! Bounded best-fit search over the segregated lists.

use crate::{
  block::{BlockView, MIN_BLOCK_SIZE},
  extent::Extent,
  size_class::{CLASS_COUNT, SizeClassTable, class_of},
};

/// Finds the free block whose leftover after carving `size` bytes is the
/// smallest usable one.
///
/// The search starts in the native class of `size` and moves to larger
/// classes while nothing fits. A leftover must be either zero or big enough
/// to stand as a free block of its own. At most `budget` blocks are looked
/// at; when the budget runs out the best candidate so far wins.
pub(crate) fn best_fit(
  table: &SizeClassTable,
  extent: &Extent,
  size: usize,
  budget: usize,
) -> Option<BlockView> {
  let mut best: Option<(BlockView, usize)> = None;
  let mut probes = 0;

  for class in class_of(size)..CLASS_COUNT {
    for block in table.iter(extent, class) {
      if probes == budget {
        return best.map(|(block, _)| block);
      }
      probes += 1;

      let Some(leftover) = block.size().checked_sub(size) else {
        continue;
      };

      if leftover == 0 {
        return Some(block);
      }

      if leftover >= MIN_BLOCK_SIZE && best.is_none_or(|(_, tightest)| leftover < tightest) {
        best = Some((block, leftover));
      }
    }

    // Every block of a larger class is bigger than anything in this one.
    if best.is_some() {
      break;
    }
  }

  best.map(|(block, _)| block)
}
