//! Heap extension: the only place the heap asks its source for memory.

use crate::{
  ALIGNMENT, align_to,
  block::{BlockView, Header},
  error::AllocError,
  extent::{Extent, INITIAL_EXTENT},
  size_class::SizeClassTable,
  source::HeapSource,
};

/// Creates an empty heap at the current end of `source`.
///
/// The first byte is rounded up to [`ALIGNMENT`] so payloads come out
/// aligned whatever the source starts at.
pub(crate) fn format<S: HeapSource>(source: &mut S) -> Result<Extent, AllocError> {
  let brk = source.extend(0).ok_or(AllocError::SourceExhausted(0))?;
  let addr = brk.as_ptr() as usize;
  let padding = align_to!(addr, ALIGNMENT) - addr;
  let total = padding + INITIAL_EXTENT;

  let start = source.extend(total).ok_or(AllocError::SourceExhausted(total))?;

  if start != brk {
    return Err(AllocError::NonContiguous {
      expected: brk.as_ptr() as usize,
      found: start.as_ptr() as usize,
    });
  }

  // SAFETY: the source just handed over `total` bytes starting at `start`,
  // and `start + padding` is 16-byte aligned.
  let extent = unsafe { Extent::format(start.add(padding)) };

  log::debug!("heap formatted at {:p} ({padding} bytes of padding)", extent.base());

  Ok(extent)
}

/// Grows the extent by `delta` bytes, making sure the new space starts at
/// the current end.
fn grow<S: HeapSource>(
  source: &mut S,
  extent: &Extent,
  delta: usize,
) -> bool {
  let Some(base) = source.extend(delta) else {
    log::warn!("heap source refused to grow by {delta} bytes");
    return false;
  };

  if base.as_ptr() as usize != extent.end() {
    log::warn!("heap source grew at {:p}, expected {:#x}", base, extent.end());
    return false;
  }

  log::debug!("heap grew by {delta} bytes to {} bytes", extent.len() + delta);
  true
}

/// Grows a free block sitting right before the epilogue so it holds `size`
/// bytes, and hands it out allocated.
///
/// Returns `None` when the last block is allocated, already large enough
/// (best fit should have found it), or when the source cannot grow. The heap
/// is unchanged in all those cases.
pub(crate) fn extend_trailing<S: HeapSource>(
  source: &mut S,
  extent: &mut Extent,
  table: &mut SizeClassTable,
  size: usize,
) -> Option<BlockView> {
  let epilogue = extent.epilogue();

  if epilogue.is_prev_allocated() {
    return None;
  }

  let last = epilogue.previous();
  let header = last.header();

  if header.size() >= size {
    return None;
  }

  let deficit = size - header.size();

  if !grow(source, extent, deficit) {
    return None;
  }

  table.remove(extent, last);
  last.set_header(Header::allocated(size, header.is_prev_allocated()));
  extent.relocate_epilogue(deficit);

  Some(last)
}

/// Appends a fresh allocated block of `size` bytes where the epilogue is.
pub(crate) fn append<S: HeapSource>(
  source: &mut S,
  extent: &mut Extent,
  size: usize,
) -> Option<BlockView> {
  if !grow(source, extent, size) {
    return None;
  }

  let block = extent.epilogue();
  block.set_header(Header::allocated(size, block.is_prev_allocated()));
  extent.relocate_epilogue(size);

  Some(block)
}
