use std::{
  fmt,
  panic::Location,
  ptr::{self, NonNull},
};

use crate::{
  block::{BlockView, HEADER_SIZE, MIN_BLOCK_SIZE},
  check,
  config::Config,
  error::{AllocError, HeapViolation},
  extent::Extent,
  fit, grow,
  size_class::{CLASS_COUNT, SizeClassTable, class_of},
  source::HeapSource,
  split,
};

#[cfg(unix)]
use crate::source::Sbrk;

/// Block size needed to serve a request of `size` bytes, or `None` when the
/// request cannot be represented.
fn block_size_for(size: usize) -> Option<usize> {
  let size = crate::align::checked_align(size.checked_add(HEADER_SIZE)?)?.max(MIN_BLOCK_SIZE);

  (size <= isize::MAX as usize).then_some(size)
}

/// A segregated-fit allocator over one contiguous extent.
///
/// All operations take `&mut self`; the allocator does no locking of its own
/// and is neither `Send` nor `Sync`. Wrap it in a lock to share it.
pub struct SegregatedAllocator<S: HeapSource> {
  source: S,
  extent: Extent,
  classes: SizeClassTable,
  config: Config,
}

#[cfg(unix)]
impl SegregatedAllocator<Sbrk> {
  /// An allocator growing the process program break.
  pub fn new() -> Result<Self, AllocError> {
    Self::with_source(Sbrk::new())
  }
}

impl<S: HeapSource> SegregatedAllocator<S> {
  pub fn with_source(source: S) -> Result<Self, AllocError> {
    Self::with_config(source, Config::default())
  }

  pub fn with_config(
    mut source: S,
    config: Config,
  ) -> Result<Self, AllocError> {
    let config = config.validate()?;
    let extent = grow::format(&mut source)?;

    Ok(Self {
      source,
      extent,
      classes: SizeClassTable::new(),
      config,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Returns a 16-byte aligned pointer to at least `size` bytes, or null
  /// when the heap cannot grow.
  #[track_caller]
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    let Some(block_size) = block_size_for(size) else {
      log::warn!("allocate({size}): request too large");
      return ptr::null_mut();
    };

    let block = match fit::best_fit(&self.classes, &self.extent, block_size, self.config.probe_budget) {
      Some(block) => {
        split::place(&mut self.classes, &self.extent, block, block_size);
        block
      }
      None => {
        let grown = grow::extend_trailing(&mut self.source, &mut self.extent, &mut self.classes, block_size)
          .or_else(|| grow::append(&mut self.source, &mut self.extent, block_size));

        match grown {
          Some(block) => block,
          None => {
            log::warn!("allocate({size}): out of memory");
            return ptr::null_mut();
          }
        }
      }
    };

    let payload = block.payload().as_ptr();

    log::trace!("allocate({size}) -> {payload:p} (block of {})", block.size());
    self.debug_check(Location::caller());

    payload
  }

  /// Returns a block obtained from this allocator. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by `allocate`, `resize`
  /// or `allocate_zeroed` on this allocator, and must not be used again.
  #[track_caller]
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(payload) = NonNull::new(ptr) else {
      return;
    };

    debug_assert!(self.extent.contains(payload.as_ptr() as usize), "{payload:p} is not in this heap");

    // SAFETY: the caller vouches for `ptr` being a live allocation.
    let block = unsafe { BlockView::from_payload(payload) };
    let merged = split::release(&mut self.classes, &self.extent, block);

    log::trace!("release({ptr:p}) -> free block of {}", merged.size());
    self.debug_check(Location::caller());
  }

  /// Moves an allocation into a block of `size` bytes, keeping the first
  /// `min(old, size)` bytes.
  ///
  /// A null `ptr` allocates; a zero `size` releases and returns null. The new
  /// block is obtained before the old one is released, so on failure null is
  /// returned and `ptr` is still valid.
  ///
  /// # Safety
  ///
  /// Same as [`release`](Self::release) for non-null `ptr`.
  #[track_caller]
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    let Some(old) = NonNull::new(ptr) else {
      return self.allocate(size);
    };

    if size == 0 {
      // SAFETY: forwarded caller contract.
      unsafe { self.release(ptr) };
      return ptr::null_mut();
    }

    // SAFETY: the caller vouches for `ptr` being a live allocation.
    let old_size = unsafe { BlockView::from_payload(old) }.payload_size();

    let new = self.allocate(size);
    if new.is_null() {
      return new;
    }

    // SAFETY: both blocks are live and distinct, and each is at least as
    // large as the copied span.
    unsafe {
      ptr::copy_nonoverlapping(old.as_ptr(), new, old_size.min(size));
      self.release(ptr);
    }

    log::trace!("resize({ptr:p}, {size}) -> {new:p}");

    new
  }

  /// Allocates `count * size` zeroed bytes. Null on overflow or when the
  /// heap cannot grow.
  #[track_caller]
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
      log::warn!("allocate_zeroed({count}, {size}): size overflows");
      return ptr::null_mut();
    };

    let ptr = self.allocate(total);

    if !ptr.is_null() {
      // SAFETY: the block holds at least `total` bytes.
      unsafe { ptr::write_bytes(ptr, 0, total) };
    }

    ptr
  }

  /// Payload capacity of a live allocation, which may exceed the size it
  /// was requested with.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { BlockView::from_payload(ptr) }.payload_size()
  }

  /// Checks every structural invariant of the heap without changing it.
  pub fn check(&self) -> Result<(), HeapViolation> {
    check::verify(
      &self.extent,
      &self.classes,
      self.source.lowest_valid_address() as usize,
      self.source.highest_valid_address() as usize,
    )
  }

  #[inline]
  fn debug_check(
    &self,
    origin: &'static Location<'static>,
  ) {
    if !cfg!(debug_assertions) || !self.config.check_heap {
      return;
    }

    if let Err(violation) = self.check() {
      log::error!("heap check failed after call at {origin}: {violation}");
      panic!("heap invariant violated at {:#x} (call at {origin}): {violation}", violation.addr());
    }
  }

  /// Every block between the sentinels, in address order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.extent.walk().map(|block| BlockInfo::new(&self.extent, block))
  }

  /// The free list of one size class, front to back.
  ///
  /// # Panics
  ///
  /// Panics if `class` is not below [`CLASS_COUNT`](crate::CLASS_COUNT).
  pub fn free_list(
    &self,
    class: usize,
  ) -> impl Iterator<Item = BlockInfo> + '_ {
    assert!(class < CLASS_COUNT, "size class {class} does not exist");

    self
      .classes
      .iter(&self.extent, class)
      .map(|block| BlockInfo::new(&self.extent, block))
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.extent.len(),
      ..HeapStats::default()
    };

    for block in self.blocks() {
      if block.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += block.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += block.size;
        stats.largest_free = stats.largest_free.max(block.size);
      }
    }

    stats
  }

  /// A printable map of the heap and of the non-empty free lists.
  pub fn dump(&self) -> HeapDump<'_, S> {
    HeapDump { heap: self }
  }
}

/// One block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Header offset from the (aligned) start of the heap.
  pub offset: usize,
  pub payload: NonNull<u8>,
  /// Whole block, header included.
  pub size: usize,
  pub allocated: bool,
  pub predecessor_allocated: bool,
}

impl BlockInfo {
  fn new(
    extent: &Extent,
    block: BlockView,
  ) -> Self {
    let header = block.header();

    Self {
      offset: extent.offset_of(block),
      payload: block.payload(),
      size: header.size(),
      allocated: header.is_allocated(),
      predecessor_allocated: header.is_prev_allocated(),
    }
  }

  pub fn class(&self) -> usize {
    class_of(self.size)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes from the aligned start of the heap through the epilogue.
  pub heap_size: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

pub struct HeapDump<'a, S: HeapSource> {
  heap: &'a SegregatedAllocator<S>,
}

impl<S: HeapSource> fmt::Display for HeapDump<'_, S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let extent = &self.heap.extent;

    writeln!(f, "heap at {:p}, {} bytes", extent.base(), extent.len())?;
    writeln!(f, "  prologue  @{:#06x}", extent.offset_of(extent.prologue()))?;

    for block in self.heap.blocks() {
      writeln!(
        f,
        "  {:<9} @{:#06x} size {:>8}{}",
        if block.allocated { "allocated" } else { "free" },
        block.offset,
        block.size,
        if block.predecessor_allocated { "" } else { "  (prev free)" },
      )?;
    }

    writeln!(f, "  epilogue  @{:#06x}", extent.offset_of(extent.epilogue()))?;

    for class in (0..CLASS_COUNT).filter(|&class| !self.heap.classes.is_empty(class)) {
      let offsets: Vec<String> = self
        .heap
        .free_list(class)
        .map(|block| format!("{:#x}", block.offset))
        .collect();

      writeln!(f, "  class {class:>2}: {}", offsets.join(" -> "))?;
    }

    Ok(())
  }
}
