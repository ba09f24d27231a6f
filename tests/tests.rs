use std::ptr::{self, NonNull};

use segalloc::{
  ALIGNMENT, AllocError, Config, HeapSource, HeapViolation, Region, SegregatedAllocator, class_of,
};

/// A region that records every growth request.
struct Counting {
  region: Region,
  calls: Vec<usize>,
}

impl Counting {
  fn new(capacity: usize) -> Self {
    Self {
      region: Region::new(capacity).unwrap(),
      calls: Vec::new(),
    }
  }
}

unsafe impl HeapSource for Counting {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Option<NonNull<u8>> {
    self.calls.push(delta);
    self.region.extend(delta)
  }

  fn lowest_valid_address(&self) -> *const u8 {
    self.region.lowest_valid_address()
  }

  fn highest_valid_address(&self) -> *const u8 {
    self.region.highest_valid_address()
  }
}

fn heap(capacity: usize) -> SegregatedAllocator<Region> {
  SegregatedAllocator::with_source(Region::new(capacity).unwrap()).unwrap()
}

fn counting_heap(capacity: usize) -> SegregatedAllocator<Counting> {
  SegregatedAllocator::with_source(Counting::new(capacity)).unwrap()
}

fn calls_after_setup(allocator: &SegregatedAllocator<Counting>) -> &[usize] {
  // probe + initial prologue/epilogue
  &allocator.source().calls[2..]
}

#[test]
fn hello_alloc() {
  let mut allocator = heap(1 << 16);
  let ptr = allocator.allocate(11);

  assert!(!ptr.is_null());

  unsafe { ptr::copy_nonoverlapping(b"Hello Alloc".as_ptr(), ptr, 11) };

  assert_eq!(unsafe { std::slice::from_raw_parts(ptr, 11) }, b"Hello Alloc");
}

#[test]
fn payloads_are_aligned() {
  let mut allocator = heap(1 << 20);

  for size in 1..=600 {
    let ptr = allocator.allocate(size);

    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % ALIGNMENT, 0, "allocate({size}) -> {ptr:p}");
  }
}

#[test]
fn writes_survive_until_release() {
  let mut allocator = heap(1 << 20);
  let mut live = Vec::new();

  for i in 0..64u8 {
    let size = 16 + i as usize * 7;
    let ptr = allocator.allocate(size);
    unsafe { ptr::write_bytes(ptr, i, size) };
    live.push((ptr, size, i));
  }

  // free every other block so neighbours get split and merged around the rest
  for (ptr, _, _) in live.iter().step_by(2) {
    unsafe { allocator.release(*ptr) };
  }

  for i in 0..32 {
    allocator.allocate(24 + i * 11);
  }

  for (ptr, size, fill) in live.iter().skip(1).step_by(2) {
    let bytes = unsafe { std::slice::from_raw_parts(*ptr, *size) };
    assert!(bytes.iter().all(|b| b == fill));
  }

  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn reuses_freed_block() {
  let mut allocator = heap(1 << 16);

  let a = allocator.allocate(40);
  let _b = allocator.allocate(40);
  unsafe { allocator.release(a) };
  let c = allocator.allocate(40);

  assert_eq!(c, a);
}

#[test]
fn reuse_does_not_grow_heap() {
  let mut allocator = counting_heap(1 << 16);

  let a = allocator.allocate(40);
  let _b = allocator.allocate(40);
  unsafe { allocator.release(a) };
  allocator.allocate(40);

  assert_eq!(calls_after_setup(&allocator), &[48, 48]);
}

#[test]
fn coalesces_three_neighbours() {
  let mut allocator = heap(1 << 16);

  let first = allocator.allocate(100);
  let second = allocator.allocate(100);
  let third = allocator.allocate(100);
  let _guard = allocator.allocate(100);

  unsafe {
    allocator.release(first);
    allocator.release(third);

    assert_eq!(allocator.blocks().filter(|b| !b.allocated).count(), 2);

    allocator.release(second);
  }

  let free: Vec<_> = allocator.blocks().filter(|b| !b.allocated).collect();

  assert_eq!(free.len(), 1);
  assert_eq!(free[0].size, 3 * 112);
  assert_eq!(free[0].payload.as_ptr(), first);

  let class = class_of(3 * 112);
  let listed: Vec<_> = allocator.free_list(class).collect();

  assert_eq!(listed, free);
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn coalesces_into_trailing_block() {
  let mut allocator = heap(1 << 16);

  let a = allocator.allocate(32);
  let b = allocator.allocate(32);

  unsafe {
    allocator.release(b);
    allocator.release(a);
  }

  let blocks: Vec<_> = allocator.blocks().collect();

  assert_eq!(blocks.len(), 1);
  assert!(!blocks[0].allocated);
  assert_eq!(blocks[0].size, 96);
}

#[test]
fn large_request_grows_once() {
  let mut allocator = counting_heap(4 << 20);

  let ptr = allocator.allocate(1_000_000);

  assert!(!ptr.is_null());
  assert_eq!(calls_after_setup(&allocator), &[1_000_016]);
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn trailing_free_block_is_extended_in_place() {
  let mut allocator = counting_heap(1 << 16);

  let _a = allocator.allocate(100);
  let b = allocator.allocate(100);
  unsafe { allocator.release(b) };

  let c = allocator.allocate(1000);

  assert_eq!(c, b);
  // 112 + 112 for the first two blocks, then 1008 - 112 for the deficit
  assert_eq!(calls_after_setup(&allocator), &[112, 112, 896]);
  assert!(allocator.blocks().all(|block| block.allocated));
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn splits_large_free_block() {
  let mut allocator = heap(1 << 16);

  let big = allocator.allocate(1000);
  let _guard = allocator.allocate(16);
  unsafe { allocator.release(big) };

  let small = allocator.allocate(40);

  assert_eq!(small, big);

  let blocks: Vec<_> = allocator.blocks().collect();

  assert_eq!(blocks[0].size, 48);
  assert!(blocks[0].allocated);
  assert_eq!(blocks[1].size, 1008 - 48);
  assert!(!blocks[1].allocated);
  assert!(blocks[1].predecessor_allocated);
  assert!(!blocks[2].predecessor_allocated);
}

#[test]
fn out_of_memory_returns_null() {
  let mut allocator = heap(1024);

  assert!(allocator.allocate(4096).is_null());
  assert!(allocator.allocate(usize::MAX).is_null());
  assert!(allocator.allocate_zeroed(usize::MAX, 2).is_null());

  // the heap is still usable afterwards
  let ptr = allocator.allocate(64);

  assert!(!ptr.is_null());
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn allocate_zeroed_out_of_memory_returns_null() {
  let mut allocator = heap(1024);
  let _kept = allocator.allocate(100);
  let before = allocator.stats();

  assert!(allocator.allocate_zeroed(64, 64).is_null());
  assert_eq!(allocator.check(), Ok(()));
  assert_eq!(allocator.stats(), before);
}

#[test]
fn resize_null_allocates() {
  let mut allocator = heap(1 << 16);

  let ptr = unsafe { allocator.resize(ptr::null_mut(), 40) };

  assert!(!ptr.is_null());
  assert_eq!(allocator.blocks().count(), 1);
  assert_eq!(allocator.blocks().next().unwrap().size, 48);
}

#[test]
fn resize_to_zero_releases() {
  let mut allocator = heap(1 << 16);

  let ptr = allocator.allocate(40);
  let resized = unsafe { allocator.resize(ptr, 0) };

  assert!(resized.is_null());
  assert!(allocator.blocks().all(|block| !block.allocated));
}

#[test]
fn resize_keeps_contents() {
  let mut allocator = heap(1 << 16);

  let ptr = allocator.allocate(64);
  for i in 0..64 {
    unsafe { *ptr.add(i) = i as u8 };
  }

  let grown = unsafe { allocator.resize(ptr, 500) };
  let grown_bytes = unsafe { std::slice::from_raw_parts(grown, 64) };

  assert!(grown_bytes.iter().enumerate().all(|(i, &b)| b == i as u8));

  let shrunk = unsafe { allocator.resize(grown, 10) };
  let shrunk_bytes = unsafe { std::slice::from_raw_parts(shrunk, 10) };

  assert!(shrunk_bytes.iter().enumerate().all(|(i, &b)| b == i as u8));
  assert_eq!(allocator.stats().allocated_blocks, 1);
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn failed_resize_keeps_original() {
  let mut allocator = heap(512);

  let ptr = allocator.allocate(100);
  unsafe { ptr::write_bytes(ptr, 0xAB, 100) };

  let resized = unsafe { allocator.resize(ptr, 10_000) };

  assert!(resized.is_null());

  let bytes = unsafe { std::slice::from_raw_parts(ptr, 100) };

  assert!(bytes.iter().all(|&b| b == 0xAB));
  assert_eq!(allocator.stats().allocated_blocks, 1);
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn allocate_zeroed_clears_reused_memory() {
  let mut allocator = heap(1 << 16);

  let dirty = allocator.allocate(256);
  unsafe { ptr::write_bytes(dirty, 0xFF, 256) };
  unsafe { allocator.release(dirty) };

  let zeroed = allocator.allocate_zeroed(16, 16);

  assert_eq!(zeroed, dirty);

  let bytes = unsafe { std::slice::from_raw_parts(zeroed, 256) };

  assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn small_probe_budget_still_allocates() {
  let config = Config::new().probe_budget(1);
  let mut allocator = SegregatedAllocator::with_config(Region::new(1 << 16).unwrap(), config).unwrap();

  let mut ptrs = Vec::new();
  for _ in 0..16 {
    ptrs.push(allocator.allocate(100));
    allocator.allocate(16);
  }
  for ptr in ptrs {
    unsafe { allocator.release(ptr) };
  }

  assert!(!allocator.allocate(50).is_null());
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn two_heaps_are_independent() {
  let mut first = heap(1 << 16);
  let mut second = heap(1 << 16);

  let a = first.allocate(64);
  let b = second.allocate(64);

  unsafe { first.release(a) };

  assert_eq!(first.stats().free_blocks, 1);
  assert_eq!(second.stats().allocated_blocks, 1);
  assert_ne!(a, b);
}

#[test]
fn setup_fails_on_tiny_region() {
  let result = SegregatedAllocator::with_source(Region::new(16).unwrap());

  assert!(matches!(result, Err(AllocError::SourceExhausted(_))));
}

#[test]
fn violation_reports_address() {
  let violation = HeapViolation::Unlisted { addr: 0x1000 };

  assert_eq!(violation.addr(), 0x1000);
  assert_eq!(violation.to_string(), "free block 0x1000 is not linked in any size class");
}

#[test]
#[should_panic(expected = "heap invariant violated")]
#[cfg(debug_assertions)]
fn corruption_halts_in_debug_builds() {
  let mut allocator = heap(1 << 16);

  let a = allocator.allocate(40);
  let _b = allocator.allocate(40);

  // clear the predecessor bit in the header of the block after `a`
  unsafe { *(a.add(40) as *mut u64) = 0x30 | 0b01 };

  allocator.allocate(16);
}

#[cfg(unix)]
#[test]
fn sbrk_heap() {
  // the program break is shared with the rest of the process, so growth may
  // legitimately fail if something else moved it
  let Ok(mut allocator) = segalloc::SegregatedAllocator::new() else {
    return;
  };

  let ptr = allocator.allocate(128);

  if !ptr.is_null() {
    assert_eq!(ptr as usize % ALIGNMENT, 0);
    unsafe { allocator.release(ptr) };
  }

  assert_eq!(allocator.check(), Ok(()));
}
