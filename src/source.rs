//! Where heap memory comes from.
//!
//! ```text
//!   Sbrk                               Region
//!   ┌────────────────┬─────────┐       ┌────────────────┬──────────────┐
//!   │  managed heap  │ ...     │       │  managed heap  │  reserve     │
//!   └────────────────┴─────────┘       └────────────────┴──────────────┘
//!                    ▲                                  ▲              ▲
//!               program break                         brk          capacity
//! ```

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use crate::{ALIGNMENT, error::AllocError};

/// A growth primitive for one contiguous, monotonically growing range.
///
/// # Safety
///
/// Implementations must guarantee that:
///
/// - `extend(delta)` either fails or returns the previous end of the range,
///   after which `delta` more bytes starting there are readable, writable and
///   not used by anyone else for as long as the source lives;
/// - successive successful calls are contiguous (each returns the end left by
///   the previous one);
/// - `extend(0)` returns the current end without growing;
/// - the range never shrinks or moves.
pub unsafe trait HeapSource {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Option<NonNull<u8>>;

  /// First byte of the range handed out so far.
  fn lowest_valid_address(&self) -> *const u8;

  /// Last byte of the range handed out so far.
  fn highest_valid_address(&self) -> *const u8;
}

/// The process program break, grown with `sbrk(2)`.
///
/// The break is shared with anything else in the process that calls `brk`
/// or `sbrk` (including some system allocators). `Sbrk` remembers where it
/// left the break and refuses to continue once someone else has moved it,
/// so the managed range stays contiguous.
///
/// The call that notices the move has already pushed the break by `delta`.
/// Those bytes are not handed to the heap and nothing records them, so they
/// stay reserved, unused, for the life of the process.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct Sbrk {
  start: Option<NonNull<u8>>,
  end: Option<NonNull<u8>>,
}

#[cfg(unix)]
impl Sbrk {
  pub fn new() -> Self {
    Self::default()
  }
}

#[cfg(unix)]
unsafe impl HeapSource for Sbrk {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Option<NonNull<u8>> {
    let increment = libc::intptr_t::try_from(delta).ok()?;

    // SAFETY: sbrk has no preconditions; failure is reported as (void*)-1.
    let address = unsafe { libc::sbrk(increment) };

    if address as usize == usize::MAX {
      log::warn!("sbrk({delta}) failed");
      return None;
    }

    let base = NonNull::new(address.cast::<u8>())?;

    match self.end {
      Some(end) if end != base => {
        log::warn!("program break moved from {:p} to {:p} behind the heap's back", end, base);
        return None;
      }
      None => self.start = Some(base),
      _ => {}
    }

    // SAFETY: sbrk just made [base, base + delta) part of the data segment.
    self.end = Some(unsafe { base.add(delta) });

    Some(base)
  }

  fn lowest_valid_address(&self) -> *const u8 {
    self.start.map_or(std::ptr::null(), |start| start.as_ptr().cast_const())
  }

  fn highest_valid_address(&self) -> *const u8 {
    self.end.map_or(std::ptr::null(), |end| end.as_ptr().cast_const().wrapping_sub(1))
  }
}

/// A fixed-capacity region reserved up front and handed out like a private
/// program break.
///
/// Growth fails once the capacity is used up. Dropping the region releases
/// the reservation, so any allocator built on it must not outlive it (the
/// allocator owns its source, which takes care of that).
#[derive(Debug)]
pub struct Region {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl Region {
  pub fn new(capacity: usize) -> Result<Self, AllocError> {
    let layout = Layout::from_size_align(capacity.max(1), ALIGNMENT)?;

    // SAFETY: the layout has a non-zero size.
    let base = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(AllocError::SourceExhausted(capacity))?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.brk
  }
}

unsafe impl HeapSource for Region {
  fn extend(
    &mut self,
    delta: usize,
  ) -> Option<NonNull<u8>> {
    if delta > self.remaining() {
      log::warn!("region exhausted: asked for {delta} bytes, {} left", self.remaining());
      return None;
    }

    // SAFETY: brk <= capacity, so the result stays inside the reservation.
    let base = unsafe { self.base.add(self.brk) };
    self.brk += delta;

    Some(base)
  }

  fn lowest_valid_address(&self) -> *const u8 {
    self.base.as_ptr().cast_const()
  }

  fn highest_valid_address(&self) -> *const u8 {
    self.base.as_ptr().cast_const().wrapping_add(self.brk).wrapping_sub(1)
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    // The layout was valid when the region was created.
    if let Ok(layout) = Layout::from_size_align(self.capacity.max(1), ALIGNMENT) {
      // SAFETY: base came from alloc::alloc with this exact layout.
      unsafe { alloc::dealloc(self.base.as_ptr(), layout) }
    }
  }
}
