/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use segalloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(32, 16), 32);
/// assert_eq!(align_to!(0, 16), 0);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` up to the block alignment of the heap (16 bytes).
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(48), 48);
/// assert_eq!(align!(49), 64);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::ALIGNMENT)
  };
}

/// Like [`align!`] but returns `None` instead of wrapping on overflow.
pub fn checked_align(value: usize) -> Option<usize> {
  value
    .checked_add(crate::ALIGNMENT - 1)
    .map(|padded| padded & !(crate::ALIGNMENT - 1))
}
