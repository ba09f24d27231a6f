use crate::error::AllocError;

/// Free blocks examined by one best-fit search before settling for the best
/// candidate seen so far.
pub const DEFAULT_PROBE_BUDGET: usize = 18;

/// Tunables of a [`SegregatedAllocator`](crate::SegregatedAllocator).
///
/// ```rust
/// use segalloc::Config;
///
/// let config = Config::new().probe_budget(64).check_heap(false);
///
/// assert_eq!(config.probe_budget, 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Upper bound on free blocks visited per allocation.
  ///
  /// Larger budgets find tighter fits (less fragmentation), smaller ones
  /// bound the latency of `allocate` on heaps with long free lists. When the
  /// budget runs out the search degrades to first adequate fit.
  pub probe_budget: usize,

  /// Run the invariant checker after every operation.
  ///
  /// Only honored in builds with debug assertions; release builds never run
  /// the checker implicitly.
  pub check_heap: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      probe_budget: DEFAULT_PROBE_BUDGET,
      check_heap: cfg!(debug_assertions),
    }
  }
}

impl Config {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn probe_budget(
    mut self,
    probes: usize,
  ) -> Self {
    self.probe_budget = probes;
    self
  }

  pub fn check_heap(
    mut self,
    enabled: bool,
  ) -> Self {
    self.check_heap = enabled;
    self
  }

  pub(crate) fn validate(self) -> Result<Self, AllocError> {
    if self.probe_budget == 0 {
      return Err(AllocError::InvalidConfig("probe budget must be at least 1"));
    }

    Ok(self)
  }
}
