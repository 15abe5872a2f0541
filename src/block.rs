/// Bookkeeping for one live tracked block: `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
  pub base: usize,
  pub size: usize,
  /// Set while an audit is marking, cleared when it finishes.
  pub referenced: bool,
}

impl BlockRecord {
  pub fn new(
    base: usize,
    size: usize,
  ) -> Self {
    Self {
      base,
      size,
      referenced: false,
    }
  }

  /// One past the last byte of the block.
  pub fn end(&self) -> usize {
    self.base + self.size
  }

  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    address >= self.base && address - self.base < self.size
  }
}
