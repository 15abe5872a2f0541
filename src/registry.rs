use std::collections::BTreeMap;

use crate::{block::BlockRecord, error::MemError};

/// Every block currently handed out by a [`TrackedAllocator`](crate::TrackedAllocator),
/// keyed by start address.
///
/// Ranges never overlap, so the record owning an address is always the one
/// with the greatest base not above it. Only the tracked allocator and its
/// auditor mutate the registry; everyone else gets shared references.
#[derive(Debug, Default)]
pub struct BlockRegistry {
  blocks: BTreeMap<usize, BlockRecord>,
}

impl BlockRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  /// Total bytes across all live blocks.
  pub fn bytes(&self) -> usize {
    self.blocks.values().map(|record| record.size).sum()
  }

  /// Records in address order.
  pub fn iter(&self) -> impl Iterator<Item = &BlockRecord> {
    self.blocks.values()
  }

  /// The record whose range contains `address`, if any.
  pub fn find(
    &self,
    address: usize,
  ) -> Option<&BlockRecord> {
    self
      .blocks
      .range(..=address)
      .next_back()
      .map(|(_, record)| record)
      .filter(|record| record.contains(address))
  }

  pub(crate) fn find_mut(
    &mut self,
    address: usize,
  ) -> Option<&mut BlockRecord> {
    self
      .blocks
      .range_mut(..=address)
      .next_back()
      .map(|(_, record)| record)
      .filter(|record| record.contains(address))
  }

  pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut BlockRecord> {
    self.blocks.values_mut()
  }

  /// Registers `[base, base + size)`. Fails when the range is empty, wraps
  /// the address space, or overlaps a live block.
  pub(crate) fn insert(
    &mut self,
    base: usize,
    size: usize,
  ) -> Result<&BlockRecord, MemError> {
    if size == 0 {
      return Err(MemError::ZeroSize);
    }

    let end = base
      .checked_add(size)
      .ok_or(MemError::AllocationFailure { size })?;

    if self.find(base).is_some() || self.blocks.range(base..end).next().is_some() {
      return Err(MemError::AllocationFailure { size });
    }

    Ok(
      self
        .blocks
        .entry(base)
        .or_insert(BlockRecord::new(base, size)),
    )
  }

  /// Drops the record starting exactly at `base`.
  pub(crate) fn remove(
    &mut self,
    base: usize,
  ) -> Option<BlockRecord> {
    self.blocks.remove(&base)
  }
}
