use std::{cell::RefCell, ptr, ptr::NonNull};

use tracing::{debug, warn};

use crate::{
  allocator::{AuditReport, BlockAllocator},
  auditor::{AuditPhase, LivenessAuditor},
  block::BlockRecord,
  config::TrackerConfig,
  error::MemError,
  registry::BlockRegistry,
  validator::PointerValidator,
};

#[derive(Debug, Default)]
struct TrackerState {
  registry: BlockRegistry,
  auditor: LivenessAuditor,
}

/// Diagnostic strategy: every block is logged in a [`BlockRegistry`],
/// poisoned before it is freed, and subject to liveness audits.
///
/// ```text
///   allocate(n) ──malloc──▶ [ n bytes ] ──insert──▶ registry
///   release(p)  ──lookup──▶ poison 0xCC ──free──▶ remove
/// ```
///
/// The allocator is the registry's only writer. It is single-threaded:
/// the state sits behind a `RefCell`, so it is `!Sync`.
#[derive(Debug, Default)]
pub struct TrackedAllocator {
  state: RefCell<TrackerState>,
  config: TrackerConfig,
}

impl TrackedAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_config(
    config: TrackerConfig,
  ) -> Self {
    Self {
      state: RefCell::default(),
      config,
    }
  }

  /// Number of live blocks.
  pub fn live_blocks(&self) -> usize {
    self.state.borrow().registry.len()
  }

  pub fn live_bytes(&self) -> usize {
    self.state.borrow().registry.bytes()
  }

  /// Copy of every live record, in address order.
  pub fn records(&self) -> Vec<BlockRecord> {
    self.state.borrow().registry.iter().copied().collect()
  }

  pub fn audit_phase(&self) -> AuditPhase {
    self.state.borrow().auditor.phase()
  }

  /// The live block containing `address`.
  pub fn resolve(
    &self,
    address: *const u8,
  ) -> Result<BlockRecord, MemError> {
    let state = self.state.borrow();
    let result = PointerValidator::new(&state.registry)
      .resolve(address.addr())
      .copied();
    self.config.failure_mode.enforce(result)
  }

  /// Size of the block that starts exactly at `block`.
  pub fn block_size(
    &self,
    block: *const u8,
  ) -> Result<usize, MemError> {
    let record = self.resolve(block)?;
    let result = if record.base == block.addr() {
      Ok(record.size)
    } else {
      Err(MemError::InteriorRelease {
        address: block.addr(),
        base: record.base,
      })
    };
    self.config.failure_mode.enforce(result)
  }

  fn try_allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, MemError> {
    if size == 0 {
      return Err(MemError::ZeroSize);
    }

    let address = unsafe { libc::malloc(size) } as *mut u8;
    let block = NonNull::new(address).ok_or(MemError::AllocationFailure { size })?;

    if let Err(err) = self.state.borrow_mut().registry.insert(block.addr().get(), size) {
      warn!(base = ?block, size, %err, "block could not be registered");
      unsafe { libc::free(address.cast()) };
      return Err(MemError::AllocationFailure { size });
    }

    Ok(block)
  }

  /// Overwrites `size` bytes at `block` with the configured poison byte.
  ///
  /// # Safety
  ///
  /// `[block, block + size)` must be writable.
  unsafe fn poison(
    &self,
    block: NonNull<u8>,
    size: usize,
  ) {
    unsafe { ptr::write_bytes(block.as_ptr(), self.config.poison_byte, size) };
  }

  /// Poisons and frees `block`, then forgets it.
  unsafe fn try_release(
    &self,
    block: NonNull<u8>,
  ) -> Result<BlockRecord, MemError> {
    let mut state = self.state.borrow_mut();
    let record = state.releasable(block)?;

    unsafe {
      self.poison(block, record.size);
      libc::free(block.as_ptr().cast());
    }
    state.registry.remove(record.base);

    Ok(record)
  }
}

impl TrackerState {
  /// The record `block` would release, if releasing it is allowed.
  fn releasable(
    &self,
    block: NonNull<u8>,
  ) -> Result<BlockRecord, MemError> {
    let address = block.addr().get();

    match self.registry.find(address) {
      None => Err(MemError::UntrackedBlock { address }),
      Some(record) if record.base != address => Err(MemError::InteriorRelease {
        address,
        base: record.base,
      }),
      Some(record) if record.referenced => Err(MemError::StillReferenced {
        base: record.base,
        size: record.size,
      }),
      Some(record) => Ok(*record),
    }
  }
}

impl BlockAllocator for TrackedAllocator {
  fn config(&self) -> &TrackerConfig {
    &self.config
  }

  fn is_tracking(&self) -> bool {
    true
  }

  fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, MemError> {
    let block = self.config.failure_mode.enforce(self.try_allocate(size))?;
    debug!(base = ?block, size, "block allocated");
    Ok(block)
  }

  unsafe fn release(
    &self,
    block: NonNull<u8>,
  ) -> Result<(), MemError> {
    let record = self
      .config
      .failure_mode
      .enforce(unsafe { self.try_release(block) })?;
    debug!(base = ?block, size = record.size, "block released");
    Ok(())
  }

  fn check_releasable(
    &self,
    block: NonNull<u8>,
  ) -> Result<(), MemError> {
    let result = self.state.borrow().releasable(block).map(drop);
    self.config.failure_mode.enforce(result)
  }

  fn check_bounds(
    &self,
    address: *const u8,
    length: usize,
  ) -> Result<bool, MemError> {
    let state = self.state.borrow();
    let result = PointerValidator::new(&state.registry).check_bounds(address.addr(), length);
    self.config.failure_mode.enforce(result)
  }

  fn clear_references(&self) {
    let state = &mut *self.state.borrow_mut();
    state.auditor.clear(&mut state.registry);
  }

  fn mark_referenced(
    &self,
    address: *const u8,
  ) -> Result<(), MemError> {
    let result = {
      let state = &mut *self.state.borrow_mut();
      state.auditor.mark(&mut state.registry, address.addr())
    };
    self.config.failure_mode.enforce(result)
  }

  fn check_all_referenced(&self) -> Result<AuditReport, MemError> {
    let result = {
      let state = &mut *self.state.borrow_mut();
      state.auditor.check(&mut state.registry)
    };
    self.config.failure_mode.enforce(result)
  }

  fn abandon_audit(&self) {
    let state = &mut *self.state.borrow_mut();
    state.auditor.abandon(&mut state.registry);
  }

  fn audit_in_progress(&self) -> bool {
    self.state.borrow().auditor.in_progress()
  }
}

impl Drop for TrackedAllocator {
  fn drop(&mut self) {
    let records = self.records();
    if records.is_empty() {
      return;
    }

    warn!(
      blocks = records.len(),
      bytes = self.live_bytes(),
      "tracked allocator dropped with live blocks"
    );
    for record in records {
      let Some(block) = NonNull::new(record.base as *mut u8) else {
        continue;
      };
      unsafe {
        self.poison(block, record.size);
        libc::free(block.as_ptr().cast());
      }
    }
  }
}
