use std::ptr::NonNull;

use tracing::trace;

use crate::{config::TrackerConfig, error::MemError};

/// Outcome of a passing liveness audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditReport {
  /// Blocks found live and referenced.
  pub blocks: usize,
  /// Bytes held by those blocks.
  pub bytes: usize,
}

/// An allocation strategy: raw allocate/release plus the optional checking
/// hooks that a diagnostic build fills in.
///
/// Strategies apply their [`FailureMode`](crate::FailureMode) to every
/// error before returning it.
pub trait BlockAllocator {
  fn config(&self) -> &TrackerConfig;

  /// Whether blocks are registered and audited.
  fn is_tracking(&self) -> bool;

  /// Returns a block of `size` bytes, aligned for any primitive type.
  fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, MemError>;

  /// Returns `block` to the system.
  ///
  /// # Safety
  ///
  /// `block` must come from [`BlockAllocator::allocate`] on this allocator
  /// and must not have been released already. Tracking strategies reject
  /// violations with an error, untracked ones cannot.
  unsafe fn release(
    &self,
    block: NonNull<u8>,
  ) -> Result<(), MemError>;

  /// Fails with the error [`BlockAllocator::release`] would report, without
  /// releasing anything.
  fn check_releasable(
    &self,
    block: NonNull<u8>,
  ) -> Result<(), MemError>;

  /// Checks that `[address, address + length)` stays inside one live block.
  fn check_bounds(
    &self,
    address: *const u8,
    length: usize,
  ) -> Result<bool, MemError>;

  /// Starts an audit cycle.
  fn clear_references(&self);

  fn mark_referenced(
    &self,
    address: *const u8,
  ) -> Result<(), MemError>;

  /// Ends the cycle, failing if any live block went unmarked.
  fn check_all_referenced(&self) -> Result<AuditReport, MemError>;

  /// Ends the cycle without checking.
  fn abandon_audit(&self);

  /// Whether references were cleared and the cycle is not yet checked.
  fn audit_in_progress(&self) -> bool;

  /// Runs a complete clear/mark/check cycle. `mark` must name every block
  /// the caller still holds. Refuses to start while another cycle is
  /// running, leaving that cycle untouched.
  fn audit<F, E>(
    &self,
    mark: F,
  ) -> Result<AuditReport, E>
  where
    Self: Sized,
    F: FnOnce(&Self) -> Result<(), E>,
    E: From<MemError>,
  {
    if self.audit_in_progress() {
      let busy = self.config().failure_mode.enforce(Err(MemError::AuditInProgress));
      return busy.map_err(E::from);
    }
    self.clear_references();
    if let Err(err) = mark(self) {
      self.abandon_audit();
      return Err(err);
    }
    Ok(self.check_all_referenced()?)
  }
}

/// Production strategy: `malloc`/`free` with no bookkeeping at all.
#[derive(Debug, Default)]
pub struct RawAllocator {
  config: TrackerConfig,
}

impl RawAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_config(
    config: TrackerConfig,
  ) -> Self {
    Self { config }
  }

  fn try_allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, MemError> {
    if size == 0 {
      return Err(MemError::ZeroSize);
    }

    let address = unsafe { libc::malloc(size) } as *mut u8;
    NonNull::new(address).ok_or(MemError::AllocationFailure { size })
  }
}

impl BlockAllocator for RawAllocator {
  fn config(&self) -> &TrackerConfig {
    &self.config
  }

  fn is_tracking(&self) -> bool {
    false
  }

  fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, MemError> {
    let block = self.config.failure_mode.enforce(self.try_allocate(size))?;
    trace!(base = ?block, size, "raw block allocated");
    Ok(block)
  }

  unsafe fn release(
    &self,
    block: NonNull<u8>,
  ) -> Result<(), MemError> {
    trace!(base = ?block, "raw block released");
    unsafe { libc::free(block.as_ptr().cast()) };
    Ok(())
  }

  fn check_releasable(
    &self,
    _block: NonNull<u8>,
  ) -> Result<(), MemError> {
    Ok(())
  }

  fn check_bounds(
    &self,
    _address: *const u8,
    _length: usize,
  ) -> Result<bool, MemError> {
    Ok(true)
  }

  fn clear_references(&self) {}

  fn mark_referenced(
    &self,
    _address: *const u8,
  ) -> Result<(), MemError> {
    Ok(())
  }

  fn check_all_referenced(&self) -> Result<AuditReport, MemError> {
    Ok(AuditReport::default())
  }

  fn abandon_audit(&self) {}

  fn audit_in_progress(&self) -> bool {
    false
  }
}
