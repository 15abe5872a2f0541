use thiserror::Error;

/// Failures reported by a block allocator, its registry, and the liveness
/// audit.
///
/// Every variant describes a programming defect in the caller, never a
/// transient condition. Addresses are plain integers so the error can be
/// compared and printed after the block itself is gone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
  /// A zero-byte block or a zero-length range was requested.
  #[error("zero-sized request")]
  ZeroSize,

  /// The underlying allocator is out of memory or the block could not be
  /// registered.
  #[error("allocation of {size} bytes failed")]
  AllocationFailure {
    /// Requested size in bytes.
    size: usize,
  },

  /// Release of an address that no live block contains.
  #[error("release of untracked block at {address:#x}")]
  UntrackedBlock {
    /// Address passed to release.
    address: usize,
  },

  /// Release through a pointer into the middle of a block.
  #[error("release at {address:#x} does not start the block at {base:#x}")]
  InteriorRelease {
    /// Address passed to release.
    address: usize,
    /// Start of the block that contains it.
    base: usize,
  },

  /// Release of a block that was marked by the audit still in progress.
  #[error("block at {base:#x} ({size} bytes) is still referenced")]
  StillReferenced {
    /// Start of the block.
    base: usize,
    /// Size of the block.
    size: usize,
  },

  /// An address that resolves to no live block. Also raised for dangling
  /// marks.
  #[error("address {address:#x} is not inside any tracked block")]
  UnknownAddress {
    /// The unresolved address.
    address: usize,
  },

  /// A range runs past the end of its owning block.
  #[error(
    "range of {length} bytes at {address:#x} overruns block at {base:#x} ({size} bytes)"
  )]
  OutOfBounds {
    /// Start of the checked range.
    address: usize,
    /// Length of the checked range.
    length: usize,
    /// Start of the owning block.
    base: usize,
    /// Size of the owning block.
    size: usize,
  },

  /// Mark or check called without clearing references first.
  #[error("no liveness audit in progress")]
  NoAuditInProgress,

  /// A new audit was requested while another one is still marking.
  #[error("a liveness audit is already in progress")]
  AuditInProgress,

  /// The audit found blocks nobody marked.
  #[error("leak detected: block at {base:#x} ({size} bytes) unreferenced, {leaked} leaked in total")]
  LeakDetected {
    /// Start of the first unmarked block.
    base: usize,
    /// Size of the first unmarked block.
    size: usize,
    /// Number of unmarked blocks.
    leaked: usize,
  },
}

/// Contract violations of [`CircularQueue`](crate::CircularQueue).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
  #[error("queue capacity must be greater than zero")]
  ZeroCapacity,

  #[error("queue capacity {capacity} is too large")]
  CapacityTooLarge { capacity: usize },

  #[error("enqueue on full queue (capacity {capacity})")]
  Overflow { capacity: usize },

  #[error("dequeue on empty queue")]
  Underflow,

  #[error("operation on destroyed queue")]
  UseAfterFree,

  #[error("queue state corrupted: size {size} with capacity {capacity}")]
  Corrupted { size: usize, capacity: usize },

  #[error(transparent)]
  Memory(#[from] MemError),
}

/// Malformed tracker settings.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("configuration source: {0}")]
  Source(#[from] ::config::ConfigError),

  #[error("unknown failure mode `{0}` (expected report, panic or abort)")]
  FailureMode(String),

  #[error("invalid poison byte `{0}`")]
  PoisonByte(String),
}
