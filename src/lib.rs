//! # memaudit - A Debug Memory Block Tracker
//!
//! This crate wraps `malloc`/`free` so that, in a diagnostic build, every
//! live block is logged with its base address and size. Any address can be
//! resolved back to the block containing it, ranges can be bounds-checked,
//! and a caller-driven **liveness audit** catches blocks nobody points to.
//!
//! ## Overview
//!
//! ```text
//!   Tracked Allocation:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         BLOCK REGISTRY                               │
//!   │                                                                      │
//!   │   base      size   referenced                                        │
//!   │   0x5010    44     false          ◀── CircularQueue buffer           │
//!   │   0x5050    24     false          ◀── CircularQueue header           │
//!   │   0x6000    7      false          ◀── somebody forgot this one       │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Any address in [base, base + size) resolves to its record.
//! ```
//!
//! Nothing is reclaimed automatically. The audit only checks that the
//! caller's idea of "what is reachable" matches the registry's "what is
//! allocated":
//!
//! ```text
//!   clear_references()        every flag ← false
//!   mark_referenced(p) ...    caller names each block it still holds
//!   check_all_referenced()    any flag still false → LeakDetected
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   memaudit
//!   ├── allocator  - BlockAllocator strategy trait, RawAllocator
//!   ├── config     - TrackerConfig, FailureMode
//!   ├── error      - MemError, QueueError
//!   ├── queue      - CircularQueue, the audited workload
//!   └── (diagnostics feature)
//!       ├── block      - BlockRecord
//!       ├── registry   - BlockRegistry
//!       ├── validator  - PointerValidator
//!       ├── auditor    - LivenessAuditor
//!       └── tracked    - TrackedAllocator
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use memaudit::{CircularQueue, TrackedAllocator};
//!
//! fn main() -> Result<(), memaudit::QueueError> {
//!     let allocator = TrackedAllocator::new();
//!     let mut queue = CircularQueue::create(&allocator, 10)?;
//!
//!     queue.enqueue(10)?;
//!     assert_eq!(queue.dequeue()?, 10);
//!
//!     queue.destroy()?;
//!     assert!(queue.size().is_err());
//!     Ok(())
//! }
//! ```
//!
//! ## Build Modes
//!
//! The `diagnostics` feature (on by default) compiles the registry,
//! validator, auditor and [`TrackedAllocator`], and makes it the
//! [`DefaultAllocator`]. Without it only [`RawAllocator`] exists: allocate
//! and release go straight to `libc`, audits and bounds checks are no-ops.
//!
//! ## Failure Modes
//!
//! Every violation is a bug in the caller. By default it comes back as a
//! [`MemError`] or [`QueueError`]; [`FailureMode::Panic`] and
//! [`FailureMode::Abort`] turn it into a panic or a hard abort instead.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: allocators are `!Sync`
//! - **Full sweeps**: an audit visits every live block
//! - **Unix-only**: requires `libc`

mod allocator;
mod config;
mod error;
mod queue;

#[cfg(feature = "diagnostics")]
mod auditor;
#[cfg(feature = "diagnostics")]
mod block;
#[cfg(feature = "diagnostics")]
mod registry;
#[cfg(feature = "diagnostics")]
mod tracked;
#[cfg(feature = "diagnostics")]
mod validator;

pub use allocator::{AuditReport, BlockAllocator, RawAllocator};
pub use config::{
  ENV_PREFIX, FAILURE_MODE_VAR, FailureMode, POISON_BYTE, POISON_BYTE_VAR, TrackerConfig,
};
pub use error::{ConfigError, MemError, QueueError};
pub use queue::CircularQueue;

#[cfg(feature = "diagnostics")]
pub use auditor::{AuditPhase, LivenessAuditor};
#[cfg(feature = "diagnostics")]
pub use block::BlockRecord;
#[cfg(feature = "diagnostics")]
pub use registry::BlockRegistry;
#[cfg(feature = "diagnostics")]
pub use tracked::TrackedAllocator;
#[cfg(feature = "diagnostics")]
pub use validator::PointerValidator;

/// Strategy used when none is named.
#[cfg(feature = "diagnostics")]
pub type DefaultAllocator = TrackedAllocator;

/// Strategy used when none is named.
#[cfg(not(feature = "diagnostics"))]
pub type DefaultAllocator = RawAllocator;
