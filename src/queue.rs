use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::{
  DefaultAllocator,
  allocator::{AuditReport, BlockAllocator},
  error::{MemError, QueueError},
};

/// Queue bookkeeping, stored in its own allocated block next to the slot
/// buffer.
#[derive(Debug, Clone, Copy)]
struct QueueHeader {
  /// Next slot to write.
  head: usize,
  /// Next slot to read.
  tail: usize,
  /// Capacity plus the one slot kept free to tell full from empty.
  slots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
  Live,
  Freed,
}

/// Bounded FIFO of `i32` whose buffer and header both live in blocks
/// obtained from a [`BlockAllocator`].
///
/// ```text
///   capacity = 4, slots = 5
///
///   ┌────┬────┬────┬────┬────┐
///   │  - │ 10 │ 20 │ 30 │  - │
///   └────┴────┴────┴────┴────┘
///          ▲              ▲
///         tail           head       size = (head - tail + 5) % 5 = 3
/// ```
///
/// With lifecycle audits enabled, [`CircularQueue::create`] audits the
/// allocator expecting exactly the queue's two blocks, and
/// [`CircularQueue::destroy`] audits it expecting nothing at all. Once
/// destroyed, every operation fails with [`QueueError::UseAfterFree`].
pub struct CircularQueue<'a, A: BlockAllocator = DefaultAllocator> {
  allocator: &'a A,
  header: NonNull<QueueHeader>,
  buffer: NonNull<i32>,
  capacity: usize,
  state: QueueState,
}

impl<'a, A: BlockAllocator> CircularQueue<'a, A> {
  pub fn create(
    allocator: &'a A,
    capacity: usize,
  ) -> Result<Self, QueueError> {
    if capacity == 0 {
      return fail(allocator, QueueError::ZeroCapacity);
    }

    let slots = capacity.saturating_add(1);
    let Some(buffer_size) = slots.checked_mul(size_of::<i32>()) else {
      return fail(allocator, QueueError::CapacityTooLarge { capacity });
    };

    let buffer = allocator.allocate(buffer_size)?;
    let header = match allocator.allocate(size_of::<QueueHeader>()) {
      Ok(header) => header,
      Err(err) => {
        unsafe { allocator.release(buffer)? };
        return Err(err.into());
      }
    };

    // malloc alignment covers both i32 and usize.
    let header = header.cast::<QueueHeader>();
    unsafe {
      header.write(QueueHeader {
        head: 0,
        tail: 0,
        slots,
      })
    };

    let queue = Self {
      allocator,
      header,
      buffer: buffer.cast(),
      capacity,
      state: QueueState::Live,
    };
    debug!(capacity, buffer = ?queue.buffer, header = ?queue.header, "queue created");

    if allocator.config().lifecycle_audits {
      queue.audit()?;
    }

    Ok(queue)
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn is_live(&self) -> bool {
    self.state == QueueState::Live
  }

  /// Number of queued values.
  pub fn size(&self) -> Result<usize, QueueError> {
    let header = self.header()?;
    let size = (header.head + header.slots - header.tail) % header.slots;

    if size > self.capacity {
      return self.fail(QueueError::Corrupted {
        size,
        capacity: self.capacity,
      });
    }
    Ok(size)
  }

  pub fn is_empty(&self) -> Result<bool, QueueError> {
    Ok(self.size()? == 0)
  }

  pub fn is_full(&self) -> Result<bool, QueueError> {
    Ok(self.size()? == self.capacity)
  }

  pub fn enqueue(
    &mut self,
    value: i32,
  ) -> Result<(), QueueError> {
    let size = self.size()?;
    if size >= self.capacity {
      return self.fail(QueueError::Overflow {
        capacity: self.capacity,
      });
    }

    let mut header = self.header()?;
    let slot = self.slot(header.head)?;
    unsafe { slot.write(value) };

    header.head = (header.head + 1) % header.slots;
    unsafe { self.header.write(header) };

    let grown = self.size()?;
    if grown != size + 1 {
      return self.fail(QueueError::Corrupted {
        size: grown,
        capacity: self.capacity,
      });
    }
    Ok(())
  }

  pub fn dequeue(&mut self) -> Result<i32, QueueError> {
    if self.size()? == 0 {
      return self.fail(QueueError::Underflow);
    }

    let mut header = self.header()?;
    let slot = self.slot(header.tail)?;
    let value = unsafe { slot.read() };

    header.tail = (header.tail + 1) % header.slots;
    unsafe { self.header.write(header) };

    Ok(value)
  }

  /// Marks the buffer and header as referenced in the allocator's running
  /// audit. Lets a caller audit several queues sharing one allocator.
  pub fn mark_blocks(&self) -> Result<(), QueueError> {
    self.ensure_live()?;
    self.allocator.mark_referenced(self.buffer.as_ptr().cast())?;
    self.allocator.mark_referenced(self.header.as_ptr().cast())?;
    Ok(())
  }

  /// Audits the allocator expecting exactly this queue's blocks.
  pub fn audit(&self) -> Result<AuditReport, QueueError> {
    self.ensure_live()?;
    self.allocator.audit(|_| self.mark_blocks())
  }

  /// Checks both blocks, releases them, and retires the queue.
  pub fn destroy(&mut self) -> Result<(), QueueError> {
    self.ensure_live()?;
    self.validate()?;
    self.release_blocks()?;
    debug!(capacity = self.capacity, "queue destroyed");

    if self.allocator.config().lifecycle_audits {
      self.allocator.audit(|_| Ok::<_, MemError>(()))?;
    }
    Ok(())
  }

  fn validate(&self) -> Result<(), MemError> {
    let header = unsafe { self.header.read() };
    self.allocator.check_bounds(
      self.buffer.as_ptr().cast(),
      header.slots * size_of::<i32>(),
    )?;
    self.allocator.check_bounds(self.header.as_ptr().cast(), size_of::<QueueHeader>())?;
    Ok(())
  }

  /// Releases both blocks or neither: each is checked before either goes.
  fn release_blocks(&mut self) -> Result<(), MemError> {
    self.allocator.check_releasable(self.buffer.cast())?;
    self.allocator.check_releasable(self.header.cast())?;

    unsafe {
      self.allocator.release(self.buffer.cast())?;
      self.allocator.release(self.header.cast())?;
    }
    self.state = QueueState::Freed;
    Ok(())
  }

  fn ensure_live(&self) -> Result<(), QueueError> {
    match self.state {
      QueueState::Live => Ok(()),
      QueueState::Freed => self.fail(QueueError::UseAfterFree),
    }
  }

  fn header(&self) -> Result<QueueHeader, QueueError> {
    self.ensure_live()?;
    self.allocator.check_bounds(self.header.as_ptr().cast(), size_of::<QueueHeader>())?;
    Ok(unsafe { self.header.read() })
  }

  /// Pointer to slot `index`, checked against the buffer block.
  fn slot(
    &self,
    index: usize,
  ) -> Result<NonNull<i32>, QueueError> {
    let slot = unsafe { self.buffer.add(index) };
    self.allocator.check_bounds(slot.as_ptr().cast(), size_of::<i32>())?;
    Ok(slot)
  }

  fn fail<T>(
    &self,
    err: QueueError,
  ) -> Result<T, QueueError> {
    fail(self.allocator, err)
  }
}

impl<A: BlockAllocator> Drop for CircularQueue<'_, A> {
  fn drop(&mut self) {
    if self.state == QueueState::Freed || std::thread::panicking() {
      return;
    }
    if let Err(err) = self.release_blocks() {
      warn!(%err, "queue blocks could not be released on drop");
    }
  }
}

fn fail<T, A: BlockAllocator>(
  allocator: &A,
  err: QueueError,
) -> Result<T, QueueError> {
  allocator.config().failure_mode.enforce(Err(err))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::allocator::RawAllocator;

  #[test]
  fn test_fifo_across_wraparound() {
    let allocator = RawAllocator::new();
    let mut queue = CircularQueue::create(&allocator, 5).unwrap();

    for value in [1, 2, 3] {
      queue.enqueue(value).unwrap();
    }
    assert_eq!(queue.dequeue(), Ok(1));
    assert_eq!(queue.dequeue(), Ok(2));
    queue.enqueue(4).unwrap();
    queue.enqueue(5).unwrap();

    assert_eq!(queue.size(), Ok(3));
    assert_eq!(queue.dequeue(), Ok(3));
    assert_eq!(queue.dequeue(), Ok(4));
    assert_eq!(queue.dequeue(), Ok(5));
    assert_eq!(queue.is_empty(), Ok(true));

    queue.destroy().unwrap();
  }

  #[test]
  fn test_capacity_limits() {
    let allocator = RawAllocator::new();
    let mut queue = CircularQueue::create(&allocator, 3).unwrap();

    assert_eq!(queue.dequeue(), Err(QueueError::Underflow));
    for value in 0..3 {
      queue.enqueue(value).unwrap();
    }
    assert_eq!(queue.is_full(), Ok(true));
    assert_eq!(queue.enqueue(99), Err(QueueError::Overflow { capacity: 3 }));
    assert_eq!(queue.size(), Ok(3));
  }

  #[test]
  fn test_zero_capacity() {
    let allocator = RawAllocator::new();

    assert!(matches!(
      CircularQueue::create(&allocator, 0),
      Err(QueueError::ZeroCapacity)
    ));
    assert!(matches!(
      CircularQueue::create(&allocator, usize::MAX / 2),
      Err(QueueError::CapacityTooLarge { .. })
    ));
  }

  #[test]
  fn test_use_after_destroy() {
    let allocator = RawAllocator::new();
    let mut queue = CircularQueue::create(&allocator, 10).unwrap();

    queue.destroy().unwrap();

    assert!(!queue.is_live());
    assert_eq!(queue.size(), Err(QueueError::UseAfterFree));
    assert_eq!(queue.enqueue(10), Err(QueueError::UseAfterFree));
    assert_eq!(queue.dequeue(), Err(QueueError::UseAfterFree));
    assert_eq!(queue.destroy(), Err(QueueError::UseAfterFree));
  }

  #[cfg(feature = "diagnostics")]
  mod tracked {
    use super::*;
    use crate::{
      auditor::AuditPhase,
      config::{FailureMode, TrackerConfig},
      tracked::TrackedAllocator,
    };

    #[test]
    fn test_lifecycle_audits() {
      let allocator = TrackedAllocator::new();
      let mut queue = CircularQueue::create(&allocator, 10).unwrap();

      assert_eq!(allocator.live_blocks(), 2);
      assert_eq!(
        allocator.live_bytes(),
        11 * size_of::<i32>() + size_of::<QueueHeader>()
      );

      queue.enqueue(10).unwrap();
      assert_eq!(queue.size(), Ok(1));
      assert_eq!(queue.dequeue(), Ok(10));
      assert_eq!(queue.size(), Ok(0));
      queue.enqueue(5).unwrap();
      assert_eq!(queue.size(), Ok(1));

      queue.destroy().unwrap();
      assert_eq!(allocator.live_blocks(), 0);
    }

    #[test]
    fn test_create_detects_foreign_block() {
      let allocator = TrackedAllocator::new();
      let stray = allocator.allocate(7).unwrap();

      let result = CircularQueue::create(&allocator, 4);
      assert_eq!(
        result.err(),
        Some(QueueError::Memory(MemError::LeakDetected {
          base: stray.addr().get(),
          size: 7,
          leaked: 1,
        }))
      );

      // The failed queue released its own blocks on drop.
      assert_eq!(allocator.live_blocks(), 1);
      unsafe { allocator.release(stray).unwrap() };
    }

    #[test]
    fn test_shared_allocator() {
      let config = TrackerConfig::default().with_lifecycle_audits(false);
      let allocator = TrackedAllocator::with_config(config);

      let mut first = CircularQueue::create(&allocator, 2).unwrap();
      let second = CircularQueue::create(&allocator, 8).unwrap();

      let report = allocator.audit(|_| {
        first.mark_blocks()?;
        second.mark_blocks()
      });
      assert_eq!(report.map(|r| r.blocks), Ok(4));

      assert!(matches!(
        allocator.audit(|_| first.mark_blocks()),
        Err(QueueError::Memory(MemError::LeakDetected { leaked: 2, .. }))
      ));

      first.destroy().unwrap();
      assert_eq!(first.mark_blocks(), Err(QueueError::UseAfterFree));
      assert_eq!(second.audit().map(|r| r.blocks), Ok(2));

      drop(second);
      assert_eq!(allocator.live_blocks(), 0);
    }

    #[test]
    fn test_destroy_is_all_or_nothing() {
      let config = TrackerConfig::default().with_lifecycle_audits(false);
      let allocator = TrackedAllocator::with_config(config);
      let mut queue = CircularQueue::create(&allocator, 4).unwrap();
      let header = queue.header.as_ptr().cast::<u8>();

      allocator.clear_references();
      allocator.mark_referenced(header).unwrap();

      assert_eq!(
        queue.destroy(),
        Err(QueueError::Memory(MemError::StillReferenced {
          base: header.addr(),
          size: size_of::<QueueHeader>(),
        }))
      );
      assert!(queue.is_live());
      assert_eq!(allocator.live_blocks(), 2);

      // Once the audit is over the same queue destroys cleanly.
      allocator.abandon_audit();
      queue.destroy().unwrap();
      assert!(!queue.is_live());
      assert_eq!(allocator.live_blocks(), 0);
    }

    #[test]
    fn test_create_leaves_running_audit_alone() {
      let allocator = TrackedAllocator::new();
      let stray = allocator.allocate(4).unwrap();

      allocator.clear_references();
      allocator.mark_referenced(stray.as_ptr()).unwrap();

      assert!(matches!(
        CircularQueue::create(&allocator, 2),
        Err(QueueError::Memory(MemError::AuditInProgress))
      ));

      assert_eq!(allocator.audit_phase(), AuditPhase::Marking);
      assert_eq!(allocator.check_all_referenced().map(|r| r.blocks), Ok(1));
      unsafe { allocator.release(stray).unwrap() };
    }

    #[test]
    #[should_panic(expected = "enqueue on full queue")]
    fn test_overflow_panics_in_panic_mode() {
      let config = TrackerConfig::default().with_failure_mode(FailureMode::Panic);
      let allocator = TrackedAllocator::with_config(config);
      let mut queue = CircularQueue::create(&allocator, 1).unwrap();

      queue.enqueue(1).unwrap();
      let _ = queue.enqueue(2);
    }
  }
}
