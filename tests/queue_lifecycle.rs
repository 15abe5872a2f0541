//! End-to-end queue scenarios against the tracking allocator.

#![cfg(feature = "diagnostics")]

use std::ptr::NonNull;

use memaudit::{
  AuditPhase, BlockAllocator, CircularQueue, MemError, QueueError, TrackedAllocator, TrackerConfig,
};

#[test]
fn test_queue_walkthrough() {
  let allocator = TrackedAllocator::new();
  let mut queue = CircularQueue::create(&allocator, 10).unwrap();

  assert_eq!(queue.size(), Ok(0));
  queue.enqueue(10).unwrap();
  assert_eq!(queue.size(), Ok(1));
  assert_eq!(queue.dequeue(), Ok(10));
  assert_eq!(queue.size(), Ok(0));
  queue.enqueue(5).unwrap();
  assert_eq!(queue.size(), Ok(1));

  queue.destroy().unwrap();

  assert_eq!(allocator.live_blocks(), 0);
  assert_eq!(queue.size(), Err(QueueError::UseAfterFree));
  assert_eq!(queue.enqueue(10), Err(QueueError::UseAfterFree));
  assert_eq!(queue.dequeue(), Err(QueueError::UseAfterFree));
}

#[test]
fn test_wraparound_order() {
  let allocator = TrackedAllocator::new();
  let mut queue = CircularQueue::create(&allocator, 5).unwrap();

  for value in [1, 2, 3] {
    queue.enqueue(value).unwrap();
  }
  queue.dequeue().unwrap();
  queue.dequeue().unwrap();
  for value in [4, 5] {
    queue.enqueue(value).unwrap();
  }

  let drained: Vec<i32> = (0..3).map(|_| queue.dequeue().unwrap()).collect();
  assert_eq!(drained, vec![3, 4, 5]);

  // Cycle through the buffer several times over.
  for round in 0..20 {
    for value in 0..5 {
      queue.enqueue(round * 10 + value).unwrap();
    }
    assert_eq!(queue.enqueue(-1), Err(QueueError::Overflow { capacity: 5 }));
    for value in 0..5 {
      assert_eq!(queue.dequeue(), Ok(round * 10 + value));
    }
    assert_eq!(queue.dequeue(), Err(QueueError::Underflow));
  }

  queue.destroy().unwrap();
}

#[test]
fn test_destroy_audits_leftovers() {
  let allocator = TrackedAllocator::new();
  let mut queue = CircularQueue::create(&allocator, 3).unwrap();
  let stray = allocator.allocate(12).unwrap();

  assert_eq!(
    queue.destroy(),
    Err(QueueError::Memory(MemError::LeakDetected {
      base: stray.addr().get(),
      size: 12,
      leaked: 1,
    }))
  );

  // The queue's own blocks are gone regardless.
  assert!(!queue.is_live());
  assert_eq!(allocator.live_blocks(), 1);
  assert_eq!(allocator.audit_phase(), AuditPhase::Idle);
  unsafe { allocator.release(stray).unwrap() };
}

#[test]
fn test_strict_mode_off_by_default() {
  let config = TrackerConfig::default();
  let allocator = TrackedAllocator::with_config(config);
  let mut unrelated = 0u32;

  let result = unsafe { allocator.release(NonNull::from(&mut unrelated).cast()) };
  assert!(matches!(result, Err(MemError::UntrackedBlock { .. })));
}

#[test]
fn test_queue_blocks_are_bounds_checked() {
  let allocator = TrackedAllocator::with_config(TrackerConfig::default().with_lifecycle_audits(false));
  let queue = CircularQueue::create(&allocator, 4).unwrap();

  let records = allocator.records();
  assert_eq!(records.len(), 2);

  let buffer = records
    .iter()
    .find(|record| record.size == 5 * size_of::<i32>())
    .unwrap();
  let base = buffer.base as *const u8;

  assert_eq!(allocator.check_bounds(base, buffer.size), Ok(true));
  assert_eq!(
    allocator.check_bounds(base, buffer.size + 1),
    Err(MemError::OutOfBounds {
      address: buffer.base,
      length: buffer.size + 1,
      base: buffer.base,
      size: buffer.size,
    })
  );

  drop(queue);
  assert_eq!(allocator.live_blocks(), 0);
}
