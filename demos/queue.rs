use memaudit::{BlockAllocator, CircularQueue, DefaultAllocator, QueueError, TrackerConfig};
use tracing_subscriber::EnvFilter;

/// Prints the allocator's view of memory when tracking is compiled in.
fn print_live_blocks(
  label: &str,
  allocator: &DefaultAllocator,
) {
  #[cfg(feature = "diagnostics")]
  println!(
    "[{}] tracking = {}, live blocks = {}, live bytes = {}",
    label,
    allocator.is_tracking(),
    allocator.live_blocks(),
    allocator.live_bytes(),
  );

  #[cfg(not(feature = "diagnostics"))]
  println!("[{}] tracking disabled (is_tracking = {})", label, allocator.is_tracking());
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  // MEMAUDIT_FAILURE_MODE=abort reproduces the fail-fast behaviour: the
  // post-free calls at the end kill the process instead of printing errors.
  let allocator = DefaultAllocator::with_config(TrackerConfig::from_env()?);
  print_live_blocks("start", &allocator);

  let mut queue = CircularQueue::create(&allocator, 10)?;
  println!("size: {}", queue.size()?);
  print_live_blocks("created", &allocator);

  println!("put int 10 onto queue");
  queue.enqueue(10)?;
  println!("size: {}", queue.size()?);
  println!("removed from queue: {}", queue.dequeue()?);
  println!("size: {}", queue.size()?);
  println!("put int 5 onto queue");
  queue.enqueue(5)?;
  println!("size: {}", queue.size()?);

  queue.destroy()?;
  print_live_blocks("destroyed", &allocator);

  // Every operation on a destroyed queue is refused.
  let after_free: [(&str, Result<(), QueueError>); 3] = [
    ("size", queue.size().map(drop)),
    ("enqueue", queue.enqueue(10)),
    ("dequeue", queue.dequeue().map(drop)),
  ];
  for (operation, result) in after_free {
    match result {
      Ok(()) => println!("{operation} after destroy unexpectedly succeeded"),
      Err(err) => println!("{operation} after destroy: {err}"),
    }
  }

  Ok(())
}
