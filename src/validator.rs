use tracing::trace;

use crate::{block::BlockRecord, error::MemError, registry::BlockRegistry};

/// Read-only view of a [`BlockRegistry`] that maps addresses back to their
/// blocks and checks that ranges stay inside them.
#[derive(Debug, Clone, Copy)]
pub struct PointerValidator<'r> {
  registry: &'r BlockRegistry,
}

impl<'r> PointerValidator<'r> {
  pub fn new(
    registry: &'r BlockRegistry,
  ) -> Self {
    Self { registry }
  }

  /// The unique live block containing `address`.
  pub fn resolve(
    &self,
    address: usize,
  ) -> Result<&'r BlockRecord, MemError> {
    self
      .registry
      .find(address)
      .ok_or(MemError::UnknownAddress { address })
  }

  /// Succeeds only when `[address, address + length)` lies inside a single
  /// live block. Returns `true` so it can sit inside an `assert!`.
  pub fn check_bounds(
    &self,
    address: usize,
    length: usize,
  ) -> Result<bool, MemError> {
    if length == 0 {
      return Err(MemError::ZeroSize);
    }

    let record = self.resolve(address)?;
    let overrun = MemError::OutOfBounds {
      address,
      length,
      base: record.base,
      size: record.size,
    };

    match address.checked_add(length) {
      Some(end) if end <= record.end() => {
        trace!(address, length, base = record.base, "bounds ok");
        Ok(true)
      }
      _ => Err(overrun),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry() -> BlockRegistry {
    let mut registry = BlockRegistry::new();
    registry.insert(0x1000, 16).unwrap();
    registry.insert(0x1010, 16).unwrap();
    registry
  }

  #[test]
  fn test_resolve() {
    let registry = registry();
    let validator = PointerValidator::new(&registry);

    assert_eq!(validator.resolve(0x1004).unwrap().base, 0x1000);
    assert_eq!(validator.resolve(0x1010).unwrap().base, 0x1010);
    assert_eq!(
      validator.resolve(0x1020),
      Err(MemError::UnknownAddress { address: 0x1020 })
    );
  }

  #[test]
  fn test_check_bounds() {
    let registry = registry();
    let validator = PointerValidator::new(&registry);

    assert_eq!(validator.check_bounds(0x1000, 16), Ok(true));
    assert_eq!(validator.check_bounds(0x100C, 4), Ok(true));

    // Valid start, but the range spills into the neighbouring block.
    assert_eq!(
      validator.check_bounds(0x100C, 5),
      Err(MemError::OutOfBounds {
        address: 0x100C,
        length: 5,
        base: 0x1000,
        size: 16,
      })
    );
    assert_eq!(validator.check_bounds(0x1000, 0), Err(MemError::ZeroSize));
    assert_eq!(
      validator.check_bounds(0x0FFF, 1),
      Err(MemError::UnknownAddress { address: 0x0FFF })
    );
  }
}
