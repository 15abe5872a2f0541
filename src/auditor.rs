use tracing::{debug, trace};

use crate::{
  allocator::AuditReport, error::MemError, registry::BlockRegistry, validator::PointerValidator,
};

/// Where an audit cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditPhase {
  /// No audit running; every flag is clear.
  #[default]
  Idle,
  /// References cleared, caller is marking reachable blocks.
  Marking,
}

/// Drives the clear / mark / check cycle over a [`BlockRegistry`].
///
/// ```text
///   Idle ──clear──▶ Marking ──mark(addr)*──▶ Marking ──check──▶ Idle
/// ```
///
/// Check is terminal: pass or fail, every flag is reset and the auditor is
/// back to [`AuditPhase::Idle`].
#[derive(Debug, Default)]
pub struct LivenessAuditor {
  phase: AuditPhase,
}

impl LivenessAuditor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn phase(&self) -> AuditPhase {
    self.phase
  }

  pub fn in_progress(&self) -> bool {
    self.phase == AuditPhase::Marking
  }

  pub fn clear(
    &mut self,
    registry: &mut BlockRegistry,
  ) {
    registry.iter_mut().for_each(|record| record.referenced = false);
    self.phase = AuditPhase::Marking;
    trace!(blocks = registry.len(), "references cleared");
  }

  pub fn mark(
    &mut self,
    registry: &mut BlockRegistry,
    address: usize,
  ) -> Result<(), MemError> {
    if self.phase != AuditPhase::Marking {
      return Err(MemError::NoAuditInProgress);
    }

    let base = PointerValidator::new(registry).resolve(address)?.base;
    if let Some(record) = registry.find_mut(base) {
      record.referenced = true;
    }

    trace!(address, base, "block marked");
    Ok(())
  }

  pub fn check(
    &mut self,
    registry: &mut BlockRegistry,
  ) -> Result<AuditReport, MemError> {
    if self.phase != AuditPhase::Marking {
      return Err(MemError::NoAuditInProgress);
    }

    let result = {
      let mut leaked = registry.iter().filter(|record| !record.referenced);
      match leaked.next().copied() {
        Some(first) => Err(MemError::LeakDetected {
          base: first.base,
          size: first.size,
          leaked: 1 + leaked.count(),
        }),
        None => Ok(AuditReport {
          blocks: registry.len(),
          bytes: registry.bytes(),
        }),
      }
    };

    self.abandon(registry);
    debug!(?result, "liveness audit finished");
    result
  }

  /// Ends the running cycle without checking.
  pub fn abandon(
    &mut self,
    registry: &mut BlockRegistry,
  ) {
    registry.iter_mut().for_each(|record| record.referenced = false);
    self.phase = AuditPhase::Idle;
  }
}
