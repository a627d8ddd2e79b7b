//! The free-AI-use gate.
//!
//! Each guest gets one free AI-assisted edit. After that, AI features need an
//! explicit unlock (granted after an upgrade). There are no quotas or time
//! windows; the gate is a single flag plus a list of unlocked features.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The feature name checked before an AI-assisted edit.
pub const AI_EDIT: &str = "ai_edit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestFlags {
  pub guest_id:          Uuid,
  pub free_ai_used:      bool,
  pub features_unlocked: Vec<String>,
}

impl GuestFlags {
  /// The state of a guest that has never been seen.
  pub fn new(guest_id: Uuid) -> Self {
    Self {
      guest_id,
      free_ai_used: false,
      features_unlocked: Vec::new(),
    }
  }

  pub fn is_unlocked(&self, feature: &str) -> bool {
    self.features_unlocked.iter().any(|f| f == feature)
  }

  /// True if `feature` is unlocked or the free use is still available.
  pub fn can_use_ai(&self, feature: &str) -> bool {
    self.is_unlocked(feature) || !self.free_ai_used
  }

  /// Add `feature` to the unlocked list; a no-op if already present.
  pub fn unlock(&mut self, feature: &str) {
    if !self.is_unlocked(feature) {
      self.features_unlocked.push(feature.to_owned());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_guest_has_one_free_use() {
    let mut flags = GuestFlags::new(Uuid::new_v4());
    assert!(flags.can_use_ai(AI_EDIT));
    flags.free_ai_used = true;
    assert!(!flags.can_use_ai(AI_EDIT));
  }

  #[test]
  fn unlock_overrides_consumed_free_use() {
    let mut flags = GuestFlags::new(Uuid::new_v4());
    flags.free_ai_used = true;
    flags.unlock(AI_EDIT);
    flags.unlock(AI_EDIT);
    assert_eq!(flags.features_unlocked, vec![AI_EDIT.to_owned()]);
    assert!(flags.can_use_ai(AI_EDIT));
    assert!(!flags.can_use_ai("numerology_report"));
  }
}
