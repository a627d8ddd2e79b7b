//! Push-sync request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mutation::{Applied, Mutation};

/// A batch of outbox mutations delivered on behalf of one guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
  pub guest_id:  Uuid,
  pub mutations: Vec<Mutation>,
}

/// How many mutations of a [`PushRequest`] were written or found stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
  pub applied: usize,
  pub stale:   usize,
}

impl PushResponse {
  pub fn record(&mut self, outcome: Applied) {
    match outcome {
      Applied::Written => self.applied += 1,
      Applied::Stale => self.stale += 1,
    }
  }

  /// The outcome of a single-mutation push.
  pub fn single(&self) -> Applied {
    if self.stale > 0 { Applied::Stale } else { Applied::Written }
  }
}
