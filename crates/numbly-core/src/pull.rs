//! Pull-sync request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  entity::{AiEdit, AutocompleteEntry, ChatMessage, Clause, Document},
  mutation::Tombstone,
};

/// Parameters for [`crate::store::RemoteStore::pull`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
  pub guest_id:  Uuid,
  /// Only rows changed strictly after this instant are returned. `None`
  /// requests a full resync.
  pub last_sync: Option<DateTime<Utc>>,
}

/// Every row changed since the requested watermark, across all tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullBundle {
  pub documents:          Vec<Document>,
  pub clauses:            Vec<Clause>,
  pub ai_edits:           Vec<AiEdit>,
  pub chat_messages:      Vec<ChatMessage>,
  pub autocomplete_cache: Vec<AutocompleteEntry>,
  pub deleted_items:      Vec<Tombstone>,
  /// Server clock at the time of the pull; the caller's next watermark.
  pub sync_timestamp:     DateTime<Utc>,
}

impl PullBundle {
  /// Total number of rows and tombstones carried.
  pub fn len(&self) -> usize {
    self.documents.len()
      + self.clauses.len()
      + self.ai_edits.len()
      + self.chat_messages.len()
      + self.autocomplete_cache.len()
      + self.deleted_items.len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Outcome of merging a [`PullBundle`] into a local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
  /// Rows written locally.
  pub applied: usize,
  /// Remote rows older than the local copy under last-writer-wins.
  pub stale:   usize,
  /// Local rows removed because of a tombstone.
  pub deleted: usize,
}
