//! Mutations, outbox entries and tombstones: the units the sync layer moves.
//!
//! A [`Mutation`] is what the remote store applies. An [`OutboxEntry`] is the
//! locally persisted, not-yet-delivered form of one mutation: the table name,
//! the operation kind and a JSON payload. The payload of an upsert is the
//! record's own fields (without the table tag); the payload of a delete is a
//! [`DeletePayload`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  entity::{AiEdit, AutocompleteEntry, ChatMessage, Clause, Document},
};

// ─── Tables ──────────────────────────────────────────────────────────────────

/// The syncable tables, named as they appear on both sides of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
  Documents,
  Clauses,
  AiEdits,
  ChatMessages,
  AutocompleteCache,
}

impl SyncTable {
  pub const ALL: [SyncTable; 5] = [
    Self::Documents,
    Self::Clauses,
    Self::AiEdits,
    Self::ChatMessages,
    Self::AutocompleteCache,
  ];

  /// Must match the `rename_all = "snake_case"` serde names above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Documents => "documents",
      Self::Clauses => "clauses",
      Self::AiEdits => "ai_edits",
      Self::ChatMessages => "chat_messages",
      Self::AutocompleteCache => "autocomplete_cache",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| Error::UnknownTable(s.to_owned()))
  }

  /// Rows in these tables are written once and never updated.
  pub fn is_create_only(self) -> bool {
    matches!(
      self,
      Self::AiEdits | Self::ChatMessages | Self::AutocompleteCache
    )
  }
}

/// The kind of change an outbox entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  Upsert,
  Delete,
}

impl Operation {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Upsert => "upsert",
      Self::Delete => "delete",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "upsert" => Ok(Self::Upsert),
      "delete" => Ok(Self::Delete),
      other => Err(Error::UnknownVariant {
        kind:  "operation",
        value: other.to_owned(),
      }),
    }
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A full row of any syncable table, tagged with its table name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum Record {
  Documents(Document),
  Clauses(Clause),
  AiEdits(AiEdit),
  ChatMessages(ChatMessage),
  AutocompleteCache(AutocompleteEntry),
}

impl Record {
  pub fn table(&self) -> SyncTable {
    match self {
      Self::Documents(_) => SyncTable::Documents,
      Self::Clauses(_) => SyncTable::Clauses,
      Self::AiEdits(_) => SyncTable::AiEdits,
      Self::ChatMessages(_) => SyncTable::ChatMessages,
      Self::AutocompleteCache(_) => SyncTable::AutocompleteCache,
    }
  }

  pub fn entity_id(&self) -> Uuid {
    match self {
      Self::Documents(d) => d.document_id,
      Self::Clauses(c) => c.clause_id,
      Self::AiEdits(e) => e.edit_id,
      Self::ChatMessages(m) => m.message_id,
      Self::AutocompleteCache(a) => a.entry_id,
    }
  }

  pub fn guest_id(&self) -> Uuid {
    match self {
      Self::Documents(d) => d.guest_id,
      Self::Clauses(c) => c.guest_id,
      Self::AiEdits(e) => e.guest_id,
      Self::ChatMessages(m) => m.guest_id,
      Self::AutocompleteCache(a) => a.guest_id,
    }
  }

  /// The timestamp compared under last-writer-wins. Create-only rows use
  /// their creation time.
  pub fn updated_at(&self) -> DateTime<Utc> {
    match self {
      Self::Documents(d) => d.updated_at,
      Self::Clauses(c) => c.updated_at,
      Self::AiEdits(e) => e.created_at,
      Self::ChatMessages(m) => m.created_at,
      Self::AutocompleteCache(a) => a.created_at,
    }
  }

  /// Serialise the row's fields (without the table tag) for an outbox
  /// payload.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    Ok(match self {
      Self::Documents(d) => serde_json::to_value(d)?,
      Self::Clauses(c) => serde_json::to_value(c)?,
      Self::AiEdits(e) => serde_json::to_value(e)?,
      Self::ChatMessages(m) => serde_json::to_value(m)?,
      Self::AutocompleteCache(a) => serde_json::to_value(a)?,
    })
  }

  /// Rebuild a record from the table name and payload stored in the outbox.
  pub fn from_parts(table: SyncTable, data: serde_json::Value) -> Result<Self> {
    Ok(match table {
      SyncTable::Documents => Self::Documents(serde_json::from_value(data)?),
      SyncTable::Clauses => Self::Clauses(serde_json::from_value(data)?),
      SyncTable::AiEdits => Self::AiEdits(serde_json::from_value(data)?),
      SyncTable::ChatMessages => {
        Self::ChatMessages(serde_json::from_value(data)?)
      }
      SyncTable::AutocompleteCache => {
        Self::AutocompleteCache(serde_json::from_value(data)?)
      }
    })
  }
}

// ─── Mutation ────────────────────────────────────────────────────────────────

/// One idempotent change to the remote store, keyed by entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
  Upsert {
    record: Record,
  },
  Delete {
    table:      SyncTable,
    entity_id:  Uuid,
    guest_id:   Uuid,
    deleted_at: DateTime<Utc>,
  },
}

/// Outbox payload of a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePayload {
  pub guest_id:   Uuid,
  pub deleted_at: DateTime<Utc>,
}

impl Mutation {
  pub fn table(&self) -> SyncTable {
    match self {
      Self::Upsert { record } => record.table(),
      Self::Delete { table, .. } => *table,
    }
  }

  pub fn operation(&self) -> Operation {
    match self {
      Self::Upsert { .. } => Operation::Upsert,
      Self::Delete { .. } => Operation::Delete,
    }
  }

  pub fn entity_id(&self) -> Uuid {
    match self {
      Self::Upsert { record } => record.entity_id(),
      Self::Delete { entity_id, .. } => *entity_id,
    }
  }

  pub fn guest_id(&self) -> Uuid {
    match self {
      Self::Upsert { record } => record.guest_id(),
      Self::Delete { guest_id, .. } => *guest_id,
    }
  }

  /// The JSON payload column for this mutation's outbox entry.
  pub fn payload(&self) -> Result<serde_json::Value> {
    match self {
      Self::Upsert { record } => record.to_json(),
      Self::Delete {
        guest_id,
        deleted_at,
        ..
      } => Ok(serde_json::to_value(DeletePayload {
        guest_id:   *guest_id,
        deleted_at: *deleted_at,
      })?),
    }
  }

  /// Reject a mutation that does not belong to `guest_id`.
  pub fn check_guest(&self, guest_id: Uuid) -> Result<()> {
    let found = self.guest_id();
    if found != guest_id {
      return Err(Error::GuestMismatch {
        expected: guest_id,
        found,
      });
    }
    Ok(())
  }
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

/// A pending remote mutation, persisted locally until the pusher delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
  /// Insertion order; also the delivery order.
  pub seq:         i64,
  pub table:       SyncTable,
  pub operation:   Operation,
  pub entity_id:   Uuid,
  pub payload:     serde_json::Value,
  pub enqueued_at: DateTime<Utc>,
  /// Failed delivery attempts so far.
  pub attempts:    u32,
  pub last_error:  Option<String>,
}

impl OutboxEntry {
  /// Decode the stored payload back into the mutation it was enqueued for.
  pub fn mutation(&self) -> Result<Mutation> {
    match self.operation {
      Operation::Upsert => Ok(Mutation::Upsert {
        record: Record::from_parts(self.table, self.payload.clone())?,
      }),
      Operation::Delete => {
        let p: DeletePayload = serde_json::from_value(self.payload.clone())?;
        Ok(Mutation::Delete {
          table:      self.table,
          entity_id:  self.entity_id,
          guest_id:   p.guest_id,
          deleted_at: p.deleted_at,
        })
      }
    }
  }
}

// ─── Tombstone ───────────────────────────────────────────────────────────────

/// Marks an entity deleted on the remote so pulls can propagate the delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
  pub table:      SyncTable,
  pub entity_id:  Uuid,
  pub guest_id:   Uuid,
  pub deleted_at: DateTime<Utc>,
}

// ─── Apply result ────────────────────────────────────────────────────────────

/// What the remote store did with a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applied {
  /// The mutation is now reflected in the store.
  Written,
  /// An upsert older than the stored row; acknowledged but not applied.
  Stale,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::Document;

  #[test]
  fn record_serialises_with_table_tag() {
    let doc = Document::new(Uuid::new_v4(), "Lease");
    let json = serde_json::to_value(Record::Documents(doc.clone())).unwrap();
    assert_eq!(json["table"], "documents");
    assert_eq!(json["title"], "Lease");
  }

  #[test]
  fn upsert_entry_decodes_to_original_record() {
    let doc = Document::new(Uuid::new_v4(), "Lease");
    let mutation = Mutation::Upsert {
      record: Record::Documents(doc.clone()),
    };
    let entry = OutboxEntry {
      seq:         1,
      table:       mutation.table(),
      operation:   mutation.operation(),
      entity_id:   mutation.entity_id(),
      payload:     mutation.payload().unwrap(),
      enqueued_at: Utc::now(),
      attempts:    0,
      last_error:  None,
    };
    assert!(entry.payload.get("table").is_none());
    assert_eq!(entry.mutation().unwrap(), mutation);
  }

  #[test]
  fn delete_entry_keeps_guest_and_time() {
    let mutation = Mutation::Delete {
      table:      SyncTable::Clauses,
      entity_id:  Uuid::new_v4(),
      guest_id:   Uuid::new_v4(),
      deleted_at: Utc::now(),
    };
    let entry = OutboxEntry {
      seq:         7,
      table:       SyncTable::Clauses,
      operation:   Operation::Delete,
      entity_id:   mutation.entity_id(),
      payload:     mutation.payload().unwrap(),
      enqueued_at: Utc::now(),
      attempts:    0,
      last_error:  None,
    };
    assert_eq!(entry.mutation().unwrap(), mutation);
  }

  #[test]
  fn check_guest_rejects_foreign_records() {
    let owner = Uuid::new_v4();
    let mutation = Mutation::Upsert {
      record: Record::Documents(Document::new(owner, "Lease")),
    };
    assert!(mutation.check_guest(owner).is_ok());
    assert!(matches!(
      mutation.check_guest(Uuid::new_v4()),
      Err(Error::GuestMismatch { found, .. }) if found == owner
    ));
  }

  #[test]
  fn table_names_round_trip_through_parse() {
    for table in SyncTable::ALL {
      assert_eq!(SyncTable::parse(table.as_str()).unwrap(), table);
    }
    assert!(SyncTable::parse("outbox").is_err());
  }
}
