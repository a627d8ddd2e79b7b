//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 strings with microsecond
//! precision and a `Z` suffix, so string comparison in SQL is chronological.
//! UUIDs are stored as hyphenated lowercase strings. Structured fields
//! (document content, unlocked features) are stored as compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use numbly_core::{
  entity::{
    AiEdit, AutocompleteEntry, ChatMessage, ChatRole, Clause, Document,
    DocumentStatus,
  },
  mutation::{Record, SyncTable},
};
use rusqlite::types::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Clause hashing ───────────────────────────────────────────────────────────

/// SHA-256 hex digest of a clause body.
pub fn content_hash(body: &str) -> String {
  hex::encode(Sha256::digest(body.as_bytes()))
}

// ─── Table metadata ───────────────────────────────────────────────────────────

pub fn key_column(table: SyncTable) -> &'static str {
  match table {
    SyncTable::Documents => "document_id",
    SyncTable::Clauses => "clause_id",
    SyncTable::AiEdits => "edit_id",
    SyncTable::ChatMessages => "message_id",
    SyncTable::AutocompleteCache => "entry_id",
  }
}

/// The column compared under last-writer-wins.
pub fn version_column(table: SyncTable) -> &'static str {
  if table.is_create_only() {
    "created_at"
  } else {
    "updated_at"
  }
}

// ─── Write rows ───────────────────────────────────────────────────────────────

/// A record flattened into column values, ready to be moved onto the
/// connection thread.
#[derive(Debug, Clone)]
pub struct RawRow {
  pub table:     SyncTable,
  pub entity_id: String,
  pub guest_id:  String,
  /// Encoded LWW timestamp.
  pub version:   String,
  pub columns:   Vec<(&'static str, Value)>,
}

fn text(s: impl Into<String>) -> Value { Value::Text(s.into()) }

pub fn encode_record(record: &Record) -> Result<RawRow> {
  let columns = match record {
    Record::Documents(d) => vec![
      ("document_id", text(encode_uuid(d.document_id))),
      ("guest_id", text(encode_uuid(d.guest_id))),
      ("title", text(d.title.clone())),
      ("status", text(d.status.as_str())),
      ("content", text(serde_json::to_string(&d.content)?)),
      ("created_at", text(encode_dt(d.created_at))),
      ("updated_at", text(encode_dt(d.updated_at))),
    ],
    Record::Clauses(c) => vec![
      ("clause_id", text(encode_uuid(c.clause_id))),
      ("document_id", text(encode_uuid(c.document_id))),
      ("guest_id", text(encode_uuid(c.guest_id))),
      ("order_index", Value::Integer(c.order_index)),
      ("title", text(c.title.clone())),
      ("body", text(c.body.clone())),
      ("content_hash", text(c.content_hash.clone())),
      ("updated_at", text(encode_dt(c.updated_at))),
    ],
    Record::AiEdits(e) => vec![
      ("edit_id", text(encode_uuid(e.edit_id))),
      ("guest_id", text(encode_uuid(e.guest_id))),
      ("document_id", text(encode_uuid(e.document_id))),
      (
        "clause_id",
        e.clause_id.map_or(Value::Null, |id| text(encode_uuid(id))),
      ),
      ("result", text(e.result.clone())),
      ("created_at", text(encode_dt(e.created_at))),
    ],
    Record::ChatMessages(m) => vec![
      ("message_id", text(encode_uuid(m.message_id))),
      ("guest_id", text(encode_uuid(m.guest_id))),
      ("conversation_id", text(encode_uuid(m.conversation_id))),
      ("role", text(m.role.as_str())),
      ("content", text(m.content.clone())),
      ("created_at", text(encode_dt(m.created_at))),
    ],
    Record::AutocompleteCache(a) => vec![
      ("entry_id", text(encode_uuid(a.entry_id))),
      ("guest_id", text(encode_uuid(a.guest_id))),
      ("prompt", text(a.prompt.clone())),
      ("suggestion", text(a.suggestion.clone())),
      ("created_at", text(encode_dt(a.created_at))),
    ],
  };

  Ok(RawRow {
    table: record.table(),
    entity_id: encode_uuid(record.entity_id()),
    guest_id: encode_uuid(record.guest_id()),
    version: encode_dt(record.updated_at()),
    columns,
  })
}

// ─── Read rows ────────────────────────────────────────────────────────────────

/// An entity that can be read back from its table in two steps: raw strings
/// on the connection thread, then decoding on the caller's task.
pub trait FromRaw: Sized {
  type Raw: Send + 'static;

  const TABLE: SyncTable;
  /// Column list matching the positions read by [`FromRaw::read`].
  const COLUMNS: &'static str;

  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self::Raw>;

  fn decode(raw: Self::Raw) -> Result<Self>;
}

pub fn decode_all<T: FromRaw>(raws: Vec<T::Raw>) -> Result<Vec<T>> {
  raws.into_iter().map(T::decode).collect()
}

/// Raw strings read directly from a `documents` row.
pub struct RawDocument {
  pub document_id: String,
  pub guest_id:    String,
  pub title:       String,
  pub status:      String,
  pub content:     String,
  pub created_at:  String,
  pub updated_at:  String,
}

impl FromRaw for Document {
  type Raw = RawDocument;

  const TABLE: SyncTable = SyncTable::Documents;
  const COLUMNS: &'static str =
    "document_id, guest_id, title, status, content, created_at, updated_at";

  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDocument> {
    Ok(RawDocument {
      document_id: row.get(0)?,
      guest_id:    row.get(1)?,
      title:       row.get(2)?,
      status:      row.get(3)?,
      content:     row.get(4)?,
      created_at:  row.get(5)?,
      updated_at:  row.get(6)?,
    })
  }

  fn decode(raw: RawDocument) -> Result<Document> {
    Ok(Document {
      document_id: decode_uuid(&raw.document_id)?,
      guest_id:    decode_uuid(&raw.guest_id)?,
      title:       raw.title,
      status:      DocumentStatus::parse(&raw.status)?,
      content:     serde_json::from_str(&raw.content)?,
      created_at:  decode_dt(&raw.created_at)?,
      updated_at:  decode_dt(&raw.updated_at)?,
    })
  }
}

pub struct RawClause {
  pub clause_id:    String,
  pub document_id:  String,
  pub guest_id:     String,
  pub order_index:  i64,
  pub title:        String,
  pub body:         String,
  pub content_hash: String,
  pub updated_at:   String,
}

impl FromRaw for Clause {
  type Raw = RawClause;

  const TABLE: SyncTable = SyncTable::Clauses;
  const COLUMNS: &'static str = "clause_id, document_id, guest_id, order_index, \
                                 title, body, content_hash, updated_at";

  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawClause> {
    Ok(RawClause {
      clause_id:    row.get(0)?,
      document_id:  row.get(1)?,
      guest_id:     row.get(2)?,
      order_index:  row.get(3)?,
      title:        row.get(4)?,
      body:         row.get(5)?,
      content_hash: row.get(6)?,
      updated_at:   row.get(7)?,
    })
  }

  fn decode(raw: RawClause) -> Result<Clause> {
    Ok(Clause {
      clause_id:    decode_uuid(&raw.clause_id)?,
      document_id:  decode_uuid(&raw.document_id)?,
      guest_id:     decode_uuid(&raw.guest_id)?,
      order_index:  raw.order_index,
      title:        raw.title,
      body:         raw.body,
      content_hash: raw.content_hash,
      updated_at:   decode_dt(&raw.updated_at)?,
    })
  }
}

pub struct RawAiEdit {
  pub edit_id:     String,
  pub guest_id:    String,
  pub document_id: String,
  pub clause_id:   Option<String>,
  pub result:      String,
  pub created_at:  String,
}

impl FromRaw for AiEdit {
  type Raw = RawAiEdit;

  const TABLE: SyncTable = SyncTable::AiEdits;
  const COLUMNS: &'static str =
    "edit_id, guest_id, document_id, clause_id, result, created_at";

  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAiEdit> {
    Ok(RawAiEdit {
      edit_id:     row.get(0)?,
      guest_id:    row.get(1)?,
      document_id: row.get(2)?,
      clause_id:   row.get(3)?,
      result:      row.get(4)?,
      created_at:  row.get(5)?,
    })
  }

  fn decode(raw: RawAiEdit) -> Result<AiEdit> {
    Ok(AiEdit {
      edit_id:     decode_uuid(&raw.edit_id)?,
      guest_id:    decode_uuid(&raw.guest_id)?,
      document_id: decode_uuid(&raw.document_id)?,
      clause_id:   raw.clause_id.as_deref().map(decode_uuid).transpose()?,
      result:      raw.result,
      created_at:  decode_dt(&raw.created_at)?,
    })
  }
}

pub struct RawChatMessage {
  pub message_id:      String,
  pub guest_id:        String,
  pub conversation_id: String,
  pub role:            String,
  pub content:         String,
  pub created_at:      String,
}

impl FromRaw for ChatMessage {
  type Raw = RawChatMessage;

  const TABLE: SyncTable = SyncTable::ChatMessages;
  const COLUMNS: &'static str =
    "message_id, guest_id, conversation_id, role, content, created_at";

  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChatMessage> {
    Ok(RawChatMessage {
      message_id:      row.get(0)?,
      guest_id:        row.get(1)?,
      conversation_id: row.get(2)?,
      role:            row.get(3)?,
      content:         row.get(4)?,
      created_at:      row.get(5)?,
    })
  }

  fn decode(raw: RawChatMessage) -> Result<ChatMessage> {
    Ok(ChatMessage {
      message_id:      decode_uuid(&raw.message_id)?,
      guest_id:        decode_uuid(&raw.guest_id)?,
      conversation_id: decode_uuid(&raw.conversation_id)?,
      role:            ChatRole::parse(&raw.role)?,
      content:         raw.content,
      created_at:      decode_dt(&raw.created_at)?,
    })
  }
}

pub struct RawAutocomplete {
  pub entry_id:   String,
  pub guest_id:   String,
  pub prompt:     String,
  pub suggestion: String,
  pub created_at: String,
}

impl FromRaw for AutocompleteEntry {
  type Raw = RawAutocomplete;

  const TABLE: SyncTable = SyncTable::AutocompleteCache;
  const COLUMNS: &'static str =
    "entry_id, guest_id, prompt, suggestion, created_at";

  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAutocomplete> {
    Ok(RawAutocomplete {
      entry_id:   row.get(0)?,
      guest_id:   row.get(1)?,
      prompt:     row.get(2)?,
      suggestion: row.get(3)?,
      created_at: row.get(4)?,
    })
  }

  fn decode(raw: RawAutocomplete) -> Result<AutocompleteEntry> {
    Ok(AutocompleteEntry {
      entry_id:   decode_uuid(&raw.entry_id)?,
      guest_id:   decode_uuid(&raw.guest_id)?,
      prompt:     raw.prompt,
      suggestion: raw.suggestion,
      created_at: decode_dt(&raw.created_at)?,
    })
  }
}
