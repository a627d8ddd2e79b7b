//! Syncable entity types.
//!
//! Every entity is owned by a guest and mirrored between the client-local
//! store and the remote store. `Document` and `Clause` are mutable; the other
//! three are create-only and never change after they are written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Document ────────────────────────────────────────────────────────────────

/// Where a document is in its editing lifecycle.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
  #[default]
  Draft,
  Active,
  Signed,
  Archived,
}

impl DocumentStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Draft => "draft",
      Self::Active => "active",
      Self::Signed => "signed",
      Self::Archived => "archived",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "draft" => Ok(Self::Draft),
      "active" => Ok(Self::Active),
      "signed" => Ok(Self::Signed),
      "archived" => Ok(Self::Archived),
      other => Err(Error::UnknownVariant {
        kind:  "document status",
        value: other.to_owned(),
      }),
    }
  }
}

/// A contract document. The editor's rich-text tree lives in `content` as an
/// opaque JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub document_id: Uuid,
  pub guest_id:    Uuid,
  pub title:       String,
  pub status:      DocumentStatus,
  pub content:     serde_json::Value,
  pub created_at:  DateTime<Utc>,
  /// Assigned by the writing device's DAO; drives last-writer-wins.
  pub updated_at:  DateTime<Utc>,
}

impl Document {
  /// A fresh draft with an empty body.
  pub fn new(guest_id: Uuid, title: impl Into<String>) -> Self {
    let now = crate::now();
    Self {
      document_id: Uuid::new_v4(),
      guest_id,
      title: title.into(),
      status: DocumentStatus::default(),
      content: serde_json::Value::Null,
      created_at: now,
      updated_at: now,
    }
  }
}

// ─── Clause ──────────────────────────────────────────────────────────────────

/// One ordered clause of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
  pub clause_id:    Uuid,
  pub document_id:  Uuid,
  pub guest_id:     Uuid,
  pub order_index:  i64,
  pub title:        String,
  pub body:         String,
  /// SHA-256 hex digest of `body`; recomputed by the DAO on every write.
  pub content_hash: String,
  pub updated_at:   DateTime<Utc>,
}

impl Clause {
  pub fn new(
    document_id: Uuid,
    guest_id: Uuid,
    order_index: i64,
    title: impl Into<String>,
    body: impl Into<String>,
  ) -> Self {
    Self {
      clause_id: Uuid::new_v4(),
      document_id,
      guest_id,
      order_index,
      title: title.into(),
      body: body.into(),
      content_hash: String::new(),
      updated_at: crate::now(),
    }
  }
}

// ─── Create-only entities ────────────────────────────────────────────────────

/// The result of one AI-assisted edit against a document or clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiEdit {
  pub edit_id:     Uuid,
  pub guest_id:    Uuid,
  pub document_id: Uuid,
  pub clause_id:   Option<Uuid>,
  /// Diff or replacement text, as produced by the completion backend.
  pub result:      String,
  pub created_at:  DateTime<Utc>,
}

impl AiEdit {
  pub fn new(
    guest_id: Uuid,
    document_id: Uuid,
    clause_id: Option<Uuid>,
    result: impl Into<String>,
  ) -> Self {
    Self {
      edit_id: Uuid::new_v4(),
      guest_id,
      document_id,
      clause_id,
      result: result.into(),
      created_at: crate::now(),
    }
  }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
  User,
  Assistant,
  System,
}

impl ChatRole {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::User => "user",
      Self::Assistant => "assistant",
      Self::System => "system",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "user" => Ok(Self::User),
      "assistant" => Ok(Self::Assistant),
      "system" => Ok(Self::System),
      other => Err(Error::UnknownVariant {
        kind:  "chat role",
        value: other.to_owned(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub message_id:      Uuid,
  pub guest_id:        Uuid,
  pub conversation_id: Uuid,
  pub role:            ChatRole,
  pub content:         String,
  pub created_at:      DateTime<Utc>,
}

impl ChatMessage {
  pub fn new(
    guest_id: Uuid,
    conversation_id: Uuid,
    role: ChatRole,
    content: impl Into<String>,
  ) -> Self {
    Self {
      message_id: Uuid::new_v4(),
      guest_id,
      conversation_id,
      role,
      content: content.into(),
      created_at: crate::now(),
    }
  }
}

/// A cached completion suggestion, scoped to a guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocompleteEntry {
  pub entry_id:   Uuid,
  pub guest_id:   Uuid,
  pub prompt:     String,
  pub suggestion: String,
  pub created_at: DateTime<Utc>,
}

impl AutocompleteEntry {
  pub fn new(
    guest_id: Uuid,
    prompt: impl Into<String>,
    suggestion: impl Into<String>,
  ) -> Self {
    Self {
      entry_id: Uuid::new_v4(),
      guest_id,
      prompt: prompt.into(),
      suggestion: suggestion.into(),
      created_at: crate::now(),
    }
  }
}
