//! Storage traits for both ends of the sync link.
//!
//! - [`LocalStore`] is the client-side DAO. Every mutation of a syncable table
//!   goes through it so that exactly one outbox entry is enqueued per write.
//! - [`Outbox`] is the queue view of the same local store that the pusher
//!   drains. It is a separate trait so the pusher needs nothing else.
//! - [`RemoteStore`] is the durable, multi-device source of truth. It is
//!   implemented by the SQLite server store and by the HTTP client.
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes (e.g. tokio with `axum`).

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  entity::{AiEdit, AutocompleteEntry, ChatMessage, Clause, Document},
  flags::GuestFlags,
  mutation::{Applied, Mutation, OutboxEntry},
  pull::{MergeReport, PullBundle, PullRequest},
};

// ─── Local store ─────────────────────────────────────────────────────────────

pub trait LocalStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The guest id of this device, generated on first use.
  fn guest_id(&self) -> impl Future<Output = Result<Uuid, Self::Error>> + Send + '_;

  // ── DAO writes: each one enqueues exactly one outbox entry ────────────

  /// Insert or replace a document. `updated_at` is set by the store.
  fn upsert_document(
    &self,
    doc: Document,
  ) -> impl Future<Output = Result<Document, Self::Error>> + Send + '_;

  /// Insert or replace a clause. `updated_at` and `content_hash` are set by
  /// the store.
  fn upsert_clause(
    &self,
    clause: Clause,
  ) -> impl Future<Output = Result<Clause, Self::Error>> + Send + '_;

  /// Delete a document and, locally, its clauses. Errors if it is missing.
  fn delete_document(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Delete a clause. Errors if it is missing.
  fn delete_clause(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn record_ai_edit(
    &self,
    edit: AiEdit,
  ) -> impl Future<Output = Result<AiEdit, Self::Error>> + Send + '_;

  fn record_chat_message(
    &self,
    message: ChatMessage,
  ) -> impl Future<Output = Result<ChatMessage, Self::Error>> + Send + '_;

  fn cache_autocomplete(
    &self,
    entry: AutocompleteEntry,
  ) -> impl Future<Output = Result<AutocompleteEntry, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_document(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + '_;

  fn list_documents(
    &self,
    guest_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + '_;

  /// Clauses of a document, ordered by `order_index`.
  fn list_clauses(
    &self,
    document_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Clause>, Self::Error>> + Send + '_;

  fn list_ai_edits(
    &self,
    document_id: Uuid,
  ) -> impl Future<Output = Result<Vec<AiEdit>, Self::Error>> + Send + '_;

  /// Messages of a conversation, oldest first.
  fn list_chat_messages(
    &self,
    conversation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ChatMessage>, Self::Error>> + Send + '_;

  fn list_autocomplete(
    &self,
    guest_id: Uuid,
  ) -> impl Future<Output = Result<Vec<AutocompleteEntry>, Self::Error>> + Send + '_;

  // ── Pull merge ────────────────────────────────────────────────────────

  /// Merge remote rows and tombstones without enqueuing outbox entries.
  fn apply_pulled(
    &self,
    bundle: PullBundle,
  ) -> impl Future<Output = Result<MergeReport, Self::Error>> + Send + '_;

  /// The `sync_timestamp` of this guest's last successful pull.
  fn last_sync(
    &self,
    guest_id: Uuid,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  fn set_last_sync(
    &self,
    guest_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Usage gate ────────────────────────────────────────────────────────

  /// The guest's flags; a fresh record if none exists yet.
  fn flags(
    &self,
    guest_id: Uuid,
  ) -> impl Future<Output = Result<GuestFlags, Self::Error>> + Send + '_;

  fn can_use_ai<'a>(
    &'a self,
    guest_id: Uuid,
    feature: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Consume the free AI use. Idempotent; creates the record if absent.
  fn mark_free_ai_used(
    &self,
    guest_id: Uuid,
  ) -> impl Future<Output = Result<GuestFlags, Self::Error>> + Send + '_;

  fn unlock_feature<'a>(
    &'a self,
    guest_id: Uuid,
    feature: &'a str,
  ) -> impl Future<Output = Result<GuestFlags, Self::Error>> + Send + 'a;
}

// ─── Outbox ──────────────────────────────────────────────────────────────────

pub trait Outbox: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Pending entries in insertion order, at most `limit` of them.
  fn pending(
    &self,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<OutboxEntry>, Self::Error>> + Send + '_;

  /// Remove a delivered entry. Acking a missing entry is not an error.
  fn ack(&self, seq: i64) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record a failed delivery attempt; the entry stays queued.
  fn record_failure(
    &self,
    seq: i64,
    error: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn outbox_len(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}

// ─── Remote store ────────────────────────────────────────────────────────────

pub trait RemoteStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Apply one mutation on behalf of `guest_id`. Idempotent: applying the
  /// same mutation twice leaves one row and returns no error.
  fn apply(
    &self,
    guest_id: Uuid,
    mutation: Mutation,
  ) -> impl Future<Output = Result<Applied, Self::Error>> + Send + '_;

  /// Everything owned by the guest that changed after `last_sync`.
  fn pull(
    &self,
    request: PullRequest,
  ) -> impl Future<Output = Result<PullBundle, Self::Error>> + Send + '_;
}
