//! [`SqliteLocalStore`]: the client-side DAO, outbox and flag store.

use std::path::Path;

use chrono::{DateTime, SubsecRound as _, TimeDelta, Utc};
use numbly_core::{
  entity::{AiEdit, AutocompleteEntry, ChatMessage, Clause, Document},
  flags::GuestFlags,
  mutation::{Mutation, Operation, OutboxEntry, Record, SyncTable},
  pull::{MergeReport, PullBundle},
  store::{LocalStore, Outbox},
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    FromRaw, content_hash, decode_all, decode_dt, decode_uuid, encode_dt,
    encode_record, encode_uuid,
  },
  rows,
  schema::local_schema,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A device-local store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteLocalStore {
  conn: tokio_rusqlite::Connection,
}

/// An outbox row encoded for insertion.
struct NewOutboxRow {
  table:       &'static str,
  operation:   &'static str,
  entity_id:   String,
  payload:     String,
  enqueued_at: String,
}

impl NewOutboxRow {
  fn from_mutation(mutation: &Mutation) -> Result<Self> {
    Ok(Self {
      table:       mutation.table().as_str(),
      operation:   mutation.operation().as_str(),
      entity_id:   encode_uuid(mutation.entity_id()),
      payload:     mutation.payload()?.to_string(),
      enqueued_at: encode_dt(numbly_core::now()),
    })
  }

  fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
      "INSERT INTO outbox (table_name, operation, entity_id, payload, enqueued_at)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      rusqlite::params![
        self.table,
        self.operation,
        self.entity_id,
        self.payload,
        self.enqueued_at,
      ],
    )?;
    Ok(())
  }
}

/// Raw strings read directly from an `outbox` row.
struct RawOutboxEntry {
  seq:         i64,
  table_name:  String,
  operation:   String,
  entity_id:   String,
  payload:     String,
  enqueued_at: String,
  attempts:    i64,
  last_error:  Option<String>,
}

impl RawOutboxEntry {
  fn into_entry(self) -> Result<OutboxEntry> {
    Ok(OutboxEntry {
      seq:         self.seq,
      table:       SyncTable::parse(&self.table_name)?,
      operation:   Operation::parse(&self.operation)?,
      entity_id:   decode_uuid(&self.entity_id)?,
      payload:     serde_json::from_str(&self.payload)?,
      enqueued_at: decode_dt(&self.enqueued_at)?,
      attempts:    u32::try_from(self.attempts).unwrap_or(u32::MAX),
      last_error:  self.last_error,
    })
  }
}

impl SqliteLocalStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let schema = local_schema();
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&schema)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The stored LWW version of a row, if it exists.
  async fn stored_version(&self, table: SyncTable, id: Uuid) -> Result<Option<String>> {
    let id_str = encode_uuid(id);
    let version = self
      .conn
      .call(move |conn| {
        Ok(rows::stored_row(conn, table, &id_str)?.map(|(version, _)| version))
      })
      .await?;
    Ok(version)
  }

  /// Write a record and enqueue its upsert in one transaction.
  ///
  /// Under [`Expect::Version`] nothing is written unless the stored version
  /// is still the one given; returns `false` in that case.
  async fn write_and_enqueue(&self, record: Record, expect: Expect) -> Result<bool> {
    let row = encode_record(&record)?;
    let entry = NewOutboxRow::from_mutation(&Mutation::Upsert { record })?;

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if let Expect::Version(seen) = &expect {
          let current = rows::stored_row(&tx, row.table, &row.entity_id)?
            .map(|(version, _)| version);
          if current != *seen {
            return Ok(false);
          }
        }
        rows::write_row(&tx, &row, None)?;
        entry.insert(&tx)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;
    Ok(written)
  }

  /// Stamp an edited row past its stored version, write it and enqueue it.
  async fn edit_and_enqueue(
    &self,
    table: SyncTable,
    id: Uuid,
    mut stamp: impl FnMut(DateTime<Utc>) -> Record + Send,
  ) -> Result<()> {
    loop {
      let seen = self.stored_version(table, id).await?;
      let record = stamp(next_version(seen.as_deref())?);
      if self.write_and_enqueue(record, Expect::Version(seen)).await? {
        return Ok(());
      }
    }
  }

  /// Delete a row (and a document's clauses) and enqueue the delete.
  async fn delete_and_enqueue(&self, table: SyncTable, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);

    loop {
      let lookup_id = id_str.clone();
      let stored: Option<(String, String)> = self
        .conn
        .call(move |conn| Ok(rows::stored_row(conn, table, &lookup_id)?))
        .await?;
      let (seen, owner) = stored.ok_or(Error::NotFound {
        table: table.as_str(),
        id,
      })?;

      let mutation = Mutation::Delete {
        table,
        entity_id: id,
        guest_id: decode_uuid(&owner)?,
        deleted_at: next_version(Some(&seen))?,
      };
      let entry = NewOutboxRow::from_mutation(&mutation)?;

      let tx_id = id_str.clone();
      let outcome = self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          match rows::stored_row(&tx, table, &tx_id)? {
            None => return Ok(DeleteOutcome::Missing),
            Some((version, _)) if version != seen => return Ok(DeleteOutcome::Moved),
            Some(_) => {}
          }
          rows::delete_row(&tx, table, &tx_id)?;
          if table == SyncTable::Documents {
            tx.execute(
              "DELETE FROM clauses WHERE document_id = ?1",
              rusqlite::params![tx_id],
            )?;
          }
          entry.insert(&tx)?;
          tx.commit()?;
          Ok(DeleteOutcome::Deleted)
        })
        .await?;

      match outcome {
        DeleteOutcome::Deleted => return Ok(()),
        DeleteOutcome::Moved => continue,
        DeleteOutcome::Missing => {
          return Err(Error::NotFound {
            table: table.as_str(),
            id,
          });
        }
      }
    }
  }

  /// All rows of `T` matching `tail`, bound to a single text parameter.
  async fn list<T>(&self, tail: &'static str, key: String) -> Result<Vec<T>>
  where
    T: FromRaw + 'static,
  {
    let raws = self
      .conn
      .call(move |conn| Ok(rows::select::<T>(conn, tail, rusqlite::params![key])?))
      .await?;
    decode_all::<T>(raws)
  }
}

fn normalise(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

/// Precondition for [`SqliteLocalStore::write_and_enqueue`].
enum Expect {
  /// Create-only rows: write unconditionally.
  Any,
  /// The stored version the new one was derived from.
  Version(Option<String>),
}

enum DeleteOutcome {
  Deleted,
  Missing,
  /// The row changed under us, usually through a pull merge.
  Moved,
}

/// The version for a local edit: the current time, or one microsecond past
/// the stored version when that is later. An edit always beats the copy it
/// was made from, whatever clock stamped that copy.
fn next_version(stored: Option<&str>) -> Result<DateTime<Utc>> {
  let now = numbly_core::now();
  Ok(match stored {
    Some(version) => now.max(decode_dt(version)? + TimeDelta::microseconds(1)),
    None => now,
  })
}

// ─── LocalStore impl ─────────────────────────────────────────────────────────

impl LocalStore for SqliteLocalStore {
  type Error = Error;

  async fn guest_id(&self) -> Result<Uuid> {
    let fresh = encode_uuid(Uuid::new_v4());
    let stored: String = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO local_meta (key, value) VALUES ('guest_id', ?1)",
          rusqlite::params![fresh],
        )?;
        Ok(conn.query_row(
          "SELECT value FROM local_meta WHERE key = 'guest_id'",
          [],
          |r| r.get(0),
        )?)
      })
      .await?;
    decode_uuid(&stored)
  }

  // ── DAO writes ────────────────────────────────────────────────────────────

  async fn upsert_document(&self, mut doc: Document) -> Result<Document> {
    doc.created_at = normalise(doc.created_at);
    let id = doc.document_id;
    self
      .edit_and_enqueue(SyncTable::Documents, id, |version| {
        doc.updated_at = version;
        Record::Documents(doc.clone())
      })
      .await?;
    Ok(doc)
  }

  async fn upsert_clause(&self, mut clause: Clause) -> Result<Clause> {
    clause.content_hash = content_hash(&clause.body);
    let id = clause.clause_id;
    self
      .edit_and_enqueue(SyncTable::Clauses, id, |version| {
        clause.updated_at = version;
        Record::Clauses(clause.clone())
      })
      .await?;
    Ok(clause)
  }

  async fn delete_document(&self, id: Uuid) -> Result<()> {
    self.delete_and_enqueue(SyncTable::Documents, id).await
  }

  async fn delete_clause(&self, id: Uuid) -> Result<()> {
    self.delete_and_enqueue(SyncTable::Clauses, id).await
  }

  async fn record_ai_edit(&self, mut edit: AiEdit) -> Result<AiEdit> {
    edit.created_at = normalise(edit.created_at);
    self
      .write_and_enqueue(Record::AiEdits(edit.clone()), Expect::Any)
      .await?;
    Ok(edit)
  }

  async fn record_chat_message(&self, mut message: ChatMessage) -> Result<ChatMessage> {
    message.created_at = normalise(message.created_at);
    self
      .write_and_enqueue(Record::ChatMessages(message.clone()), Expect::Any)
      .await?;
    Ok(message)
  }

  async fn cache_autocomplete(
    &self,
    mut entry: AutocompleteEntry,
  ) -> Result<AutocompleteEntry> {
    entry.created_at = normalise(entry.created_at);
    self
      .write_and_enqueue(Record::AutocompleteCache(entry.clone()), Expect::Any)
      .await?;
    Ok(entry)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
    let mut docs = self
      .list::<Document>("WHERE document_id = ?1", encode_uuid(id))
      .await?;
    Ok(docs.pop())
  }

  async fn list_documents(&self, guest_id: Uuid) -> Result<Vec<Document>> {
    self
      .list("WHERE guest_id = ?1 ORDER BY updated_at DESC", encode_uuid(guest_id))
      .await
  }

  async fn list_clauses(&self, document_id: Uuid) -> Result<Vec<Clause>> {
    self
      .list(
        "WHERE document_id = ?1 ORDER BY order_index, clause_id",
        encode_uuid(document_id),
      )
      .await
  }

  async fn list_ai_edits(&self, document_id: Uuid) -> Result<Vec<AiEdit>> {
    self
      .list("WHERE document_id = ?1 ORDER BY created_at", encode_uuid(document_id))
      .await
  }

  async fn list_chat_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>> {
    self
      .list(
        "WHERE conversation_id = ?1 ORDER BY created_at, message_id",
        encode_uuid(conversation_id),
      )
      .await
  }

  async fn list_autocomplete(&self, guest_id: Uuid) -> Result<Vec<AutocompleteEntry>> {
    self
      .list("WHERE guest_id = ?1 ORDER BY created_at DESC", encode_uuid(guest_id))
      .await
  }

  // ── Pull merge ────────────────────────────────────────────────────────────

  async fn apply_pulled(&self, bundle: PullBundle) -> Result<MergeReport> {
    let records = bundle
      .documents
      .into_iter()
      .map(Record::Documents)
      .chain(bundle.clauses.into_iter().map(Record::Clauses))
      .chain(bundle.ai_edits.into_iter().map(Record::AiEdits))
      .chain(bundle.chat_messages.into_iter().map(Record::ChatMessages))
      .chain(
        bundle
          .autocomplete_cache
          .into_iter()
          .map(Record::AutocompleteCache),
      );
    let raw_rows = records
      .map(|r| encode_record(&r))
      .collect::<Result<Vec<_>>>()?;
    let tombstones: Vec<(SyncTable, String)> = bundle
      .deleted_items
      .iter()
      .map(|t| (t.table, encode_uuid(t.entity_id)))
      .collect();
    let synced_at = encode_dt(bundle.sync_timestamp);

    let report = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut report = MergeReport::default();

        for row in &raw_rows {
          match rows::stored_row(&tx, row.table, &row.entity_id)? {
            // Last-writer-wins: a newer local edit is kept; its own outbox
            // entry will carry it to the remote.
            Some((local_version, _)) if local_version > row.version => {
              report.stale += 1;
            }
            _ => {
              rows::write_row(&tx, row, Some(&synced_at))?;
              report.applied += 1;
            }
          }
        }

        for (table, entity_id) in &tombstones {
          report.deleted += rows::delete_row(&tx, *table, entity_id)?;
          if *table == SyncTable::Documents {
            report.deleted += tx.execute(
              "DELETE FROM clauses WHERE document_id = ?1",
              rusqlite::params![entity_id],
            )?;
          }
        }

        tx.commit()?;
        Ok(report)
      })
      .await?;

    tracing::debug!(
      applied = report.applied,
      stale = report.stale,
      deleted = report.deleted,
      "merged pulled rows"
    );
    Ok(report)
  }

  async fn last_sync(&self, guest_id: Uuid) -> Result<Option<DateTime<Utc>>> {
    let guest_str = encode_uuid(guest_id);
    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT last_sync FROM sync_meta WHERE guest_id = ?1",
            rusqlite::params![guest_str],
            |r| r.get(0),
          )
          .optional()?)
      })
      .await?;
    raw.as_deref().map(decode_dt).transpose()
  }

  async fn set_last_sync(&self, guest_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    let guest_str = encode_uuid(guest_id);
    let at_str = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sync_meta (guest_id, last_sync) VALUES (?1, ?2)
           ON CONFLICT(guest_id) DO UPDATE SET last_sync = excluded.last_sync",
          rusqlite::params![guest_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Usage gate ────────────────────────────────────────────────────────────

  async fn flags(&self, guest_id: Uuid) -> Result<GuestFlags> {
    let guest_str = encode_uuid(guest_id);
    let raw: Option<(bool, String)> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT free_ai_used, features_unlocked FROM flags WHERE guest_id = ?1",
            rusqlite::params![guest_str],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?)
      })
      .await?;

    match raw {
      None => Ok(GuestFlags::new(guest_id)),
      Some((free_ai_used, features)) => Ok(GuestFlags {
        guest_id,
        free_ai_used,
        features_unlocked: serde_json::from_str(&features)?,
      }),
    }
  }

  async fn can_use_ai(&self, guest_id: Uuid, feature: &str) -> Result<bool> {
    Ok(self.flags(guest_id).await?.can_use_ai(feature))
  }

  async fn mark_free_ai_used(&self, guest_id: Uuid) -> Result<GuestFlags> {
    let guest_str = encode_uuid(guest_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO flags (guest_id, free_ai_used) VALUES (?1, 1)
           ON CONFLICT(guest_id) DO UPDATE SET free_ai_used = 1",
          rusqlite::params![guest_str],
        )?;
        Ok(())
      })
      .await?;
    self.flags(guest_id).await
  }

  async fn unlock_feature(&self, guest_id: Uuid, feature: &str) -> Result<GuestFlags> {
    let guest_str = encode_uuid(guest_id);
    let feature = feature.to_owned();

    // Read-modify-write inside one transaction so concurrent unlocks of
    // different features cannot drop each other.
    let (free_ai_used, features_json) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<(bool, String)> = tx
          .query_row(
            "SELECT free_ai_used, features_unlocked FROM flags WHERE guest_id = ?1",
            rusqlite::params![guest_str],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        let (free_ai_used, json) = current.unwrap_or((false, "[]".to_owned()));

        let mut features: Vec<String> = serde_json::from_str(&json)
          .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
        if !features.contains(&feature) {
          features.push(feature);
        }
        let json = serde_json::to_string(&features)
          .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;

        tx.execute(
          "INSERT INTO flags (guest_id, free_ai_used, features_unlocked)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(guest_id) DO UPDATE SET features_unlocked = excluded.features_unlocked",
          rusqlite::params![guest_str, free_ai_used, json],
        )?;
        tx.commit()?;
        Ok((free_ai_used, json))
      })
      .await?;

    Ok(GuestFlags {
      guest_id,
      free_ai_used,
      features_unlocked: serde_json::from_str(&features_json)?,
    })
  }
}

// ─── Outbox impl ─────────────────────────────────────────────────────────────

impl Outbox for SqliteLocalStore {
  type Error = Error;

  async fn pending(&self, limit: Option<usize>) -> Result<Vec<OutboxEntry>> {
    // SQLite treats a negative LIMIT as "no limit".
    let limit_val = limit.map_or(-1, |l| l as i64);

    let raws: Vec<RawOutboxEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT seq, table_name, operation, entity_id, payload, enqueued_at,
                  attempts, last_error
           FROM outbox
           ORDER BY seq
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], |row| {
            Ok(RawOutboxEntry {
              seq:         row.get(0)?,
              table_name:  row.get(1)?,
              operation:   row.get(2)?,
              entity_id:   row.get(3)?,
              payload:     row.get(4)?,
              enqueued_at: row.get(5)?,
              attempts:    row.get(6)?,
              last_error:  row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutboxEntry::into_entry).collect()
  }

  async fn ack(&self, seq: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM outbox WHERE seq = ?1", rusqlite::params![seq])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_failure(&self, seq: i64, error: String) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE outbox SET attempts = attempts + 1, last_error = ?2 WHERE seq = ?1",
          rusqlite::params![seq, error],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn outbox_len(&self) -> Result<usize> {
    let n: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM outbox", [], |r| r.get(0))?)
      })
      .await?;
    Ok(n as usize)
  }
}
