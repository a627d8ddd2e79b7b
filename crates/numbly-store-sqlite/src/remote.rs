//! [`SqliteRemoteStore`]: the server-side source of truth.
//!
//! Every write is stamped with `synced_at` from a [`ChangeClock`] that never
//! goes backwards, and pulls return rows stamped strictly after the caller's
//! watermark. Stamps are taken on the connection thread, inside the same
//! closure as the write or read they belong to, so a write that lands after a
//! pull always carries a stamp greater than that pull's `sync_timestamp`.

use std::{
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
  },
};

use chrono::{DateTime, Utc};
use numbly_core::{
  entity::{AiEdit, AutocompleteEntry, ChatMessage, Clause, Document},
  mutation::{Applied, Mutation, SyncTable, Tombstone},
  pull::{PullBundle, PullRequest},
  store::RemoteStore,
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    RawAiEdit, RawAutocomplete, RawChatMessage, RawClause,
    RawDocument, RawRow, decode_all, decode_dt, decode_uuid, encode_dt,
    encode_record, encode_uuid,
  },
  rows,
  schema::remote_schema,
};

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Strictly increasing microsecond clock for server change stamps.
#[derive(Debug, Default)]
pub struct ChangeClock {
  last_micros: AtomicI64,
}

impl ChangeClock {
  /// Never hand out a stamp at or below `floor`.
  pub fn seed(&self, floor: DateTime<Utc>) {
    self
      .last_micros
      .fetch_max(floor.timestamp_micros(), Ordering::SeqCst);
  }

  /// The current time, or one microsecond past the previous stamp if the
  /// wall clock has not moved forward.
  pub fn tick(&self) -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let prev = self
      .last_micros
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
      })
      .unwrap_or_else(|last| last);
    let stamp = now.max(prev + 1);
    DateTime::from_timestamp_micros(stamp).unwrap_or_default()
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// The remote store backed by a single SQLite file.
///
/// Cloning is cheap; the connection and clock are reference-counted.
#[derive(Clone)]
pub struct SqliteRemoteStore {
  conn:  tokio_rusqlite::Connection,
  clock: Arc<ChangeClock>,
}

/// The per-guest pull watermark, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
  pub guest_id:       Uuid,
  pub last_pull_at:   DateTime<Utc>,
  /// The watermark the guest supplied on that pull; `None` for a full resync.
  pub last_watermark: Option<DateTime<Utc>>,
}

/// Result of a write attempted on the connection thread.
enum Outcome {
  Applied(Applied),
  /// The row or tombstone is owned by another guest.
  Foreign(String),
}

/// Raw rows collected by a pull before decoding.
struct RawBundle {
  documents:          Vec<RawDocument>,
  clauses:            Vec<RawClause>,
  ai_edits:           Vec<RawAiEdit>,
  chat_messages:      Vec<RawChatMessage>,
  autocomplete_cache: Vec<RawAutocomplete>,
  /// `(table_name, entity_id, guest_id, deleted_at)`
  deleted_items:      Vec<(String, String, String, String)>,
  sync_timestamp:     DateTime<Utc>,
}

const CHANGED_SINCE: &str = "WHERE guest_id = ?1 AND synced_at > ?2 ORDER BY synced_at";

impl SqliteRemoteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let schema = remote_schema();
    let latest: Option<String> = conn
      .call(move |conn| {
        conn.execute_batch(&schema)?;
        Ok(conn.query_row(
          "SELECT MAX(stamp) FROM (
             SELECT MAX(synced_at)  AS stamp FROM documents
             UNION ALL SELECT MAX(synced_at)  FROM clauses
             UNION ALL SELECT MAX(synced_at)  FROM ai_edits
             UNION ALL SELECT MAX(synced_at)  FROM chat_messages
             UNION ALL SELECT MAX(synced_at)  FROM autocomplete_cache
             UNION ALL SELECT MAX(deleted_at) FROM deleted_items
             UNION ALL SELECT MAX(last_pull_at) FROM sync_state
           )",
          [],
          |r| r.get(0),
        )?)
      })
      .await?;

    let clock = Arc::new(ChangeClock::default());
    if let Some(latest) = latest {
      clock.seed(decode_dt(&latest)?);
    }
    Ok(Self { conn, clock })
  }

  /// The watermark recorded on the guest's most recent pull.
  pub async fn sync_state(&self, guest_id: Uuid) -> Result<Option<SyncState>> {
    let guest_str = encode_uuid(guest_id);
    let raw: Option<(String, Option<String>)> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT last_pull_at, last_watermark FROM sync_state WHERE guest_id = ?1",
            rusqlite::params![guest_str],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?)
      })
      .await?;

    raw
      .map(|(pulled, watermark)| -> Result<SyncState> {
        Ok(SyncState {
          guest_id,
          last_pull_at: decode_dt(&pulled)?,
          last_watermark: watermark.as_deref().map(decode_dt).transpose()?,
        })
      })
      .transpose()
  }
}

// ─── Write paths (connection thread) ─────────────────────────────────────────

fn tombstone_of(
  conn: &rusqlite::Connection,
  table: SyncTable,
  entity_id: &str,
) -> rusqlite::Result<Option<(String, String)>> {
  conn
    .query_row(
      "SELECT requested_at, guest_id FROM deleted_items
       WHERE table_name = ?1 AND entity_id = ?2",
      rusqlite::params![table.as_str(), entity_id],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
}

fn upsert_row(
  conn: &rusqlite::Connection,
  row: &RawRow,
  clock: &ChangeClock,
) -> rusqlite::Result<Outcome> {
  if let Some((version, owner)) = rows::stored_row(conn, row.table, &row.entity_id)? {
    if owner != row.guest_id {
      return Ok(Outcome::Foreign(owner));
    }
    if version > row.version {
      return Ok(Outcome::Applied(Applied::Stale));
    }
  }

  if let Some((requested_at, owner)) = tombstone_of(conn, row.table, &row.entity_id)? {
    if owner != row.guest_id {
      return Ok(Outcome::Foreign(owner));
    }
    // A delete wins ties; only a strictly later edit resurrects the row.
    if row.version <= requested_at {
      return Ok(Outcome::Applied(Applied::Stale));
    }
  }

  let stamp = encode_dt(clock.tick());
  rows::write_row(conn, row, Some(&stamp))?;
  conn.execute(
    "DELETE FROM deleted_items WHERE table_name = ?1 AND entity_id = ?2",
    rusqlite::params![row.table.as_str(), row.entity_id],
  )?;
  Ok(Outcome::Applied(Applied::Written))
}

fn insert_tombstone(
  conn: &rusqlite::Connection,
  table: SyncTable,
  entity_id: &str,
  guest_id: &str,
  stamp: &str,
  requested_at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO deleted_items (table_name, entity_id, guest_id, deleted_at, requested_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(table_name, entity_id) DO UPDATE SET
       deleted_at = excluded.deleted_at, requested_at = excluded.requested_at",
    rusqlite::params![table.as_str(), entity_id, guest_id, stamp, requested_at],
  )?;
  Ok(())
}

fn delete_row(
  conn: &rusqlite::Connection,
  table: SyncTable,
  entity_id: &str,
  guest_id: &str,
  requested_at: &str,
  clock: &ChangeClock,
) -> rusqlite::Result<Outcome> {
  match rows::stored_row(conn, table, entity_id)? {
    Some((version, owner)) => {
      if owner != guest_id {
        return Ok(Outcome::Foreign(owner));
      }
      if version.as_str() > requested_at {
        return Ok(Outcome::Applied(Applied::Stale));
      }
    }
    None => {
      if let Some((_, owner)) = tombstone_of(conn, table, entity_id)? {
        if owner != guest_id {
          return Ok(Outcome::Foreign(owner));
        }
        // Already deleted; a redelivered delete changes nothing.
        return Ok(Outcome::Applied(Applied::Written));
      }
    }
  }

  let stamp = encode_dt(clock.tick());
  rows::delete_row(conn, table, entity_id)?;
  insert_tombstone(conn, table, entity_id, guest_id, &stamp, requested_at)?;

  if table == SyncTable::Documents {
    let clause_ids: Vec<String> = {
      let mut stmt =
        conn.prepare("SELECT clause_id FROM clauses WHERE document_id = ?1")?;
      stmt
        .query_map(rusqlite::params![entity_id], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };
    for clause_id in &clause_ids {
      rows::delete_row(conn, SyncTable::Clauses, clause_id)?;
      insert_tombstone(
        conn,
        SyncTable::Clauses,
        clause_id,
        guest_id,
        &stamp,
        requested_at,
      )?;
    }
  }

  Ok(Outcome::Applied(Applied::Written))
}

// ─── RemoteStore impl ────────────────────────────────────────────────────────

impl RemoteStore for SqliteRemoteStore {
  type Error = Error;

  async fn apply(&self, guest_id: Uuid, mutation: Mutation) -> Result<Applied> {
    mutation.check_guest(guest_id)?;

    let table = mutation.table();
    let entity_id = mutation.entity_id();
    let clock = Arc::clone(&self.clock);

    let outcome = match mutation {
      Mutation::Upsert { record } => {
        let row = encode_record(&record)?;
        self
          .conn
          .call(move |conn| {
            let tx = conn.transaction()?;
            let outcome = upsert_row(&tx, &row, &clock)?;
            tx.commit()?;
            Ok(outcome)
          })
          .await?
      }
      Mutation::Delete {
        deleted_at,
        ..
      } => {
        let id_str = encode_uuid(entity_id);
        let guest_str = encode_uuid(guest_id);
        let requested_at = encode_dt(deleted_at);
        self
          .conn
          .call(move |conn| {
            let tx = conn.transaction()?;
            let outcome =
              delete_row(&tx, table, &id_str, &guest_str, &requested_at, &clock)?;
            tx.commit()?;
            Ok(outcome)
          })
          .await?
      }
    };

    match outcome {
      Outcome::Applied(applied) => {
        tracing::debug!(
          table = table.as_str(),
          %entity_id,
          ?applied,
          "applied mutation"
        );
        Ok(applied)
      }
      Outcome::Foreign(owner) => Err(Error::Core(numbly_core::Error::ForeignRow {
        table: table.as_str(),
        id: entity_id,
        owner,
      })),
    }
  }

  async fn pull(&self, request: PullRequest) -> Result<PullBundle> {
    let guest_str = encode_uuid(request.guest_id);
    let watermark = request.last_sync.map(encode_dt);
    let since = watermark
      .clone()
      .unwrap_or_else(|| encode_dt(numbly_core::epoch()));
    let clock = Arc::clone(&self.clock);

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let sync_timestamp = clock.tick();
        let params = rusqlite::params![guest_str, since];

        let documents = rows::select::<Document>(&tx, CHANGED_SINCE, params)?;
        let clauses = rows::select::<Clause>(&tx, CHANGED_SINCE, params)?;
        let ai_edits = rows::select::<AiEdit>(&tx, CHANGED_SINCE, params)?;
        let chat_messages = rows::select::<ChatMessage>(&tx, CHANGED_SINCE, params)?;
        let autocomplete_cache =
          rows::select::<AutocompleteEntry>(&tx, CHANGED_SINCE, params)?;

        let deleted_items = {
          let mut stmt = tx.prepare(
            "SELECT table_name, entity_id, guest_id, deleted_at FROM deleted_items
             WHERE guest_id = ?1 AND deleted_at > ?2
             ORDER BY deleted_at",
          )?;
          stmt
            .query_map(params, |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.execute(
          "INSERT INTO sync_state (guest_id, last_pull_at, last_watermark)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(guest_id) DO UPDATE SET
             last_pull_at = excluded.last_pull_at,
             last_watermark = excluded.last_watermark",
          rusqlite::params![guest_str, encode_dt(sync_timestamp), watermark],
        )?;
        tx.commit()?;

        Ok(RawBundle {
          documents,
          clauses,
          ai_edits,
          chat_messages,
          autocomplete_cache,
          deleted_items,
          sync_timestamp,
        })
      })
      .await?;

    let deleted_items = raw
      .deleted_items
      .into_iter()
      .map(|(table, entity_id, guest_id, deleted_at)| -> Result<Tombstone> {
        Ok(Tombstone {
          table:      SyncTable::parse(&table)?,
          entity_id:  decode_uuid(&entity_id)?,
          guest_id:   decode_uuid(&guest_id)?,
          deleted_at: decode_dt(&deleted_at)?,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let bundle = PullBundle {
      documents: decode_all::<Document>(raw.documents)?,
      clauses: decode_all::<Clause>(raw.clauses)?,
      ai_edits: decode_all::<AiEdit>(raw.ai_edits)?,
      chat_messages: decode_all::<ChatMessage>(raw.chat_messages)?,
      autocomplete_cache: decode_all::<AutocompleteEntry>(raw.autocomplete_cache)?,
      deleted_items,
      sync_timestamp: raw.sync_timestamp,
    };

    tracing::debug!(
      guest_id = %request.guest_id,
      rows = bundle.len(),
      sync_timestamp = %bundle.sync_timestamp,
      "served pull"
    );
    Ok(bundle)
  }
}
