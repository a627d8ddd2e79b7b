//! SQL schemas for the local (client) and remote (server) stores.
//!
//! Both sides share the entity table layout so rows can be written by the
//! same code. Executed once at connection startup; `PRAGMA user_version`
//! gates future migrations.

/// Entity tables mirrored on both sides. `synced_at` is the remote store's
/// change stamp; locally it records when the row last arrived from a pull and
/// is NULL for rows written by the DAO.
const ENTITY_TABLES: &str = "
CREATE TABLE IF NOT EXISTS documents (
    document_id  TEXT PRIMARY KEY,
    guest_id     TEXT NOT NULL,
    title        TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'draft',
    content      TEXT NOT NULL DEFAULT 'null',   -- opaque JSON blob
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    synced_at    TEXT
);

-- No foreign key on document_id: clauses may arrive before their document.
CREATE TABLE IF NOT EXISTS clauses (
    clause_id    TEXT PRIMARY KEY,
    document_id  TEXT NOT NULL,
    guest_id     TEXT NOT NULL,
    order_index  INTEGER NOT NULL,
    title        TEXT NOT NULL,
    body         TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    synced_at    TEXT
);

-- Create-only tables. Rows are never updated after insert.
CREATE TABLE IF NOT EXISTS ai_edits (
    edit_id      TEXT PRIMARY KEY,
    guest_id     TEXT NOT NULL,
    document_id  TEXT NOT NULL,
    clause_id    TEXT,
    result       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    synced_at    TEXT
);

CREATE TABLE IF NOT EXISTS chat_messages (
    message_id      TEXT PRIMARY KEY,
    guest_id        TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    role            TEXT NOT NULL,   -- 'user' | 'assistant' | 'system'
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    synced_at       TEXT
);

CREATE TABLE IF NOT EXISTS autocomplete_cache (
    entry_id     TEXT PRIMARY KEY,
    guest_id     TEXT NOT NULL,
    prompt       TEXT NOT NULL,
    suggestion   TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    synced_at    TEXT
);

CREATE INDEX IF NOT EXISTS documents_guest_idx     ON documents(guest_id, synced_at);
CREATE INDEX IF NOT EXISTS clauses_document_idx    ON clauses(document_id);
CREATE INDEX IF NOT EXISTS clauses_guest_idx       ON clauses(guest_id, synced_at);
CREATE INDEX IF NOT EXISTS ai_edits_guest_idx      ON ai_edits(guest_id, synced_at);
CREATE INDEX IF NOT EXISTS chat_messages_conv_idx  ON chat_messages(conversation_id, created_at);
CREATE INDEX IF NOT EXISTS chat_messages_guest_idx ON chat_messages(guest_id, synced_at);
CREATE INDEX IF NOT EXISTS autocomplete_guest_idx  ON autocomplete_cache(guest_id, synced_at);
";

/// Client-side tables beyond the mirrored entities.
const LOCAL_TABLES: &str = "
-- Pending remote mutations, drained in seq order.
CREATE TABLE IF NOT EXISTS outbox (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name   TEXT NOT NULL,
    operation    TEXT NOT NULL,   -- 'upsert' | 'delete'
    entity_id    TEXT NOT NULL,
    payload      TEXT NOT NULL,   -- JSON
    enqueued_at  TEXT NOT NULL,
    attempts     INTEGER NOT NULL DEFAULT 0,
    last_error   TEXT
);

-- One row per guest.
CREATE TABLE IF NOT EXISTS flags (
    guest_id          TEXT PRIMARY KEY,
    free_ai_used      INTEGER NOT NULL DEFAULT 0,
    features_unlocked TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS sync_meta (
    guest_id     TEXT PRIMARY KEY,
    last_sync    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS local_meta (
    key          TEXT PRIMARY KEY,
    value        TEXT NOT NULL
);
";

/// Server-side tables beyond the mirrored entities.
const REMOTE_TABLES: &str = "
-- deleted_at is the server change stamp; requested_at is the deleting
-- device's clock and is compared against later upserts.
CREATE TABLE IF NOT EXISTS deleted_items (
    table_name   TEXT NOT NULL,
    entity_id    TEXT NOT NULL,
    guest_id     TEXT NOT NULL,
    deleted_at   TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    PRIMARY KEY (table_name, entity_id)
);

CREATE INDEX IF NOT EXISTS deleted_items_guest_idx ON deleted_items(guest_id, deleted_at);

-- Pull watermarks, kept for diagnostics only.
CREATE TABLE IF NOT EXISTS sync_state (
    guest_id       TEXT PRIMARY KEY,
    last_pull_at   TEXT NOT NULL,
    last_watermark TEXT
);
";

fn assemble(extra: &str) -> String {
  format!(
    "PRAGMA journal_mode = WAL;\n{ENTITY_TABLES}\n{extra}\nPRAGMA user_version = 1;\n"
  )
}

pub fn local_schema() -> String { assemble(LOCAL_TABLES) }

pub fn remote_schema() -> String { assemble(REMOTE_TABLES) }
