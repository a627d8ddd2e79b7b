//! Statement helpers shared by the local and remote stores.
//!
//! These run on the connection thread inside `tokio_rusqlite` closures and
//! only deal in pre-encoded values.

use numbly_core::mutation::SyncTable;
use rusqlite::{OptionalExtension as _, types::Value};

use crate::encode::{FromRaw, RawRow, key_column, version_column};

/// The stored LWW version and owning guest of a row, if it exists.
pub fn stored_row(
  conn: &rusqlite::Connection,
  table: SyncTable,
  entity_id: &str,
) -> rusqlite::Result<Option<(String, String)>> {
  let sql = format!(
    "SELECT {}, guest_id FROM {} WHERE {} = ?1",
    version_column(table),
    table.as_str(),
    key_column(table),
  );
  conn
    .query_row(&sql, rusqlite::params![entity_id], |r| {
      Ok((r.get(0)?, r.get(1)?))
    })
    .optional()
}

/// Insert or overwrite a row, keyed by its entity id.
pub fn write_row(
  conn: &rusqlite::Connection,
  row: &RawRow,
  synced_at: Option<&str>,
) -> rusqlite::Result<()> {
  let names: Vec<&str> = row.columns.iter().map(|(name, _)| *name).collect();
  let placeholders: Vec<String> =
    (1..=names.len() + 1).map(|i| format!("?{i}")).collect();
  let updates: Vec<String> = names
    .iter()
    .skip(1)
    .chain(std::iter::once(&"synced_at"))
    .map(|n| format!("{n} = excluded.{n}"))
    .collect();

  let sql = format!(
    "INSERT INTO {table} ({cols}, synced_at) VALUES ({vals})
     ON CONFLICT({key}) DO UPDATE SET {updates}",
    table = row.table.as_str(),
    cols = names.join(", "),
    vals = placeholders.join(", "),
    key = key_column(row.table),
    updates = updates.join(", "),
  );

  let synced = synced_at.map_or(Value::Null, |s| Value::Text(s.to_owned()));
  let values = row
    .columns
    .iter()
    .map(|(_, v)| v.clone())
    .chain(std::iter::once(synced));

  conn.execute(&sql, rusqlite::params_from_iter(values))?;
  Ok(())
}

/// Delete a row by entity id, returning the number of rows removed.
pub fn delete_row(
  conn: &rusqlite::Connection,
  table: SyncTable,
  entity_id: &str,
) -> rusqlite::Result<usize> {
  let sql = format!(
    "DELETE FROM {} WHERE {} = ?1",
    table.as_str(),
    key_column(table)
  );
  conn.execute(&sql, rusqlite::params![entity_id])
}

/// `SELECT <T::COLUMNS> FROM <T::TABLE> <tail>` collected into raw rows.
pub fn select<T: FromRaw>(
  conn: &rusqlite::Connection,
  tail: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<T::Raw>> {
  let sql = format!("SELECT {} FROM {} {tail}", T::COLUMNS, T::TABLE.as_str());
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(params, |row| T::read(row))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}
