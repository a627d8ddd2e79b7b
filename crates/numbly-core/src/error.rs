//! Error types for `numbly-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown sync table: {0:?}")]
  UnknownTable(String),

  #[error("unknown {kind} value: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("record belongs to guest {found}, not {expected}")]
  GuestMismatch { expected: Uuid, found: Uuid },

  #[error("{table} row {id} belongs to guest {owner}")]
  ForeignRow {
    table: &'static str,
    id:    Uuid,
    owner: String,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// True when the caller sent something that can never be applied, as
  /// opposed to a fault on the receiving side.
  pub fn is_rejection(&self) -> bool {
    matches!(
      self,
      Self::UnknownTable(_)
        | Self::UnknownVariant { .. }
        | Self::GuestMismatch { .. }
        | Self::ForeignRow { .. }
    )
  }

  /// The first core error in `err`'s source chain, `err` included.
  pub fn find_in<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a Self> {
    let mut current = Some(err);
    while let Some(e) = current {
      if let Some(core) = e.downcast_ref::<Self>() {
        return Some(core);
      }
      current = e.source();
    }
    None
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Error)]
  #[error("wrapped: {0}")]
  struct Wrapper(#[source] Error);

  #[test]
  fn find_in_walks_the_source_chain() {
    let inner = Error::GuestMismatch {
      expected: Uuid::new_v4(),
      found:    Uuid::new_v4(),
    };
    let outer = Wrapper(inner);
    let found = Error::find_in(&outer).unwrap();
    assert!(found.is_rejection());

    let io = std::io::Error::other("disk full");
    assert!(Error::find_in(&io).is_none());
  }
}
