use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A sync run that could not complete.
///
/// Delivery failures of individual outbox entries are not errors; they are
/// recorded on the entry and reported in [`crate::PushReport`].
#[derive(Debug, Error)]
pub enum Error {
  #[error("local store error: {0}")]
  Local(#[source] BoxError),

  #[error("remote store error: {0}")]
  Remote(#[source] BoxError),
}

impl Error {
  pub(crate) fn local<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Local(Box::new(e))
  }

  pub(crate) fn remote<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Remote(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
