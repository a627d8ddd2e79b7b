//! Handlers for `/sync/pull`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/sync/pull` | `?guest_id=<uuid>[&last_sync=<rfc3339>]` |
//! | `POST` | `/sync/pull` | Body: `{"guest_id":"…","last_sync":null}` |
//!
//! An absent or empty `last_sync` requests a full resync. Both the `Z` and
//! `+00:00` forms are accepted, with or without the `+` percent-encoded.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use chrono::{DateTime, Utc};
use numbly_core::{
  pull::{PullBundle, PullRequest},
  store::RemoteStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct PullParams {
  pub guest_id:  Uuid,
  pub last_sync: Option<String>,
}

impl PullParams {
  fn into_request(self) -> Result<PullRequest, ApiError> {
    let last_sync = match self.last_sync.as_deref().map(str::trim) {
      None | Some("") => None,
      Some(raw) => Some(
        parse_watermark(raw)
          .map_err(|e| ApiError::BadRequest(format!("invalid last_sync {raw:?}: {e}")))?,
      ),
    };
    Ok(PullRequest {
      guest_id: self.guest_id,
      last_sync,
    })
  }
}

/// Parse an RFC 3339 watermark. An unescaped `+` in the offset reaches us
/// as a space after query decoding, so `...00 00:00` reads as `...00+00:00`.
fn parse_watermark(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
  DateTime::parse_from_rfc3339(raw)
    .or_else(|e| match raw.rsplit_once(' ') {
      Some((stamp, offset)) => {
        DateTime::parse_from_rfc3339(&format!("{stamp}+{offset}")).map_err(|_| e)
      }
      None => Err(e),
    })
    .map(|dt| dt.with_timezone(&Utc))
}

/// `GET /sync/pull?guest_id=<uuid>[&last_sync=<rfc3339>]`
pub async fn query<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<PullParams>,
) -> Result<Json<PullBundle>, ApiError>
where
  S: RemoteStore,
{
  let bundle = store
    .pull(params.into_request()?)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(bundle))
}

/// `POST /sync/pull`
pub async fn body<S>(
  State(store): State<Arc<S>>,
  Json(request): Json<PullRequest>,
) -> Result<Json<PullBundle>, ApiError>
where
  S: RemoteStore,
{
  let bundle = store.pull(request).await.map_err(ApiError::store)?;
  Ok(Json(bundle))
}
