//! Handler for `POST /sync/push`.
//!
//! Body: `{"guest_id":"…","mutations":[…]}`, answered with
//! `{"applied":n,"stale":m}`. Mutations are applied in order; a batch with
//! any mutation belonging to another guest is rejected before anything is
//! written.

use std::sync::Arc;

use axum::{Json, extract::State};
use numbly_core::{
  push::{PushRequest, PushResponse},
  store::RemoteStore,
};

use crate::error::ApiError;

/// `POST /sync/push`
pub async fn handler<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<PushRequest>,
) -> Result<Json<PushResponse>, ApiError>
where
  S: RemoteStore,
{
  for mutation in &body.mutations {
    mutation
      .check_guest(body.guest_id)
      .map_err(|e| ApiError::BadRequest(e.to_string()))?;
  }

  let mut response = PushResponse::default();
  for mutation in body.mutations {
    let outcome = store
      .apply(body.guest_id, mutation)
      .await
      .map_err(ApiError::store)?;
    response.record(outcome);
  }

  tracing::debug!(
    guest_id = %body.guest_id,
    applied = response.applied,
    stale = response.stale,
    "push applied"
  );
  Ok(Json(response))
}
