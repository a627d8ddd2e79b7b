//! JSON sync API for Numbly.
//!
//! Exposes an axum [`Router`] backed by any [`numbly_core::store::RemoteStore`].
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .merge(numbly_api::api_router(store.clone()))
//! ```

pub mod error;
pub mod pull;
pub mod push;

use std::sync::Arc;

use axum::{
  Json, Router,
  routing::{get, post},
};
use numbly_core::store::RemoteStore;
use serde_json::{Value, json};

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: RemoteStore + 'static,
{
  Router::new()
    .route("/sync/push", post(push::handler::<S>))
    .route("/sync/pull", get(pull::query::<S>).post(pull::body::<S>))
    .route("/health", get(health))
    .with_state(store)
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }
