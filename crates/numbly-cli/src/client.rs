//! [`HttpRemote`]: the sync API as a [`RemoteStore`].

use std::time::Duration;

use numbly_core::{
  mutation::{Applied, Mutation},
  pull::{PullBundle, PullRequest},
  push::{PushRequest, PushResponse},
  store::RemoteStore,
};
use reqwest::{Client, Response};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{path} → {status}: {message}")]
  Status {
    path:    &'static str,
    status:  u16,
    message: String,
  },
}

/// Error body returned by the API.
#[derive(Deserialize)]
struct ErrorBody {
  error: String,
}

/// Async HTTP client for the Numbly sync API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpRemote {
  client:   Client,
  base_url: String,
}

impl HttpRemote {
  pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    Ok(Self {
      client,
      base_url: base_url.into(),
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url.trim_end_matches('/'), path)
  }

  async fn check(path: &'static str, resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }
    let message = resp
      .json::<ErrorBody>()
      .await
      .map(|b| b.error)
      .unwrap_or_else(|_| status.canonical_reason().unwrap_or_default().to_owned());
    Err(ClientError::Status {
      path,
      status: status.as_u16(),
      message,
    })
  }

  /// `POST /sync/push` with a whole batch.
  pub async fn push(&self, request: &PushRequest) -> Result<PushResponse, ClientError> {
    let resp = self
      .client
      .post(self.url("/sync/push"))
      .json(request)
      .send()
      .await?;
    Ok(Self::check("/sync/push", resp).await?.json().await?)
  }
}

impl RemoteStore for HttpRemote {
  type Error = ClientError;

  async fn apply(&self, guest_id: Uuid, mutation: Mutation) -> Result<Applied, ClientError> {
    let response = self
      .push(&PushRequest {
        guest_id,
        mutations: vec![mutation],
      })
      .await?;
    Ok(response.single())
  }

  async fn pull(&self, request: PullRequest) -> Result<PullBundle, ClientError> {
    let resp = self
      .client
      .post(self.url("/sync/pull"))
      .json(&request)
      .send()
      .await?;
    Ok(Self::check("/sync/pull", resp).await?.json().await?)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use numbly_core::{
    entity::Document,
    mutation::Record,
    store::{LocalStore, Outbox},
  };
  use numbly_store_sqlite::{SqliteLocalStore, SqliteRemoteStore};
  use numbly_sync::SyncEngine;
  use tokio::net::TcpListener;

  use super::*;

  /// Serve the API over a real socket and return its base URL.
  async fn serve() -> String {
    let store = Arc::new(SqliteRemoteStore::open_in_memory().await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, numbly_api::api_router(store))
        .await
        .unwrap();
    });
    format!("http://{addr}")
  }

  #[tokio::test]
  async fn engine_syncs_over_http() {
    let remote = Arc::new(HttpRemote::new(serve().await).unwrap());
    let local = Arc::new(SqliteLocalStore::open_in_memory().await.unwrap());
    let guest = local.guest_id().await.unwrap();
    let engine = SyncEngine::new(local.clone(), remote.clone());

    let doc = local.upsert_document(Document::new(guest, "Lease")).await.unwrap();
    let report = engine.sync_once().await.unwrap();
    assert_eq!(report.push.delivered, 1);
    assert_eq!(local.outbox_len().await.unwrap(), 0);

    let bundle = remote
      .pull(PullRequest {
        guest_id:  guest,
        last_sync: None,
      })
      .await
      .unwrap();
    assert_eq!(bundle.documents, vec![doc]);

    let again = remote
      .pull(PullRequest {
        guest_id:  guest,
        last_sync: Some(report.pull.sync_timestamp),
      })
      .await
      .unwrap();
    assert!(again.is_empty());
  }

  #[tokio::test]
  async fn rejected_push_surfaces_status_and_message() {
    let remote = HttpRemote::new(serve().await).unwrap();
    let doc = Document::new(Uuid::new_v4(), "Not yours");
    let err = remote
      .apply(Uuid::new_v4(), Mutation::Upsert {
        record: Record::Documents(doc),
      })
      .await
      .unwrap_err();
    match err {
      ClientError::Status {
        status, message, ..
      } => {
        assert_eq!(status, 400);
        assert!(message.contains("belongs to guest"), "{message}");
      }
      other => panic!("expected status error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn unreachable_server_is_an_http_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = HttpRemote::new(format!("http://{addr}")).unwrap();
    let err = remote
      .pull(PullRequest {
        guest_id:  Uuid::new_v4(),
        last_sync: None,
      })
      .await
      .unwrap_err();
    assert!(matches!(err, ClientError::Http(_)));
  }
}
