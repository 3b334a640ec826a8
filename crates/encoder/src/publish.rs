//! Remote publish client for the Rerun Manager control-plane API
//!
//! Reserves an upload slot, confirms a finished upload and cancels a
//! reservation. Every call is single-attempt; retries belong to callers.

use crate::session::Session;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Error type for control-plane calls
#[derive(Debug, Error)]
pub enum PublishError {
    /// Request path could not be joined onto the endpoint
    #[error("Invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    /// Transport-level failure
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API answered with a 4xx/5xx status
    #[error("API responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Response body was not a video record
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Remote-side state of a video record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    #[default]
    Created,
    Uploaded,
}

/// Video record owned by the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVideo {
    pub id: String,
    /// Pre-signed upload target; absent when the service needs no upload
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: VideoStatus,
}

/// Control-plane operations the job pipeline depends on
#[async_trait]
pub trait PublishApi: Send + Sync {
    /// Reserve an upload slot for `title` of `size_bytes`
    async fn reserve(
        &self,
        session: &Session,
        title: &str,
        size_bytes: u64,
    ) -> Result<RemoteVideo, PublishError>;

    /// Mark the record's content as fully uploaded
    async fn confirm(
        &self,
        session: &Session,
        record_id: &str,
    ) -> Result<RemoteVideo, PublishError>;

    /// Drop a reservation that will never be confirmed
    async fn cancel_reservation(
        &self,
        session: &Session,
        record_id: &str,
    ) -> Result<(), PublishError>;
}

/// reqwest-backed [`PublishApi`]
#[derive(Debug, Clone, Default)]
pub struct RemotePublishClient {
    http: reqwest::Client,
}

impl RemotePublishClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (proxies, timeouts, TLS roots)
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Build a request to the endpoint extended by `segments`
    ///
    /// Each segment is percent-encoded, so ids cannot alter the path.
    fn request(
        &self,
        session: &Session,
        method: Method,
        segments: &[&str],
    ) -> Result<reqwest::RequestBuilder, PublishError> {
        let mut url: Url = session.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        debug!(%method, %url, "control-plane request");
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, &session.authorization))
    }
}

/// Turn 4xx/5xx responses into [`PublishError::Status`]
async fn check_status(response: Response) -> Result<Response, PublishError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(PublishError::Status { status, body });
    }
    Ok(response)
}

async fn decode_video(response: Response) -> Result<RemoteVideo, PublishError> {
    let bytes = check_status(response).await?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl PublishApi for RemotePublishClient {
    async fn reserve(
        &self,
        session: &Session,
        title: &str,
        size_bytes: u64,
    ) -> Result<RemoteVideo, PublishError> {
        let segments = ["channels", session.user_id.as_str(), "videos"];
        let response = self
            .request(session, Method::POST, &segments)?
            .json(&json!({ "title": title, "size": size_bytes }))
            .send()
            .await?;
        decode_video(response).await
    }

    async fn confirm(
        &self,
        session: &Session,
        record_id: &str,
    ) -> Result<RemoteVideo, PublishError> {
        let response = self
            .request(session, Method::POST, &["videos", record_id, "confirm"])?
            .json(&json!({ "encoded": true }))
            .send()
            .await?;
        decode_video(response).await
    }

    async fn cancel_reservation(
        &self,
        session: &Session,
        record_id: &str,
    ) -> Result<(), PublishError> {
        let response = self
            .request(session, Method::DELETE, &["videos", record_id, "cancel"])?
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::{delete, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn spawn_api(app: Router) -> Session {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Session::new(&format!("http://{}/v1", addr), "Bearer secret", "user-7").unwrap()
    }

    fn auth(headers: &HeaderMap) -> Option<String> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    async fn reserve_handler(
        State(rec): State<Recorded>,
        Path(user): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        rec.requests
            .lock()
            .unwrap()
            .push((format!("reserve:{}", user), auth(&headers), body));
        Json(json!({
            "id": "v1",
            "upload_url": "http://uploads.test/v1",
            "title": "My Run",
            "status": "created"
        }))
    }

    async fn confirm_handler(
        State(rec): State<Recorded>,
        Path(id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        rec.requests
            .lock()
            .unwrap()
            .push((format!("confirm:{}", id), auth(&headers), body));
        Json(json!({ "id": id, "title": "My Run", "status": "uploaded" }))
    }

    async fn cancel_handler(
        State(rec): State<Recorded>,
        Path(id): Path<String>,
    ) -> StatusCode {
        rec.requests
            .lock()
            .unwrap()
            .push((format!("cancel:{}", id), None, Value::Null));
        StatusCode::NO_CONTENT
    }

    fn api_router(rec: Recorded) -> Router {
        Router::new()
            .route("/v1/channels/:user/videos", post(reserve_handler))
            .route("/v1/videos/:id/confirm", post(confirm_handler))
            .route("/v1/videos/:id/cancel", delete(cancel_handler))
            .with_state(rec)
    }

    #[tokio::test]
    async fn test_reserve_sends_title_size_and_auth() {
        let rec = Recorded::default();
        let session = spawn_api(api_router(rec.clone())).await;
        let client = RemotePublishClient::new();

        let video = client.reserve(&session, "My Run", 1234).await.unwrap();

        assert_eq!(video.id, "v1");
        assert_eq!(video.upload_url.as_deref(), Some("http://uploads.test/v1"));
        assert_eq!(video.status, VideoStatus::Created);

        let requests = rec.requests.lock().unwrap();
        let (name, authorization, body) = &requests[0];
        assert_eq!(name, "reserve:user-7");
        assert_eq!(authorization.as_deref(), Some("Bearer secret"));
        assert_eq!(body["title"], "My Run");
        assert_eq!(body["size"], 1234);
    }

    #[tokio::test]
    async fn test_confirm_marks_uploaded() {
        let rec = Recorded::default();
        let session = spawn_api(api_router(rec.clone())).await;

        let video = RemotePublishClient::new()
            .confirm(&session, "v1")
            .await
            .unwrap();

        assert_eq!(video.status, VideoStatus::Uploaded);
        let requests = rec.requests.lock().unwrap();
        assert_eq!(requests[0].0, "confirm:v1");
        assert_eq!(requests[0].2["encoded"], true);
    }

    #[tokio::test]
    async fn test_cancel_reservation_accepts_no_content() {
        let rec = Recorded::default();
        let session = spawn_api(api_router(rec.clone())).await;

        RemotePublishClient::new()
            .cancel_reservation(&session, "v1")
            .await
            .unwrap();

        assert_eq!(rec.requests.lock().unwrap()[0].0, "cancel:v1");
    }

    #[tokio::test]
    async fn test_ids_are_escaped_as_single_segments() {
        let rec = Recorded::default();
        let mut session = spawn_api(api_router(rec.clone())).await;
        session.user_id = "team/7?x#y".to_string();
        let client = RemotePublishClient::new();

        client.reserve(&session, "My Run", 1).await.unwrap();
        client.confirm(&session, "v1/../v2").await.unwrap();
        client.cancel_reservation(&session, "v1?force=1").await.unwrap();

        let names: Vec<String> = rec
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect();
        assert_eq!(
            names,
            vec!["reserve:team/7?x#y", "confirm:v1/../v2", "cancel:v1?force=1"]
        );
    }

    #[tokio::test]
    async fn test_rejected_reservation_is_status_error() {
        let app = Router::new().route(
            "/v1/channels/:user/videos",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "storage limit reached") }),
        );
        let session = spawn_api(app).await;

        let err = RemotePublishClient::new()
            .reserve(&session, "t", 1)
            .await
            .unwrap_err();

        match err {
            PublishError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(body, "storage limit reached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_record_without_upload_url_decodes() {
        let app = Router::new().route(
            "/v1/channels/:user/videos",
            post(|| async { Json(json!({ "id": "v1", "upload_url": null })) }),
        );
        let session = spawn_api(app).await;

        let video = RemotePublishClient::new()
            .reserve(&session, "t", 1)
            .await
            .unwrap();

        assert_eq!(video.upload_url, None);
        assert_eq!(video.title, "");
        assert_eq!(video.status, VideoStatus::Created);
    }

    #[tokio::test]
    async fn test_unreachable_api_is_http_error() {
        let session = Session::new("http://127.0.0.1:1/v1/", "Bearer x", "u").unwrap();
        let err = RemotePublishClient::new()
            .cancel_reservation(&session, "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Http(_)));
    }
}
