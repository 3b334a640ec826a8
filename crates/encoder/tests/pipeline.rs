//! End-to-end publish of a recording against a local mock of the
//! control-plane API and upload target.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post, put};
use axum::{Json, Router};
use rerun_encoder::{
    FfmpegTranscoder, HttpUploader, Job, JobController, JobEvent, PublishOptions,
    RemotePublishClient, Session, VideoStatus,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct MockService {
    base: String,
    upload_status: StatusCode,
    calls: Arc<Mutex<Vec<String>>>,
    uploaded: Arc<Mutex<Vec<u8>>>,
}

async fn reserve(
    State(svc): State<MockService>,
    Path(user): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    svc.calls
        .lock()
        .unwrap()
        .push(format!("reserve:{}:{}:{}", user, body["title"], body["size"]));
    Json(json!({
        "id": "v42",
        "upload_url": format!("{}/upload/v42", svc.base),
        "title": body["title"],
        "status": "created"
    }))
}

async fn upload(State(svc): State<MockService>, body: Bytes) -> StatusCode {
    svc.calls.lock().unwrap().push("upload".to_string());
    *svc.uploaded.lock().unwrap() = body.to_vec();
    svc.upload_status
}

async fn confirm(State(svc): State<MockService>, Path(id): Path<String>) -> Json<Value> {
    svc.calls.lock().unwrap().push(format!("confirm:{}", id));
    Json(json!({ "id": id, "title": "Morning Run", "status": "uploaded" }))
}

async fn cancel(State(svc): State<MockService>, Path(id): Path<String>) -> StatusCode {
    svc.calls.lock().unwrap().push(format!("cancel:{}", id));
    StatusCode::NO_CONTENT
}

async fn spawn_service(upload_status: StatusCode) -> (MockService, Session) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let svc = MockService {
        base: base.clone(),
        upload_status,
        calls: Arc::new(Mutex::new(Vec::new())),
        uploaded: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/v1/channels/:user/videos", post(reserve))
        .route("/v1/videos/:id/confirm", post(confirm))
        .route("/v1/videos/:id/cancel", delete(cancel))
        .route("/upload/:id", put(upload))
        .with_state(svc.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let session = Session::new(&format!("{}/v1", base), "Bearer token", "runner-1").unwrap();
    (svc, session)
}

fn controller(session: Session) -> (JobController, tokio::sync::mpsc::UnboundedReceiver<JobEvent>) {
    JobController::new(
        Arc::new(FfmpegTranscoder::new("/nonexistent/ffmpeg")),
        Arc::new(HttpUploader::new(4096, "video/x-flv").unwrap()),
        Arc::new(RemotePublishClient::new()),
        Arc::new(session),
    )
}

fn recording(dir: &tempfile::TempDir, len: usize) -> (std::path::PathBuf, Vec<u8>) {
    let path = dir.path().join("morning-run.flv");
    let data: Vec<u8> = (0..len).map(|i| (i % 199) as u8).collect();
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

fn options() -> PublishOptions {
    PublishOptions {
        title: "Morning Run".to_string(),
        publish_on_complete: true,
    }
}

#[tokio::test]
async fn test_flv_recording_is_published() {
    let (svc, session) = spawn_service(StatusCode::OK).await;
    let (controller, mut events) = controller(session);
    let dir = tempfile::tempdir().unwrap();
    let (input, data) = recording(&dir, 50_000);

    let job = Job::new("e2e-1", &input, options());
    let record = controller.submit(job).unwrap().await.unwrap().unwrap();

    assert_eq!(record.id, "v42");
    assert_eq!(record.status, VideoStatus::Uploaded);
    assert_eq!(*svc.uploaded.lock().unwrap(), data);
    assert_eq!(
        *svc.calls.lock().unwrap(),
        vec![
            "reserve:runner-1:\"Morning Run\":50000".to_string(),
            "upload".to_string(),
            "confirm:v42".to_string(),
        ]
    );

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.first(), Some(&JobEvent::Started { id: "e2e-1".into() }));
    assert!(matches!(received.last(), Some(JobEvent::UploadComplete { .. })));
    let uploads: Vec<f64> = received
        .iter()
        .filter_map(|e| match e {
            JobEvent::UploadProgress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(!uploads.is_empty());
    assert!(uploads.windows(2).all(|w| w[0] <= w[1]));
    assert!(!received
        .iter()
        .any(|e| matches!(e, JobEvent::EncodeProgress { .. })));
}

#[tokio::test]
async fn test_rejected_upload_cancels_reservation() {
    let (svc, session) = spawn_service(StatusCode::INTERNAL_SERVER_ERROR).await;
    let (controller, mut events) = controller(session);
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = recording(&dir, 2048);

    let job = Job::new("e2e-2", &input, options());
    controller.submit(job).unwrap().await.unwrap().unwrap_err();

    assert_eq!(
        *svc.calls.lock().unwrap(),
        vec![
            "reserve:runner-1:\"Morning Run\":2048".to_string(),
            "upload".to_string(),
            "cancel:v42".to_string(),
        ]
    );

    let mut terminal = None;
    while let Ok(event) = events.try_recv() {
        if event.is_terminal() {
            terminal = Some(event);
        }
    }
    match terminal {
        Some(JobEvent::Failed { message, .. }) => {
            assert!(message.starts_with("Upload Error: "), "message: {}", message)
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
}
