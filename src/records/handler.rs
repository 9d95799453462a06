//! HTTP handlers for the Records API
//!
//! - GET    /api/v1/records                        - list records
//! - POST   /api/v1/records                        - register a record
//! - GET    /api/v1/records/:id                    - record summary
//! - DELETE /api/v1/records/:id                    - remove a record
//! - GET    /api/v1/records/:id/ready              - readiness
//! - GET    /api/v1/records/:id/metadata           - metadata document
//! - PUT    /api/v1/records/:id/metadata           - replace metadata
//! - GET    /api/v1/records/:id/artifacts/:kind    - download artifact
//! - PUT    /api/v1/records/:id/artifacts/:kind    - upload artifact

use crate::error::Error;
use crate::records::store::RecordStore;
use crate::records::types::*;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine as _;
use std::sync::Arc;

/// Shared state for record handlers
#[derive(Clone)]
pub struct RecordsState {
    pub store: Arc<RecordStore>,
}

/// Create the records router
pub fn records_router(state: RecordsState) -> Router {
    Router::new()
        .route("/api/v1/records", get(list_records).post(create_record))
        .route("/api/v1/records/:id", get(get_record).delete(remove_record))
        .route("/api/v1/records/:id/ready", get(get_ready))
        .route(
            "/api/v1/records/:id/metadata",
            get(get_metadata).put(put_metadata),
        )
        .route(
            "/api/v1/records/:id/artifacts/:kind",
            get(download_artifact).put(upload_artifact),
        )
        .with_state(state)
}

/// Map a store error onto an HTTP response
fn error_response(err: Error) -> Response {
    let (status, body) = match &err {
        Error::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::not_found(msg.clone())),
        Error::InvalidId(_) | Error::InvalidPayload(_) => {
            (StatusCode::BAD_REQUEST, ApiError::bad_request(err.to_string()))
        }
        _ => {
            tracing::error!("Records API error: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::internal(err.to_string()),
            )
        }
    };
    (status, Json(body)).into_response()
}

fn parse_kind(kind: &str) -> Result<ArtifactKind, Response> {
    kind.parse().map_err(|e: String| {
        (StatusCode::BAD_REQUEST, Json(ApiError::bad_request(e))).into_response()
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/v1/records
async fn list_records(State(state): State<RecordsState>) -> impl IntoResponse {
    let records = state.store.list().await;
    let summaries: Vec<RecordSummary> = records.iter().map(RecordSummary::from).collect();
    Json(summaries)
}

/// POST /api/v1/records
///
/// Registers the id. When the body carries contact/request/QR data it is
/// saved as metadata, and a QR image is stored as the code artifact. A QR
/// code sent for a record that already has one is ignored.
async fn create_record(
    State(state): State<RecordsState>,
    Json(request): Json<CreateRecordRequest>,
) -> Response {
    let qr_png = match request.qr_code.as_deref() {
        Some(encoded) => match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiError::bad_request(format!("qrCode is not valid base64: {}", e))),
                )
                    .into_response()
            }
        },
        None => None,
    };

    if let Some(email) = request.email.as_deref() {
        if let Err(e) = validate_contact_address(email) {
            return error_response(e);
        }
    }

    let existed = state.store.exists(&request.id).await;
    let record = match state.store.create(&request.id).await {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    // The QR code is set once; the image and the mailed payload stay paired
    let code_locked = !record.metadata.code_payload.is_empty();
    let (qr_code, qr_png) = if code_locked && qr_png.is_some() {
        tracing::warn!(record_id = %record.id, "Record already has a QR code, ignoring new one");
        (None, None)
    } else {
        (request.qr_code, qr_png)
    };

    if request.email.is_some() || request.request.is_some() || qr_code.is_some() {
        let mut metadata = record.metadata.clone();
        if let Some(email) = request.email {
            metadata.contact_address = email;
        }
        if let Some(text) = request.request {
            metadata.request_text = text;
        }
        if let Some(code) = qr_code {
            metadata.code_payload = code.trim().to_string();
        }
        if let Err(e) = state.store.save_metadata(&record.id, metadata).await {
            return error_response(e);
        }
    }

    if let Some(png) = qr_png {
        if let Err(e) = state
            .store
            .load_artifact(&record.id, ArtifactKind::Code, png)
            .await
        {
            return error_response(e);
        }
    }

    match state.store.get(&record.id).await {
        Some(record) => {
            let status = if existed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, Json(RecordSummary::from(&record))).into_response()
        }
        None => error_response(Error::NotFound(format!(
            "Record '{}' was removed during registration",
            record.id
        ))),
    }
}

/// GET /api/v1/records/:id
async fn get_record(State(state): State<RecordsState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id).await {
        Some(record) => Json(RecordSummary::from(&record)).into_response(),
        None => error_response(Error::NotFound(format!("Record '{}' not found", id))),
    }
}

/// DELETE /api/v1/records/:id
async fn remove_record(State(state): State<RecordsState>, Path(id): Path<String>) -> Response {
    match state.store.remove(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(Error::NotFound(format!("Record '{}' not found", id))),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/records/:id/ready
async fn get_ready(State(state): State<RecordsState>, Path(id): Path<String>) -> Response {
    if !state.store.exists(&id).await {
        return error_response(Error::NotFound(format!("Record '{}' not found", id)));
    }
    let ready = state.store.is_ready(&id).await;
    Json(serde_json::json!({ "id": id, "ready": ready })).into_response()
}

/// GET /api/v1/records/:id/metadata
async fn get_metadata(State(state): State<RecordsState>, Path(id): Path<String>) -> Response {
    match state.store.metadata(&id).await {
        Ok(metadata) => Json(metadata).into_response(),
        Err(e) => error_response(e),
    }
}

/// PUT /api/v1/records/:id/metadata
async fn put_metadata(
    State(state): State<RecordsState>,
    Path(id): Path<String>,
    Json(metadata): Json<Metadata>,
) -> Response {
    match state.store.save_metadata(&id, metadata).await {
        Ok(saved) => Json(saved).into_response(),
        Err(e) => error_response(e),
    }
}

/// PUT /api/v1/records/:id/artifacts/:kind
async fn upload_artifact(
    State(state): State<RecordsState>,
    Path((id, kind)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };

    match state.store.load_artifact(&id, kind, body).await {
        Ok(ready) => Json(serde_json::json!({
            "id": id,
            "kind": kind,
            "ready": ready,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/records/:id/artifacts/:kind
async fn download_artifact(
    State(state): State<RecordsState>,
    Path((id, kind)): Path<(String, String)>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };

    match state.store.read_artifact(&id, kind).await {
        Ok(data) => ([(header::CONTENT_TYPE, kind.content_type())], data).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyConfig;
    use crate::notify::dispatcher::testing::RecordingDispatcher;
    use crate::notify::NotificationQueue;
    use crate::records::backend::FsBackend;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const QR_PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    struct TestApp {
        app: Router,
        queue: Arc<NotificationQueue>,
        dispatcher: RecordingDispatcher,
        _dir: TempDir,
    }

    async fn make_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FsBackend::open(dir.path().to_path_buf()).await.unwrap());
        let dispatcher = RecordingDispatcher::new();
        let queue = Arc::new(NotificationQueue::start(
            &NotifyConfig::default(),
            Arc::new(dispatcher.clone()),
        ));
        let store = Arc::new(RecordStore::open(backend, queue.clone()).await.unwrap());
        TestApp {
            app: records_router(RecordsState { store }),
            queue,
            dispatcher,
            _dir: dir,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 64)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Body) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn register(app: &Router, id: &str) -> Response {
        let body = serde_json::json!({
            "id": id,
            "email": format!("{}@example.com", id),
            "request": "something crunchy",
            "qrCode": QR_PNG_B64,
        });
        send(app, "POST", "/api/v1/records", Body::from(body.to_string())).await
    }

    #[tokio::test]
    async fn test_list_records_empty() {
        let t = make_app().await;
        let resp = send(&t.app, "GET", "/api/v1/records", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_register_stores_metadata_and_qr() {
        let t = make_app().await;
        let resp = register(&t.app, "u1").await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["id"], "u1");
        assert_eq!(json["email"], "u1@example.com");
        assert_eq!(json["slots"]["code"], true);
        assert_eq!(json["slots"]["image"], false);
        assert_eq!(json["ready"], false);

        let resp = send(&t.app, "GET", "/api/v1/records/u1/metadata", Body::empty()).await;
        let meta = body_json(resp).await;
        assert_eq!(meta["qr_code"], QR_PNG_B64);
        assert_eq!(meta["request"], "something crunchy");

        // Registering again is not an error and changes nothing
        let resp = send(
            &t.app,
            "POST",
            "/api/v1/records",
            Body::from(serde_json::json!({"id": "u1"}).to_string()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["slots"]["code"], true);
    }

    #[tokio::test]
    async fn test_reregister_keeps_qr_blob_and_payload_paired() {
        let t = make_app().await;
        let engine = base64::engine::general_purpose::STANDARD;
        let first = engine.encode(b"FIRST");
        let second = engine.encode(b"SECOND");

        let body = serde_json::json!({"id": "u1", "email": "first@example.com", "qrCode": first});
        let resp = send(&t.app, "POST", "/api/v1/records", Body::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body = serde_json::json!({"id": "u1", "email": "second@example.com", "qrCode": second});
        let resp = send(&t.app, "POST", "/api/v1/records", Body::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send(&t.app, "GET", "/api/v1/records/u1/metadata", Body::empty()).await;
        let meta = body_json(resp).await;
        assert_eq!(meta["qr_code"], first);
        assert_eq!(meta["email"], "second@example.com");

        let resp = send(&t.app, "GET", "/api/v1/records/u1/artifacts/code", Body::empty()).await;
        let blob = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&blob[..], b"FIRST");
    }

    #[tokio::test]
    async fn test_register_rejects_header_breaking_email() {
        let t = make_app().await;
        let body = serde_json::json!({
            "id": "u1",
            "email": "a@example.com\r\nBcc: victim@evil.test",
        });
        let resp = send(&t.app, "POST", "/api/v1/records", Body::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&t.app, "GET", "/api/v1/records/u1", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        register(&t.app, "u2").await;
        let body = serde_json::json!({"email": "b@example.com\nX-Evil: 1"});
        let resp = send(&t.app, "PUT", "/api/v1/records/u2/metadata", Body::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&t.app, "GET", "/api/v1/records/u2/metadata", Body::empty()).await;
        assert_eq!(body_json(resp).await["email"], "u2@example.com");
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let t = make_app().await;
        let body = serde_json::json!({"id": "u1", "qrCode": "%%%"});
        let resp = send(&t.app, "POST", "/api/v1/records", Body::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = serde_json::json!({"id": "a/b"});
        let resp = send(&t.app, "POST", "/api/v1/records", Body::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "BAD_REQUEST");

        let resp = send(&t.app, "GET", "/api/v1/records", Body::empty()).await;
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_upload_all_artifacts_notifies_once() {
        let t = make_app().await;
        register(&t.app, "u1").await;

        for (kind, body) in [
            ("image", Body::from("png")),
            ("model", Body::from("glb")),
            ("audio", Body::from("wav")),
        ] {
            let resp = send(&t.app, "PUT", &format!("/api/v1/records/u1/artifacts/{}", kind), body).await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_json(resp).await["ready"], false);
        }

        let resp = send(&t.app, "GET", "/api/v1/records/u1/ready", Body::empty()).await;
        assert_eq!(body_json(resp).await["ready"], false);

        let params = serde_json::json!({"chewiness": 7, "firmness": 6});
        let resp = send(
            &t.app,
            "PUT",
            "/api/v1/records/u1/artifacts/params",
            Body::from(params.to_string()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["kind"], "params");
        assert_eq!(json["ready"], true);

        let resp = send(&t.app, "GET", "/api/v1/records/u1", Body::empty()).await;
        let json = body_json(resp).await;
        assert_eq!(json["notified"], true);
        assert!(json["missing"].as_array().unwrap().is_empty());

        t.queue.shutdown().await;
        let jobs = t.dispatcher.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].contact_address, "u1@example.com");
    }

    #[tokio::test]
    async fn test_upload_errors() {
        let t = make_app().await;
        let resp = send(&t.app, "PUT", "/api/v1/records/ghost/artifacts/image", Body::from("x")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        register(&t.app, "u1").await;
        let resp = send(&t.app, "PUT", "/api/v1/records/u1/artifacts/video", Body::from("x")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&t.app, "PUT", "/api/v1/records/u1/artifacts/params", Body::from("nope")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_artifact() {
        let t = make_app().await;
        register(&t.app, "u1").await;
        send(&t.app, "PUT", "/api/v1/records/u1/artifacts/audio", Body::from("RIFF")).await;

        let resp = send(&t.app, "GET", "/api/v1/records/u1/artifacts/audio", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/wav");
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"RIFF");

        let resp = send(&t.app, "GET", "/api/v1/records/u1/artifacts/qr", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");

        let resp = send(&t.app, "GET", "/api/v1/records/u1/artifacts/model", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_metadata_replaces_document() {
        let t = make_app().await;
        register(&t.app, "u1").await;

        let body = serde_json::json!({"email": "new@example.com", "qr_code": "changed"});
        let resp = send(&t.app, "PUT", "/api/v1/records/u1/metadata", Body::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["email"], "new@example.com");
        assert_eq!(json["request"], "");
        assert_eq!(json["qr_code"], QR_PNG_B64);
        assert_eq!(json["uuid"], "u1");
    }

    #[tokio::test]
    async fn test_remove_record() {
        let t = make_app().await;
        register(&t.app, "u1").await;

        let resp = send(&t.app, "DELETE", "/api/v1/records/u1", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = send(&t.app, "GET", "/api/v1/records/u1", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], "NOT_FOUND");

        let resp = send(&t.app, "DELETE", "/api/v1/records/u1", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(&t.app, "GET", "/api/v1/records/u1/ready", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
