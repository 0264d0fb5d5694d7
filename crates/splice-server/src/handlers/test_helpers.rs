//! Shared setup for handler tests: an app wired to a temp staging
//! directory, plus small request builders.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use tower::ServiceExt;

use splice_protocol::TEMP_PREFIX;

use crate::config::ServerSection;
use crate::state::AppState;

/// Build a router against a fresh temp directory. The staging root is
/// a subdirectory that does not exist yet, so tests cover lazy
/// creation. Keep the `TempDir` alive for the duration of the test.
pub fn setup_app(max_chunk_bytes: u64) -> (Router, AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = ServerSection {
        staging_dir: tmp.path().join("chunks").to_string_lossy().into_owned(),
        max_chunk_bytes,
        ..ServerSection::default()
    };
    let state = AppState::new(config);
    (super::router(state.clone()), state, tmp)
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("send request")
}

pub async fn put_chunk(app: &Router, file: &str, chunk: &str, body: &[u8]) -> Response<Body> {
    let req = Request::builder()
        .method("PUT")
        .uri(format!("/files/{file}/chunks/{chunk}"))
        .header("content-length", body.len())
        .body(Body::from(body.to_vec()))
        .unwrap();
    send(app, req).await
}

pub async fn get(app: &Router, path: &str) -> Response<Body> {
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn post_json(app: &Router, path: &str, body: serde_json::Value) -> Response<Body> {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read response body")
        .to_vec()
}

pub fn assert_status(resp: &Response<Body>, expected: StatusCode) {
    assert_eq!(resp.status(), expected, "unexpected status");
}

/// No in-flight temp files may survive a finished request, whatever
/// the outcome was.
pub fn assert_no_temp_files(state: &AppState) {
    let root = state.staging().root();
    if !root.exists() {
        return;
    }
    for entry in std::fs::read_dir(root).expect("read staging dir") {
        let name = entry.expect("dir entry").file_name();
        let name = name.to_string_lossy();
        assert!(!name.starts_with(TEMP_PREFIX), "temp file left behind: {name}");
    }
}
