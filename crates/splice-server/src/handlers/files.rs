//! The `/files` surface: chunk uploads, chunk listings, and downloads
//! of assembled files.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use splice_protocol::{is_valid_file_name, ChunkKey, StagedChunk, StagedChunksResponse};

use crate::error::ServerError;
use crate::state::AppState;

const READ_BUF_SIZE: usize = 256 * 1024;

/// PUT /files/{file}/chunks/{chunk}
///
/// Streams one chunk into the staging area. The body goes to a temp
/// file first and is renamed into place only once fully written, so a
/// dropped connection never leaves a half chunk behind. Returns 201 on
/// first upload, 204 when an existing chunk was replaced.
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((file, chunk)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ServerError> {
    if !is_valid_file_name(&file) {
        return Err(ServerError::BadRequest(format!(
            "invalid file name: '{file}'"
        )));
    }
    if ChunkKey::parse(&file).is_some() {
        return Err(ServerError::BadRequest(format!(
            "invalid file name: '{file}' (a trailing '-<digits>' suffix is reserved for chunks)"
        )));
    }
    if !is_valid_file_name(&chunk) {
        return Err(ServerError::BadRequest(format!(
            "invalid chunk name: '{chunk}'"
        )));
    }
    let Some(key) = ChunkKey::parse(&chunk) else {
        return Err(ServerError::BadRequest(format!(
            "invalid chunk name: '{chunk}' (expected '{{fileName}}-{{index}}')"
        )));
    };
    if key.file_name != file {
        return Err(ServerError::BadRequest(format!(
            "chunk '{chunk}' does not belong to file '{file}'"
        )));
    }

    let max_bytes = state.inner.config.max_chunk_bytes;
    if max_bytes > 0 {
        if let Some(declared) = content_length(&headers) {
            if declared > max_bytes {
                return Err(ServerError::PayloadTooLarge(format!(
                    "chunk exceeds the {max_bytes} byte limit"
                )));
            }
        }
    }

    let staging = state.staging();
    staging.ensure_root().await?;
    let final_path = staging.entry_path(&chunk)?;
    let temp_path = staging.temp_path_for(&chunk)?;
    let existed = tokio::fs::metadata(&final_path).await.is_ok();

    let mut reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    let mut writer = BufWriter::new(tokio::fs::File::create(&temp_path).await?);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut received: u64 = 0;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(err) => {
                drop(writer);
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(ServerError::BadRequest(format!(
                    "failed to read request body: {err}"
                )));
            }
        };
        if n == 0 {
            break;
        }
        received += n as u64;
        if max_bytes > 0 && received > max_bytes {
            drop(writer);
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ServerError::PayloadTooLarge(format!(
                "chunk exceeds the {max_bytes} byte limit"
            )));
        }
        if let Err(err) = writer.write_all(&buf[..n]).await {
            drop(writer);
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
    }
    if let Err(err) = writer.flush().await {
        drop(writer);
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }
    drop(writer);

    if let Err(err) = tokio::fs::rename(&temp_path, &final_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }

    debug!(file = %file, chunk = %chunk, bytes = received, "chunk staged");
    let status = if existed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CREATED
    };
    Ok(status.into_response())
}

/// GET /files/{file}
///
/// Streams an assembled file back.
pub async fn get_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, ServerError> {
    let path = state.staging().output_path(&file)?;
    let handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServerError::NotFound(format!("file '{file}'")));
        }
        Err(err) => return Err(err.into()),
    };
    let len = handle.metadata().await?.len();

    let mut response = Body::from_stream(ReaderStream::new(handle)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok(response)
}

/// GET /files/{file}/chunks
///
/// Reports which chunks of `file` are currently staged, sorted by
/// index, so a client can see what is missing before asking for a
/// merge.
pub async fn list_chunks(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Json<StagedChunksResponse>, ServerError> {
    let entries = state.staging().list_chunks(&file).await?;
    let chunks = entries
        .into_iter()
        .map(|entry| StagedChunk {
            index: entry.index,
            len: entry.len,
        })
        .collect();
    Ok(Json(StagedChunksResponse {
        file_name: file,
        chunks,
    }))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use crate::handlers::test_helpers::{
        assert_no_temp_files, assert_status, body_bytes, get, put_chunk, setup_app,
    };

    #[tokio::test]
    async fn put_creates_then_overwrites() {
        let (app, state, _tmp) = setup_app(0);

        let resp = put_chunk(&app, "f", "f-0", b"old!").await;
        assert_status(&resp, StatusCode::CREATED);

        let resp = put_chunk(&app, "f", "f-0", b"new!").await;
        assert_status(&resp, StatusCode::NO_CONTENT);

        let stored = std::fs::read(state.staging().root().join("f-0")).unwrap();
        assert_eq!(stored, b"new!");
        assert_no_temp_files(&state);
    }

    #[tokio::test]
    async fn staging_dir_is_created_on_first_upload() {
        let (app, state, _tmp) = setup_app(0);
        assert!(!state.staging().root().exists());

        let resp = put_chunk(&app, "f", "f-0", b"data").await;
        assert_status(&resp, StatusCode::CREATED);
        assert!(state.staging().root().is_dir());
    }

    #[tokio::test]
    async fn put_rejects_chunk_of_another_file() {
        let (app, _state, _tmp) = setup_app(0);
        let resp = put_chunk(&app, "f", "g-0", b"data").await;
        assert_status(&resp, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_rejects_unparseable_chunk_name() {
        let (app, _state, _tmp) = setup_app(0);
        let resp = put_chunk(&app, "f", "f-abc", b"data").await;
        assert_status(&resp, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_rejects_path_traversal() {
        let (app, state, _tmp) = setup_app(0);
        let resp = put_chunk(&app, "%2E%2E", "%2E%2E-0", b"data").await;
        assert_status(&resp, StatusCode::BAD_REQUEST);
        assert!(!state.staging().root().exists());
    }

    #[tokio::test]
    async fn put_rejects_file_named_like_a_chunk() {
        let (app, state, _tmp) = setup_app(0);

        // "x-0" parses as chunk 0 of "x"; accepting it as a file would
        // let a merge of "x" consume its assembled output.
        let resp = put_chunk(&app, "x-0", "x-0-1", b"data").await;
        assert_status(&resp, StatusCode::BAD_REQUEST);
        assert!(!state.staging().root().exists());
    }

    #[tokio::test]
    async fn put_enforces_chunk_cap_from_header() {
        let (app, state, _tmp) = setup_app(16);
        let resp = put_chunk(&app, "f", "f-0", &[0u8; 64]).await;
        assert_status(&resp, StatusCode::PAYLOAD_TOO_LARGE);
        assert_no_temp_files(&state);
    }

    #[tokio::test]
    async fn put_enforces_chunk_cap_mid_stream() {
        let (app, state, _tmp) = setup_app(16);
        // No Content-Length header, so the cap only trips while
        // draining the body.
        let req = Request::builder()
            .method("PUT")
            .uri("/files/f/chunks/f-0")
            .body(Body::from(vec![0u8; 64]))
            .unwrap();
        let resp = crate::handlers::test_helpers::send(&app, req).await;
        assert_status(&resp, StatusCode::PAYLOAD_TOO_LARGE);
        assert_no_temp_files(&state);
        assert!(!state.staging().root().join("f-0").exists());
    }

    #[tokio::test]
    async fn concurrent_puts_leave_clean_staging() {
        let (app, state, _tmp) = setup_app(0);
        let (a, b) = tokio::join!(
            put_chunk(&app, "f", "f-0", &[b'a'; 4096]),
            put_chunk(&app, "f", "f-1", &[b'b'; 4096]),
        );
        assert_status(&a, StatusCode::CREATED);
        assert_status(&b, StatusCode::CREATED);
        assert_no_temp_files(&state);
    }

    #[tokio::test]
    async fn download_of_missing_file_is_404() {
        let (app, _state, _tmp) = setup_app(0);
        let resp = get(&app, "/files/ghost").await;
        assert_status(&resp, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_reports_staged_chunks_for_one_file() {
        let (app, _state, _tmp) = setup_app(0);
        put_chunk(&app, "f", "f-1", b"bb").await;
        put_chunk(&app, "f", "f-0", b"aa").await;
        put_chunk(&app, "g", "g-0", b"zz").await;

        let resp = get(&app, "/files/f/chunks").await;
        assert_status(&resp, StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["fileName"], "f");
        assert_eq!(body["chunks"][0]["index"], 0);
        assert_eq!(body["chunks"][1]["index"], 1);
        assert_eq!(body["chunks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn listing_of_unknown_file_is_empty() {
        let (app, _state, _tmp) = setup_app(0);
        let resp = get(&app, "/files/nothing/chunks").await;
        assert_status(&resp, StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["chunks"].as_array().unwrap().len(), 0);
    }
}
