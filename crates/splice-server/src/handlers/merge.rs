//! The merge endpoint: assembles a fully staged file on request.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use splice_core::merge;
use splice_protocol::{validate_merge_request, MergeRequest, MergeResponse};

use crate::error::ServerError;
use crate::state::AppState;

/// POST /merge
///
/// Validates the staged chunk sequence for the named file, copies the
/// chunks into the output concurrently, and deletes them once the
/// result is verified. Only one merge per file runs at a time; a
/// second request for the same file gets 409 instead of corrupting the
/// first one's output.
pub async fn merge_file(
    State(state): State<AppState>,
    Json(req): Json<MergeRequest>,
) -> Result<impl IntoResponse, ServerError> {
    validate_merge_request(&req).map_err(ServerError::BadRequest)?;

    let Some(_guard) = state.begin_merge(&req.file_name) else {
        return Err(ServerError::Conflict(format!(
            "merge already in progress for '{}'",
            req.file_name
        )));
    };

    let outcome = merge::run(
        state.staging(),
        &req.file_name,
        req.size,
        state.inner.config.merge_parallelism,
    )
    .await?;

    info!(
        file = %req.file_name,
        chunks = outcome.chunks_merged,
        bytes = outcome.output_len,
        "file merged"
    );
    Ok(Json(MergeResponse {
        file_name: req.file_name,
        output_len: outcome.output_len,
        chunks_merged: outcome.chunks_merged,
    }))
}
