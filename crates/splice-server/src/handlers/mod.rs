use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod admin;
pub mod files;
pub mod merge;

#[cfg(test)]
pub mod test_helpers;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/merge", post(merge::merge_file))
        .route("/files/{file}", get(files::get_file))
        .route("/files/{file}/chunks", get(files::list_chunks))
        .route("/files/{file}/chunks/{chunk}", put(files::put_chunk))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
