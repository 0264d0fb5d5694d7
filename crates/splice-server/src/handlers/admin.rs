use axum::response::IntoResponse;

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::handlers::test_helpers::{assert_status, body_bytes, get, setup_app};

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _state, _tmp) = setup_app(0);
        let resp = get(&app, "/health").await;
        assert_status(&resp, StatusCode::OK);
        let body = body_bytes(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("\"status\":\"ok\""));
    }
}
