use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use tokio::time::timeout;

use super::data_source::*;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[tracing::instrument]
pub async fn handler(data_src: StateDataSource) -> Response {
    let Ok(result) = timeout(HEALTH_CHECK_TIMEOUT, data_src.is_ready()).await else {
        let msg = serde_json::json!({
            "status": "failure",
            "message": "health check timed out"
        });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(msg)).into_response();
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response(),
        Err(e) => e.into_response(),
    }
}
