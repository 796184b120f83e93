//! Scheduled-post drain webhook
//!
//! An external scheduler (cron, cloud scheduler) hits this endpoint with
//! the shared secret; every due pending post is republished through the
//! orchestrator and moved to a terminal status.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::routes::AppContext;

const SECRET_HEADER: &str = "x-webhook-secret";

pub async fn drain_scheduled(State(ctx): State<AppContext>, headers: HeaderMap) -> Response {
    // No secret configured means the drain surface is switched off.
    let Some(expected) = ctx.service.config().server.webhook_secret.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if presented != Some(expected) {
        warn!("scheduled drain rejected: bad or missing secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid webhook secret"})),
        )
            .into_response();
    }

    match ctx.service.scheduler().drain_due().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            warn!("scheduled drain failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "scheduled drain failed"})),
            )
                .into_response()
        }
    }
}
