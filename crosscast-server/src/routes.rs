//! HTTP routing and request handlers
//!
//! Thin adapters over `CrosscastService`: they parse the wire shapes, call
//! the engine, and map `ReportStatus` / abort errors onto HTTP status
//! codes. No publish logic lives here.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use libcrosscast::error::PublishAbort;
use libcrosscast::orchestrator::PublishOutcome;
use libcrosscast::service::CrosscastService;
use libcrosscast::types::{
    DestinationFailure, DestinationSuccess, DestinationSummary, ReportStatus,
};
use libcrosscast::validate::RawPublishRequest;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub service: Arc<CrosscastService>,
}

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/publish", post(publish_batch))
        .route("/api/publish/stream", post(crate::sse::publish_stream))
        .route("/api/webhooks/scheduled", post(crate::webhook::drain_scheduled))
        .route("/api/reports", get(list_reports))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Batch response body. Both halves of the outcome and the full transcript
/// are always present, whatever the HTTP status.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    status: ReportStatus,
    message: String,
    successful: Vec<DestinationSuccess>,
    failed: Vec<DestinationFailure>,
    publish_report: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AbortResponse {
    status: ReportStatus,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    successful: Vec<DestinationSuccess>,
    failed: Vec<DestinationFailure>,
    publish_report: String,
}

/// The caller's identity, from the `X-User-Id` header.
pub fn user_id_from(headers: &HeaderMap) -> Result<i64, Response> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "missing or invalid X-User-Id header"})),
            )
                .into_response()
        })
}

async fn publish_batch(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(raw): Json<RawPublishRequest>,
) -> Response {
    let user_id = match user_id_from(&headers) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match ctx.service.publish(user_id, &raw).await {
        Ok(outcome) => batch_response(outcome),
        Err(abort) => abort_response(abort),
    }
}

pub fn batch_response(outcome: PublishOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = BatchResponse {
        status: outcome.status,
        message: format!(
            "Published to {} of {} destination(s)",
            outcome.outcomes.successful.len(),
            outcome.outcomes.total()
        ),
        successful: outcome.outcomes.successful,
        failed: outcome.outcomes.failed,
        publish_report: outcome.transcript,
    };
    (status, Json(body)).into_response()
}

pub fn abort_response(abort: PublishAbort) -> Response {
    let status = StatusCode::from_u16(abort.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = AbortResponse {
        status: ReportStatus::Failed,
        message: abort.error.to_string(),
        details: abort.error.details(),
        successful: Vec::new(),
        failed: Vec::new(),
        publish_report: abort.transcript,
    };
    (status, Json(body)).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportsQuery {
    user_id: i64,
    limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportView {
    id: Option<i64>,
    user_id: i64,
    content: String,
    publish_report: String,
    publish_status: ReportStatus,
    publish_destinations: Vec<DestinationSummary>,
    created_at: i64,
}

async fn list_reports(
    State(ctx): State<AppContext>,
    Query(query): Query<ReportsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(20).min(100);
    match ctx.service.reports().recent_for_user(query.user_id, limit).await {
        Ok(reports) => {
            let views: Vec<ReportView> = reports
                .into_iter()
                .map(|r| ReportView {
                    id: r.id,
                    user_id: r.user_id,
                    content: r.content,
                    publish_report: r.publish_report,
                    publish_status: r.publish_status,
                    publish_destinations: r.publish_destinations,
                    created_at: r.created_at,
                })
                .collect();
            Json(views).into_response()
        }
        Err(e) => {
            warn!("report listing failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "report lookup failed"})),
            )
                .into_response()
        }
    }
}
