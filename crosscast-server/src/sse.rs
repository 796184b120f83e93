//! Server-Sent Events publish streaming
//!
//! The streaming variant of the publish endpoint. The orchestration runs
//! in a spawned task with its own event bus, so closing the response stops
//! event delivery but never the publish itself: dispatched platform calls
//! run to completion and the report is persisted either way.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::Json;
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use libcrosscast::service::events::EventBus;
use libcrosscast::validate::RawPublishRequest;

use crate::routes::{user_id_from, AppContext};

pub async fn publish_stream(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(raw): Json<RawPublishRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let user_id = user_id_from(&headers)?;
    debug!(user_id, "new publish stream");

    // Per-request bus: each stream sees exactly one publish. Subscribe
    // before spawning so no event can slip past.
    let bus = EventBus::new(100);
    let rx = bus.subscribe();

    let orchestrator = Arc::clone(ctx.service.orchestrator());
    tokio::spawn(async move {
        if let Err(abort) = orchestrator.publish(user_id, &raw, &bus).await {
            debug!(user_id, error = %abort.error, "streamed publish aborted");
        }
    });

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.sse_name()).data(json))),
                Err(e) => {
                    warn!("failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged or closed; the stream ends when the bus drops.
                warn!("publish stream error: {:?}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
