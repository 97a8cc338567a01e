//! Server-Sent Events adapter for the change feed.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::sse::{Event, Sse},
};
use beebo_memory::FeedEvent;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::routes::LimitParams;
use crate::state::AppState;

/// Open a change stream. Keepalives come from the feed itself as `: ping`.
pub async fn mcp_sse(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(params) = params?;
    debug!(limit = ?params.limit, "Opening change stream");

    let events = ReceiverStream::new(state.feed.subscribe(params.limit));
    Ok(Sse::new(events.map(|event| Ok(to_sse_event(&event)))))
}

pub fn to_sse_event(event: &FeedEvent) -> Event {
    if let FeedEvent::Ping = event {
        return Event::default().comment("ping");
    }

    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(event.event_name()).data(json),
        Err(e) => {
            warn!(error = %e, event = event.event_name(), "Failed to encode stream event");
            Event::default().comment("encode error")
        }
    }
}
