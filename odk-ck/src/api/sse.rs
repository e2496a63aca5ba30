//! SSE bridge for kiosk events
//!
//! Converts the broadcast event stream into an axum SSE response with
//! keep-alives. Lagging clients drop events rather than stalling the
//! engine.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::state::SharedState;

/// Build the SSE response for a new client connection
pub fn event_stream(
    state: &Arc<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected");

    let rx = state.subscribe_events();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(kiosk_event) => Event::default().json_data(&kiosk_event).ok().map(Ok),
            Err(e) => {
                // Lagged receiver; skip and continue
                warn!("SSE client lagged: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
