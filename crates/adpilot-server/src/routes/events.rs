use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /api/events: SSE stream of engine events, named by kind with a JSON payload.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let rx = app.engine.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        // lagged receivers skip what they missed
        let ev = msg.ok()?;
        let data = serde_json::to_string(&ev).ok()?;
        Some(Ok::<Event, Infallible>(Event::default().event(ev.name()).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
