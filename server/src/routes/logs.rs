//! Live deployment log stream over Server-Sent Events.
//!
//! Every connection gets its own relay task; the stream ends when the
//! relay does (terminal deployment, retry budget exhausted, or the client
//! disconnecting, which the relay notices on its next poll).

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::mpsc;

use crate::routes::AppState;
use crate::services::relay::{self, RelayEvent};

pub async fn stream_logs(
    State(state): State<AppState>,
    Path(deployment_id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    static ACTIVE: AtomicUsize = AtomicUsize::new(0);

    let (tx, rx) = mpsc::channel(64);
    let orchestrator = state.orchestrator.clone();
    let relay_config = state.config.relay_config();
    tokio::spawn(async move {
        crate::metrics::active_relays(ACTIVE.fetch_add(1, Ordering::SeqCst) + 1);
        relay::run(orchestrator, deployment_id, relay_config, tx).await;
        crate::metrics::active_relays(ACTIVE.fetch_sub(1, Ordering::SeqCst) - 1);
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse_event(event)), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: RelayEvent) -> Event {
    match event {
        RelayEvent::Log(chunk) => Event::default().event("log").data(chunk),
        RelayEvent::Status(status) => Event::default().event("status").data(status.as_str()),
        RelayEvent::Complete(status) => Event::default().event("complete").data(status.as_str()),
        RelayEvent::Error(message) => Event::default().event("error").data(message),
    }
}
