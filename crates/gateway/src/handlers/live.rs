//! Server-sent event streams over live projections
//!
//! Each event carries a complete snapshot; clients replace whatever they
//! rendered before. The projection, and with it the store subscription, is
//! dropped when the client disconnects.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use studyvault_workflow::{LiveProjection, Projection};
use tracing::warn;

pub fn snapshots<P, T, F>(mut live: LiveProjection<P>, render: F) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    P: Projection + 'static,
    T: Serialize,
    F: Fn(P::Output) -> T + Send + 'static,
{
    let stream = async_stream::stream! {
        while let Some(next) = live.next().await {
            let event = match next {
                Ok(output) => match Event::default().event("snapshot").json_data(render(output)) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode snapshot");
                        break;
                    }
                },
                Err(e) => Event::default().event("error").data(e.to_string()),
            };
            yield Ok(event);
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
