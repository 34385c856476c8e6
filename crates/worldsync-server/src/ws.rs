//! `WebSocket` subscription endpoint.
//!
//! Clients connect to `GET /subscribe`. The first text frame they receive
//! is the whole world as `{entity: fields, ...}`; after that every change
//! to any entity arrives as a single-entity `{entity: fields}` frame,
//! including changes the client made itself. Text frames the client sends
//! are parsed as `{entity: fields, ...}` and each entity is written to the
//! world.
//!
//! This module only adapts the socket into the text stream / text sink
//! shape a [`Session`] expects; the session owns the lifecycle.

use std::future;
use std::string::FromUtf8Error;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, warn};
use worldsync_core::Session;

use crate::state::AppState;

/// Errors surfaced by the inbound half of a socket.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The transport failed.
    #[error("websocket transport error: {0}")]
    Transport(#[from] axum::Error),

    /// A binary frame did not hold UTF-8 text.
    #[error("binary frame is not UTF-8: {0}")]
    NonUtf8(#[from] FromUtf8Error),
}

/// Upgrade an HTTP request to a `WebSocket` subscription.
///
/// # Route
///
/// `GET /subscribe`
pub async fn ws_subscribe(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Run one session over an upgraded socket.
async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let session = match Session::connect(Arc::clone(&state.world)) {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Failed to start session");
            return;
        }
    };
    let id = session.id();
    if !state.track(session.handle()) {
        // Shutdown already swept; dropping the session releases its listener.
        return;
    }

    let (sink, stream) = socket.split();
    let summary = session.run(inbound_frames(stream), outbound_text(sink)).await;

    state.untrack(id);
    debug!(session_id = %id, cause = %summary.cause, "WebSocket released");
}

/// Turn raw socket messages into the session's inbound text frames.
///
/// Text frames pass through and binary frames are accepted when they hold
/// UTF-8. Ping and pong are dropped (Axum answers pings itself). A close
/// frame ends the stream, same as the socket going away.
pub fn inbound_frames<S>(
    stream: S,
) -> impl Stream<Item = Result<String, ConnectionError>> + Unpin + Send
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    Some(String::from_utf8(bytes.to_vec()).map_err(ConnectionError::from))
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
                Err(e) => Some(Err(ConnectionError::from(e))),
            })
        })
}

/// Wrap the socket's write half so the session can send plain text.
pub fn outbound_text<K>(sink: K) -> impl Sink<String, Error = K::Error> + Unpin + Send
where
    K: Sink<Message> + Unpin + Send,
    K::Error: Send,
{
    sink.with(|text: String| future::ready(Ok::<_, K::Error>(Message::Text(text.into()))))
}
