// ABOUTME: WebSocket event channel — pushes event-hub envelopes to connected clients.
// ABOUTME: Token-authenticated via query parameter; slow or dead clients are dropped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::SharedState;
use super::auth::AUTH_TOKEN_KEY;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: String,
}

/// `GET /ws?token=…` — upgrade and stream event envelopes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> Response {
    let expected = state.secrets.get(AUTH_TOKEN_KEY).unwrap_or_default();
    if expected.is_empty() || query.token != expected {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| pump_events(socket, state))
        .into_response()
}

/// Forward hub broadcasts until either side goes away. Inbound frames are
/// ignored; the channel is push-only.
async fn pump_events(mut socket: WebSocket, state: SharedState) {
    let (subscriber_id, mut events) = state.hub.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(envelope) => {
                        if socket.send(Message::Text(envelope.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.hub.unsubscribe(subscriber_id);
    tracing::debug!("ws subscriber {subscriber_id} disconnected");
}
