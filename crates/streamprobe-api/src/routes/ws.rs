//! WebSocket subscriptions: one socket per stream, fed by the event bus.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::debug;

use streamprobe_core::{EventKind, StreamEvent};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/streams/{id}", get(ws_handler))
}

async fn ws_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, id, socket))
}

async fn handle_socket(state: AppState, stream_id: String, mut socket: WebSocket) {
    let bus = state.engine.bus();
    let mut subscription = bus.subscribe(&stream_id);
    debug!(%stream_id, subscriber = %subscription.id, "WebSocket connected");

    bus.send_personal(
        &stream_id,
        subscription.id,
        StreamEvent::new(EventKind::Connected, &stream_id, serde_json::json!({})),
    );

    loop {
        tokio::select! {
            event = subscription.rx.recv() => {
                match event {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Evicted by the bus (e.g. the stream was removed).
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(_))) => {
                        // Any client text is answered with a pong.
                        let pong = StreamEvent::new(
                            EventKind::Pong,
                            &stream_id,
                            serde_json::json!({}),
                        );
                        let Ok(body) = serde_json::to_string(&pong) else {
                            continue;
                        };
                        if socket.send(Message::Text(body.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.engine.bus().unsubscribe(&stream_id, subscription.id);
    debug!(%stream_id, subscriber = %subscription.id, "WebSocket disconnected");
}
