//! WebSocket progress subscription
//!
//! GET /ws/{client_id}: registers the connection with the progress hub and
//! forwards hub messages as JSON text frames. The client may send
//! `{"type":"ping"}` and gets `{"type":"pong"}` back.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use riff_common::events::ClientMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::{subscriber_channel, ProgressHub};
use crate::AppState;

/// GET /ws/{client_id}
pub async fn progress_socket(
    ws: WebSocketUpgrade,
    Path(client_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, hub))
}

async fn handle_socket(socket: WebSocket, client_id: Uuid, hub: ProgressHub) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = subscriber_channel();

    // The hub owns the only strong sender; when it drops it, the writer ends
    let weak = tx.downgrade();
    hub.register(client_id, tx).await;
    info!(client_id = %client_id, "WebSocket connected");

    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(kind = message.kind(), error = %e, "Failed to serialize message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    hub.touch(client_id).await;
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Ping) => {
                            hub.send_pong(client_id).await;
                        }
                        Err(_) => {
                            debug!(client_id = %client_id, message = %text, "Ignoring unknown client message");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => hub.touch(client_id).await,
                Some(Err(e)) => {
                    debug!(client_id = %client_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
            // Hub dropped us (replaced, stale or send failure)
            _ = &mut writer => break,
        }
    }

    if let Some(tx) = weak.upgrade() {
        hub.unregister_handle(client_id, &tx).await;
    }
    writer.abort();
    info!(client_id = %client_id, "WebSocket disconnected");
}
