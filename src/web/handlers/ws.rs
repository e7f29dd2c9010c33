//! WebSocket transport for the game protocol

use crate::services::{Broadcaster, ConnectionId, ProtocolHandler};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub async fn websocket(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: AppState) {
    let connection = ConnectionId::new();
    tracing::info!("[WS] client '{}' connected as {}", client_id, connection);

    let (mut sink, mut stream) = socket.split();

    // Outbound: hub events visible to this connection.
    let mut events = Box::pin(state.hub.subscribe(connection));
    let writer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if sink.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound: frames are queued so the reader keeps watching the socket
    // while the handler is mid-drive.
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (disconnect_tx, disconnect_rx) = watch::channel(false);

    let broadcaster: Arc<dyn Broadcaster> = Arc::new(state.hub.clone());
    let handler = ProtocolHandler::new(
        connection,
        state.backend.clone(),
        Arc::clone(&state.settings),
        broadcaster,
        disconnect_rx,
    );
    let driver = tokio::spawn(handler.run(inbound_rx));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if inbound_tx.send(text.as_str().to_owned()).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("[WS] {} read error: {}", connection, e);
                break;
            }
        }
    }

    let _ = disconnect_tx.send(true);
    drop(inbound_tx);
    if let Err(e) = driver.await {
        tracing::error!("[WS] {} protocol task failed: {}", connection, e);
    }
    writer.abort();

    tracing::info!("[WS] client '{}' ({}) disconnected", client_id, connection);
}
