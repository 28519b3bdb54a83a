//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the subscriber connection
//! lifecycle: register with the hub, forward broadcasts to the socket, route
//! inbound control messages, unregister on close.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::control::{ControlHandshake, ControlOrigin};
use super::hub::BroadcastHub;
use crate::api::AppState;
use crate::protocol::{parse_text, Envelope};

/// WebSocket upgrade handler
///
/// This is the entry point for subscriber connections.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    let handshake = Arc::clone(&state.handshake);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, handshake))
}

/// Handle an established WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    hub: Arc<BroadcastHub>,
    handshake: Arc<ControlHandshake>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Serialized payloads destined for this subscriber
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let subscriber_id = match hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting subscriber connection");
            let _ = sender
                .send(WsMessage::Close(Some(CloseFrame {
                    code: close_code::AGAIN,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let id_for_send = subscriber_id.clone();

    // Task to forward hub payloads to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(WsMessage::Text(text)).await.is_err() {
                tracing::debug!(
                    subscriber_id = %id_for_send,
                    "WebSocket send failed, closing connection"
                );
                return;
            }
        }

        // Hub dropped the channel (shutdown)
        let _ = sender
            .send(WsMessage::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "relay shutting down".into(),
            })))
            .await;
    });

    let id_for_recv = subscriber_id.clone();

    // Task to receive control messages from the subscriber
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&handshake, &id_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        subscriber_id = %id_for_recv,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    hub.unregister(&subscriber_id).await;
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(
    handshake: &ControlHandshake,
    subscriber_id: &str,
    message: WsMessage,
) -> bool {
    match message {
        WsMessage::Text(text) => {
            match parse_text(&text) {
                Ok(Envelope::Control(control)) => {
                    handshake.handle(control, ControlOrigin::Subscriber).await;
                }
                Ok(Envelope::Message(_)) => {
                    // Ordinary messages only flow from producers to subscribers
                    tracing::debug!(
                        subscriber_id = %subscriber_id,
                        "Ignoring ordinary message from subscriber"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        subscriber_id = %subscriber_id,
                        error = %e,
                        text = %text,
                        "Invalid subscriber message"
                    );
                }
            }
            true
        }
        WsMessage::Binary(_) => {
            tracing::debug!(subscriber_id = %subscriber_id, "Ignoring binary frame");
            true
        }
        // Axum answers pings automatically
        WsMessage::Ping(_) | WsMessage::Pong(_) => true,
        WsMessage::Close(_) => {
            tracing::debug!(subscriber_id = %subscriber_id, "Subscriber requested close");
            false
        }
    }
}
