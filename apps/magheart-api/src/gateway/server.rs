//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};

use crate::AppState;

use super::events::{ClientCommand, ClientMessage, ServerMessage};
use super::presence::PresenceEngine;
use super::registry::{ConnectionHandle, CONNECTION_QUEUE_CAPACITY};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{meeting_id}/{user_id}", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path((meeting_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, meeting_id, user_id))
}

async fn handle_connection(socket: WebSocket, state: AppState, meeting_id: String, user_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let presence = state.presence.clone();

    let (handle, mut rx) = ConnectionHandle::new(&user_id, CONNECTION_QUEUE_CAPACITY);
    let conn_id = handle.id.clone();

    // The registry owns the only sender: once it is dropped (prune or
    // meeting retired) the writer drains and closes the socket.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.close().await;
    });

    presence.register(&meeting_id, handle).await;
    presence
        .announce(&meeting_id, &ServerMessage::status(format!("User {user_id} joined.")))
        .await;

    tracing::info!(%meeting_id, %user_id, %conn_id, "meeting socket connected");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&presence, &meeting_id, &user_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, %meeting_id, %conn_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Writer ended: the connection was dropped server-side.
            _ = &mut writer => break,
        }
    }

    writer.abort();

    presence.unregister(&meeting_id, &user_id, &conn_id).await;
    presence.cleanup_stale(&meeting_id).await;
    presence
        .announce(&meeting_id, &ServerMessage::status(format!("User {user_id} left.")))
        .await;

    tracing::info!(%meeting_id, %user_id, %conn_id, "meeting socket closed");
}

/// Apply one inbound text frame. Anything unparseable is dropped and the
/// connection stays open.
async fn handle_text(presence: &PresenceEngine, meeting_id: &str, user_id: &str, text: &str) {
    let Some(command) = ClientMessage::parse(text).and_then(|m| m.into_command(user_id)) else {
        tracing::debug!(meeting_id, user_id, "dropping malformed frame");
        return;
    };

    match command {
        ClientCommand::Join(attrs) => presence.join(meeting_id, user_id, &attrs).await,
        ClientCommand::Heartbeat(attrs) => presence.heartbeat(meeting_id, user_id, &attrs).await,
        ClientCommand::Leave => presence.leave(meeting_id, user_id).await,
        ClientCommand::UpdatePhase(phase) => {
            presence.update_phase(meeting_id, &phase, user_id).await
        }
        ClientCommand::UpdateSharedContext(patch) => {
            presence
                .update_shared_context(meeting_id, &patch, user_id)
                .await
        }
        ClientCommand::Relay { kind, payload } => {
            presence
                .announce(meeting_id, &ServerMessage::relay(kind, payload))
                .await
        }
    }
}
