use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::instrument;

use crate::{
    data::{ClientMessage, ServerMessage},
    lobby::GameCode,
    state::SharedState,
};

// ==============================================================================
// === WebSocket handler: one live subscription per connection
// =============================================================================

#[instrument(skip(ws, state))]
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(code): Path<GameCode>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    tracing::info!(code = %code, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, code, state))
}

fn encode(msg: &ServerMessage) -> Message {
    Message::Text(serde_json::to_string(msg).unwrap_or_default().into())
}

/// Socket lifecycle: subscribe -> current snapshot -> live snapshots, with
/// client messages routed back through the controller. The subscription is
/// torn down when the socket closes, by dropping the receiver.
async fn handle_socket(mut socket: WebSocket, code: GameCode, state: SharedState) {
    let (current, mut rx) = match state.controller.watch(code).await {
        Ok(watch) => watch,
        Err(e) => {
            tracing::warn!(code = %code, error = %e, "subscription rejected");
            let _ = socket
                .send(encode(&ServerMessage::Error { message: e.to_string() }))
                .await;
            let _ = socket.close().await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // First delivery is the current document.
    if ws_sender.send(encode(&ServerMessage::Snapshot(current))).await.is_err() {
        return;
    }

    // Write task: republish every snapshot untransformed.
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(game) => {
                    if ws_sender.send(encode(&ServerMessage::Snapshot(game))).await.is_err() {
                        break;
                    }
                }
                // Fell behind; the next recv resumes from the latest
                // snapshot, which is the allowed coalescing behavior.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(code = %code, skipped, "snapshot feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Read loop (client -> controller).
    while let Some(Ok(msg)) = ws_receiver.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    if apply_client_message(&state, code, client_msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(code = %code, error = %e, "unparseable client message");
                }
            }
        }
    }

    tracing::info!(code = %code, "WebSocket disconnected");
    send_task.abort();
}

/// Routes one client message through the controller. Returns true when the
/// socket should close (the sender left the lobby). The socket is a form
/// boundary like the REST handlers, so updates pass the same name check.
async fn apply_client_message(state: &SharedState, code: GameCode, msg: ClientMessage) -> bool {
    match msg {
        ClientMessage::UpdatePlayer(player) => {
            if let Err(e) = super::rest::validate_name("player name", &player.name) {
                tracing::warn!(code = %code, error = %e, "rejected player update");
                return false;
            }
            if let Err(e) = state.controller.update_player(code, player).await {
                tracing::warn!(code = %code, error = %e, "player update failed");
            }
            false
        }
        ClientMessage::Leave { player_id } => {
            if let Err(e) = state.controller.leave_game(code, player_id).await {
                tracing::warn!(code = %code, error = %e, "leave failed");
            }
            true
        }
    }
}
