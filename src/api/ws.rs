// WebSocket transport adapter: one persistent framed connection per
// player. Guarantees in-order delivery per connection (single outbound
// channel), rejects malformed frames by closing, and surfaces disconnects
// to the room manager.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::engine::validate;
use crate::metrics;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::RoomCommand;

use super::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    pub player_id: String,
}

/// Upgrade handler for `/ws/rooms/{id}?playerId=...`.
pub async fn ws_room(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(room) = state.registry.get(&room_id) else {
        return (StatusCode::NOT_FOUND, "Room not found").into_response();
    };
    if !room.has_player(&params.player_id) {
        return (StatusCode::BAD_REQUEST, "Player not in room").into_response();
    }
    ws.on_upgrade(move |socket| handle_ws(socket, state, room_id, params.player_id))
}

async fn handle_ws(socket: WebSocket, state: AppState, room_id: String, player_id: String) {
    let Some(room) = state.registry.get(&room_id) else {
        return;
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let cached_start = match room.attach(&player_id, out_tx) {
        Ok(cached) => cached,
        Err(e) => {
            tracing::warn!(%room_id, %player_id, "WS attach failed: {e}");
            return;
        }
    };
    metrics::CONNECTED_WEBSOCKETS.inc();
    tracing::info!(%room_id, %player_id, "WebSocket attached");

    let (mut sender, mut receiver) = socket.split();

    // Rejoining a live match: replay the cached gameStart frame so the
    // client has the map before the next snapshot lands.
    if let Some(json) = cached_start {
        if sender.send(Message::Text(json.into())).await.is_err() {
            cleanup(&state, &room_id, &player_id);
            return;
        }
    }

    // Outbound pump: room worker frames -> socket, in order.
    let mut forward = tokio::spawn(async move {
        while let Some(json) = out_rx.recv().await {
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound loop: parse frames, gate them, enqueue room commands.
    loop {
        tokio::select! {
            _ = &mut forward => break,
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if !handle_client_message(&state, &room_id, &player_id, msg) {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Malformed frames close the connection.
                                tracing::warn!(%room_id, %player_id, "Malformed frame: {e}");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary control frames
                }
            }
        }
    }

    forward.abort();
    cleanup(&state, &room_id, &player_id);
}

fn cleanup(state: &AppState, room_id: &str, player_id: &str) {
    metrics::CONNECTED_WEBSOCKETS.dec();
    if let Some(room) = state.registry.get(room_id) {
        room.handle_disconnect(player_id);
        // Pending input dies with the connection.
        room.command(RoomCommand::Disconnected {
            player_id: player_id.to_string(),
        });
    }
    tracing::info!(room_id, player_id, "WebSocket detached");
}

/// Returns false when the connection should close.
fn handle_client_message(
    state: &AppState,
    conn_room_id: &str,
    conn_player_id: &str,
    msg: ClientMessage,
) -> bool {
    let Some(room) = state.registry.get(conn_room_id) else {
        return false;
    };

    // Every inbound frame counts as liveness.
    let _ = room.mark_ping(conn_player_id);

    match msg {
        ClientMessage::Action {
            room_id,
            player_id,
            action,
            client_tick,
            action_id,
            timestamp,
            claimed,
        } => {
            // A frame claiming someone else's identity is a protocol
            // violation, not a rejectable action.
            if room_id != conn_room_id || player_id != conn_player_id {
                tracing::warn!(
                    conn_room_id,
                    conn_player_id,
                    "Frame identity mismatch, closing"
                );
                return false;
            }

            let now_ms = chrono::Utc::now().timestamp_millis();

            // Validator gate 1: rate limits.
            if let Err(e) = state.rate_limiter.check(&player_id) {
                room.send_to(
                    &player_id,
                    &ServerMessage::ActionRejected {
                        action_id,
                        reason: e.to_string(),
                    },
                );
                metrics::ACTIONS_REJECTED_TOTAL
                    .with_label_values(&["rate"])
                    .inc();
                return true;
            }

            // Coarse clock-skew guard.
            if let Err(e) = validate::validate_timestamp(timestamp, now_ms) {
                room.send_to(
                    &player_id,
                    &ServerMessage::ActionRejected {
                        action_id,
                        reason: e.to_string(),
                    },
                );
                metrics::ACTIONS_REJECTED_TOTAL
                    .with_label_values(&["clock"])
                    .inc();
                return true;
            }

            let delivered = room.command(RoomCommand::Submit {
                player_id: player_id.clone(),
                action,
                action_id: action_id.clone(),
                client_tick,
                arrival_ms: now_ms,
                claimed,
            });
            if !delivered {
                room.send_to(
                    &player_id,
                    &ServerMessage::ActionRejected {
                        action_id,
                        reason: "Room is not playing".to_string(),
                    },
                );
            }
            true
        }
        ClientMessage::Join {
            room_id,
            player_id,
            player_name,
        } => {
            if let Err(e) = state.registry.join(&room_id, player_id, player_name) {
                room.send_to(
                    conn_player_id,
                    &ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
            true
        }
        ClientMessage::Leave { room_id, player_id } => {
            if player_id == conn_player_id {
                let _ = state.registry.leave(&room_id, &player_id);
                state.rate_limiter.forget(&player_id);
            }
            false
        }
        ClientMessage::Ready { room_id, player_id } => {
            if let Err(e) = state.registry.ready(&room_id, &player_id) {
                room.send_to(
                    conn_player_id,
                    &ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
            true
        }
        ClientMessage::Ping {
            room_id,
            player_id,
            timestamp,
        } => {
            let _ = state.registry.ping(&room_id, &player_id);
            room.send_to(&player_id, &ServerMessage::Pong { timestamp });
            true
        }
    }
}
