//! The long-lived push channel: WebSocket connection lifecycle plus the
//! client→server event loop (typing relay, online-list pulls, bulk seen).
//!
//! Each connection gets an unbounded mpsc channel; a forward task drains
//! it into the socket. Pushes are fire-and-forget: if the socket's buffer
//! backs up, the transport's own behavior applies and nothing is retried.

use std::collections::HashSet;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use palaver_shared::protocol::{ClientEvent, ServerEvent};
use palaver_shared::{GroupId, UserId};

use crate::api::AppState;
use crate::presence::PushSender;

#[derive(Deserialize)]
pub struct WsParams {
    /// Authenticated identity, forwarded by the auth gateway.
    pub user_id: UserId,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.user_id, state))
}

async fn handle_socket(socket: WebSocket, user: UserId, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Forward task: drain pushed events into the WebSocket sink.
    let forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let connection_id = Uuid::new_v4();
    state.registry.register(user, connection_id, tx.clone());
    info!(user = %user, connection = %connection_id, "push channel connected");

    // Groups this connection has joined, gating group typing relays.
    let mut joined_groups: HashSet<GroupId> = HashSet::new();

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(&state, user, &tx, &mut joined_groups, event),
                Err(e) => {
                    debug!(user = %user, error = %e, "ignoring malformed client event");
                }
            },
            Ok(WsMessage::Close(_)) => break,
            // Ping/pong and binary frames need no application handling.
            Ok(_) => {}
            Err(e) => {
                warn!(user = %user, error = %e, "websocket error");
                break;
            }
        }
    }

    state.registry.unregister(user, connection_id);
    info!(user = %user, connection = %connection_id, "push channel closed");

    drop(tx);
    let _ = forward_task.await;
}

fn handle_client_event(
    state: &AppState,
    user: UserId,
    tx: &PushSender,
    joined_groups: &mut HashSet<GroupId>,
    event: ClientEvent,
) {
    match event {
        // Ephemeral typing relay: resolve the target, forward verbatim.
        // An offline target means there is nothing to show; drop silently.
        ClientEvent::Typing { to } => {
            state.registry.send_to(to, ServerEvent::Typing { from: user });
        }
        ClientEvent::StopTyping { to } => {
            state.registry.send_to(to, ServerEvent::StopTyping { from: user });
        }

        ClientEvent::GroupTyping { group_id, is_typing, user_name } => {
            if !joined_groups.contains(&group_id) {
                debug!(user = %user, group = %group_id, "group typing without join ignored");
                return;
            }
            let members = {
                let db = state.db.lock().expect("db lock poisoned");
                db.group_members(group_id).unwrap_or_default()
            };
            let event = ServerEvent::GroupTyping {
                group_id,
                from: user,
                user_name,
                is_typing,
            };
            for member in members.into_iter().filter(|m| *m != user) {
                state.registry.send_to(member, event.clone());
            }
        }

        // Answered on this connection specifically, covering the race
        // where a client connects after the broadcast already fired.
        ClientEvent::GetOnlineUsers => {
            let users = state.registry.snapshot_online_users();
            if tx.send(ServerEvent::OnlineUsers { users }).is_err() {
                debug!(user = %user, "online-users reply dropped, connection closing");
            }
        }

        ClientEvent::MarkMessagesSeen { sender_id } => {
            let result = {
                let db = state.db.lock().expect("db lock poisoned");
                db.mark_seen_bulk(user, sender_id)
            };
            match result {
                Ok((ids, seen_at)) => state.fanout.messages_seen(sender_id, user, ids, seen_at),
                Err(e) => warn!(user = %user, error = %e, "bulk mark-seen failed"),
            }
        }

        ClientEvent::JoinGroup { group_id } => {
            let is_member = {
                let db = state.db.lock().expect("db lock poisoned");
                db.is_group_member(group_id, user).unwrap_or(false)
            };
            if is_member {
                joined_groups.insert(group_id);
                debug!(user = %user, group = %group_id, "joined group channel");
            } else {
                debug!(user = %user, group = %group_id, "join refused, not a member");
            }
        }
        ClientEvent::LeaveGroup { group_id } => {
            joined_groups.remove(&group_id);
            debug!(user = %user, group = %group_id, "left group channel");
        }
    }
}
