use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use giveback_db::Database;
use giveback_types::events::{GatewayCommand, GatewayEvent};

use crate::chat::{self, ChatError};
use crate::dispatcher::{Dispatcher, personal_room};
use crate::gate::Identity;

/// Default heartbeat: the server sends a Ping every 15 seconds.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Consecutive unanswered Pings before the connection is dropped.
const MAX_MISSED_PONGS: u8 = 2;

/// Handle a WebSocket whose token was already accepted at the upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    identity: Identity,
    heartbeat_interval: Duration,
) {
    let (mut sender, mut receiver) = socket.split();
    let user_id = identity.id;
    let username = identity.username.clone();

    info!("{} ({}) connected to gateway", username, user_id);

    let (conn_id, mut outbound) = dispatcher.register(user_id).await;

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.unregister(conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &db, conn_id, &recv_identity, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_identity.username,
                            recv_identity.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_dispatcher
                            .send_to_connection(conn_id, GatewayEvent::error("Invalid payload"))
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conn_id: Uuid,
    identity: &Identity,
    cmd: GatewayCommand,
) {
    let result = match cmd {
        GatewayCommand::JoinChat(chat_id) => {
            let joined = chat::join_chat(db, dispatcher, conn_id, identity.id, &chat_id).await;
            if joined.is_ok() {
                info!("{} ({}) joined chat {}", identity.username, identity.id, chat_id);
            }
            joined
        }

        GatewayCommand::LeaveChat(chat_id) => {
            if chat_id == personal_room(identity.id) {
                warn!("{} ({}) tried to leave their personal room", identity.username, identity.id);
            } else if dispatcher.leave(conn_id, &chat_id).await {
                info!("{} ({}) left chat {}", identity.username, identity.id, chat_id);
            }
            Ok(())
        }

        GatewayCommand::SendMessage(payload) => {
            chat::send_message(db, dispatcher, &payload.chat_id, identity.id, &payload.content)
                .await
                .map(|_| ())
        }
    };

    if let Err(e) = result {
        if let ChatError::Internal(inner) = &e {
            error!("{} ({}) command failed: {:#}", identity.username, identity.id, inner);
        } else {
            warn!("{} ({}) command rejected: {}", identity.username, identity.id, e);
        }
        dispatcher
            .send_to_connection(conn_id, GatewayEvent::error(e.to_string()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use giveback_db::models::NewUser;
    use giveback_types::models::Role;

    use super::*;

    fn identity(db: &Database) -> Identity {
        let row = db
            .create_user(&NewUser {
                username: "dana",
                email: "dana@example.com",
                password_hash: "hash",
                role: Role::User,
            })
            .unwrap();
        Identity {
            id: row.id.parse().unwrap(),
            username: row.username,
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn personal_room_cannot_be_left() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new();
        let me = identity(&db);
        let (conn_id, mut rx) = dispatcher.register(me.id).await;
        dispatcher.join(conn_id, "chat123").await;

        let own_room = personal_room(me.id);
        handle_command(&dispatcher, &db, conn_id, &me, GatewayCommand::LeaveChat(own_room.clone())).await;
        handle_command(&dispatcher, &db, conn_id, &me, GatewayCommand::LeaveChat("chat123".into())).await;

        assert!(dispatcher.is_member(conn_id, &own_room).await);
        assert!(!dispatcher.is_member(conn_id, "chat123").await);
        assert!(rx.try_recv().is_err(), "leave never replies");
        assert_eq!(dispatcher.send_to_user(me.id, GatewayEvent::error("still reachable")).await, 1);
    }
}
