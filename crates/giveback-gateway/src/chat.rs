//! Chat operations shared by the live connection and the REST mirror.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use giveback_db::Database;
use giveback_db::models::AppendOutcome;
use giveback_types::events::{GatewayEvent, NewMessage};
use giveback_types::models::ChatMessage;

use crate::dispatcher::Dispatcher;
use crate::run_blocking;

/// Failure of a chat operation. The display strings are what the live
/// connection sees in its `error` event.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat not found")]
    ChatNotFound,
    #[error("Not authorized to join this chat")]
    JoinForbidden,
    #[error("Not authorized to send messages in this chat")]
    SendForbidden,
    #[error("Message content is required")]
    EmptyContent,
    #[error("Server error")]
    Internal(#[from] anyhow::Error),
}

/// Subscribe a connection to a chat's room if its user is a participant.
pub async fn join_chat(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    conn_id: Uuid,
    user_id: Uuid,
    chat_id: &str,
) -> Result<(), ChatError> {
    let id = chat_id.to_string();
    let chat = run_blocking(db, move |db| db.get_chat(&id))
        .await?
        .ok_or(ChatError::ChatNotFound)?;

    if !chat.has_participant(&user_id.to_string()) {
        return Err(ChatError::JoinForbidden);
    }

    dispatcher.join(conn_id, chat_id).await;
    Ok(())
}

/// Append a message to the chat and broadcast it to the chat's room.
/// Checks run in order: chat exists, sender participates, content is not
/// blank. Nothing is stored unless all three pass.
pub async fn send_message(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    chat_id: &str,
    sender_id: Uuid,
    content: &str,
) -> Result<ChatMessage, ChatError> {
    let id = chat_id.to_string();
    let chat = run_blocking(db, move |db| db.get_chat(&id))
        .await?
        .ok_or(ChatError::ChatNotFound)?;
    if !chat.has_participant(&sender_id.to_string()) {
        return Err(ChatError::SendForbidden);
    }
    if content.trim().is_empty() {
        return Err(ChatError::EmptyContent);
    }

    let cid = chat_id.to_string();
    let sid = sender_id.to_string();
    let body = content.to_string();
    let outcome = run_blocking(db, move |db| db.append_message(&cid, &sid, &body))
        .await
        .map_err(|e| {
            error!("append_message failed for chat {}: {:#}", chat_id, e);
            ChatError::Internal(e)
        })?;

    let message = match outcome {
        AppendOutcome::Appended(row) => row.to_message(),
        AppendOutcome::ChatNotFound => return Err(ChatError::ChatNotFound),
        AppendOutcome::NotParticipant => return Err(ChatError::SendForbidden),
    };

    let delivered = dispatcher
        .broadcast_to_room(chat_id, GatewayEvent::NewMessage(NewMessage::new(chat_id, message.clone())))
        .await;
    info!(
        "{} ({}) posted to chat {} ({} live recipients)",
        message.sender.username, sender_id, chat_id, delivered
    );

    Ok(message)
}
