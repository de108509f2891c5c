use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, UserRef};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// The upgrade token was accepted
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid, username: String },

    /// A message was appended to a chat the connection has joined
    NewMessage(NewMessage),

    /// A command from this connection failed; the connection stays open
    Error { message: String },
}

impl GatewayEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

/// Payload of `newMessage`: the stored message with its sender expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub chat_id: String,
    pub sender: UserRef,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(chat_id: impl Into<String>, message: ChatMessage) -> Self {
        Self {
            chat_id: chat_id.into(),
            sender: message.sender,
            content: message.content,
            timestamp: message.timestamp,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Subscribe this connection to a chat's room
    JoinChat(String),

    /// Unsubscribe from a chat's room
    LeaveChat(String),

    /// Append a message and broadcast it to the room
    SendMessage(SendMessagePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub chat_id: String,
    #[serde(default)]
    pub content: String,
}
