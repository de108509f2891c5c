use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use giveback_db::models::{ChatMessageRow, ChatRow, parse_id, parse_timestamp};
use giveback_gateway::chat::{self, ChatError};
use giveback_types::api::{CreateChatRequest, SendMessageRequest};
use giveback_types::models::{ChatDetail, ChatSummary};

use crate::db_call;
use crate::error::{ApiError, msg};
use crate::middleware::CurrentUser;
use crate::state::AppState;

fn to_detail(chat: &ChatRow, messages: &[ChatMessageRow]) -> ChatDetail {
    ChatDetail {
        id: parse_id(&chat.id),
        participants: chat.participants(),
        card: chat.card_ref(),
        messages: messages.iter().map(ChatMessageRow::to_message).collect(),
        created_at: parse_timestamp(&chat.created_at),
        updated_at: parse_timestamp(&chat.updated_at),
    }
}

/// Chats the caller takes part in, most recently active first.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let user_id = current.id.to_string();
    let chats = db_call(&state.db, move |db| db.get_chats_for_user(&user_id)).await?;

    let summaries = chats
        .iter()
        .map(|(chat, last)| ChatSummary {
            id: parse_id(&chat.id),
            participants: chat.participants(),
            card: chat.card_ref(),
            last_message: last.as_ref().map(ChatMessageRow::to_message),
            created_at: parse_timestamp(&chat.created_at),
            updated_at: parse_timestamp(&chat.updated_at),
        })
        .collect();

    Ok(Json(summaries))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatDetail>, ApiError> {
    let id = chat_id.clone();
    let chat = db_call(&state.db, move |db| db.get_chat(&id))
        .await?
        .ok_or_else(|| ApiError::not_found(msg::CHAT_NOT_FOUND))?;

    if !chat.has_participant(&current.id.to_string()) {
        return Err(ApiError::forbidden(msg::CHAT_VIEW_FORBIDDEN));
    }

    let messages = db_call(&state.db, move |db| db.get_chat_messages(&chat_id)).await?;
    Ok(Json(to_detail(&chat, &messages)))
}

/// Find or create the chat between the caller and `participantId`,
/// optionally about a card.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let participant_id = req
        .participant_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::validation(msg::PARTICIPANT_REQUIRED))?
        .to_string();
    let card_id = req
        .card_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    if participant_id == current.id.to_string() {
        return Err(ApiError::validation(msg::CHAT_WITH_SELF));
    }

    let pid = participant_id.clone();
    if db_call(&state.db, move |db| db.get_user_by_id(&pid)).await?.is_none() {
        return Err(ApiError::not_found(msg::USER_NOT_FOUND));
    }
    if let Some(card_id) = card_id.clone() {
        if db_call(&state.db, move |db| db.get_card(&card_id)).await?.is_none() {
            return Err(ApiError::not_found(msg::CARD_NOT_FOUND));
        }
    }

    open_chat(&state, &current, participant_id, card_id).await
}

/// Start (or resume) a chat with the owner of a card.
pub async fn start_chat(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(card_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = card_id.clone();
    let card = db_call(&state.db, move |db| db.get_card(&id))
        .await?
        .ok_or_else(|| ApiError::not_found(msg::CARD_NOT_FOUND))?;

    if card.user_id == current.id.to_string() {
        return Err(ApiError::validation(msg::CHAT_ON_OWN_CARD));
    }

    open_chat(&state, &current, card.user_id, Some(card_id)).await
}

async fn open_chat(
    state: &AppState,
    current: &CurrentUser,
    participant_id: String,
    card_id: Option<String>,
) -> Result<(StatusCode, Json<ChatDetail>), ApiError> {
    let creator_id = current.id.to_string();
    let (chat, messages, created) = db_call(&state.db, move |db| {
        let (chat, created) = db.find_or_create_chat(&creator_id, &participant_id, card_id.as_deref())?;
        let messages = if created { Vec::new() } else { db.get_chat_messages(&chat.id)? };
        Ok((chat, messages, created))
    })
    .await?;

    let status = if created {
        info!("{} ({}) opened chat {}", current.username, current.id, chat.id);
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(to_detail(&chat, &messages))))
}

/// REST mirror of the live `sendMessage` command. The stored message is
/// also broadcast to the chat's room.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = chat::send_message(&state.db, &state.dispatcher, &chat_id, current.id, &req.content)
        .await
        .map_err(|e| match e {
            ChatError::EmptyContent => ApiError::validation(msg::CONTENT_REQUIRED),
            ChatError::ChatNotFound => ApiError::not_found(msg::CHAT_NOT_FOUND),
            ChatError::SendForbidden | ChatError::JoinForbidden => {
                ApiError::forbidden(msg::CHAT_SEND_FORBIDDEN)
            }
            ChatError::Internal(inner) => ApiError::Internal(inner),
        })?;

    Ok((StatusCode::CREATED, Json(message)))
}
