//! Database row types. These map directly to SQLite rows; the `to_*`
//! helpers turn them into the wire models in `giveback-types`.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use giveback_types::models::{
    Card, CardRef, CardType, ChatMessage, Location, Role, UserProfile, UserRef,
};

pub const UNKNOWN_USERNAME: &str = "unknown";

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub phone_number: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_else(|e| {
            warn!("Corrupt role on user '{}': {}", self.id, e);
            Role::User
        })
    }

    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: parse_id(&self.id),
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role(),
            phone_number: self.phone_number.clone(),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

/// Fields needed to insert a user; the id and timestamp are generated.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

/// Partial profile update; `None` keeps the stored value.
#[derive(Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CardRow {
    pub id: String,
    pub card_type: String,
    pub item_name: String,
    pub description: String,
    pub phone_number: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub address: String,
    pub user_id: String,
    pub owner_username: String,
    pub created_at: String,
}

impl CardRow {
    pub fn to_card(&self, distance: Option<f64>) -> Card {
        Card {
            id: parse_id(&self.id),
            card_type: self.card_type.parse().unwrap_or_else(|e| {
                warn!("Corrupt card_type on card '{}': {}", self.id, e);
                CardType::Donation
            }),
            item_name: self.item_name.clone(),
            description: self.description.clone(),
            phone_number: self.phone_number.clone(),
            category: self.category.clone(),
            image_url: self.image_url.clone(),
            location: Location::new(self.longitude, self.latitude, self.address.clone()),
            user: UserRef {
                id: parse_id(&self.user_id),
                username: self.owner_username.clone(),
            },
            created_at: parse_timestamp(&self.created_at),
            distance,
        }
    }
}

/// Fields needed to insert a card.
pub struct NewCard {
    pub card_type: CardType,
    pub item_name: String,
    pub description: String,
    pub phone_number: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub address: String,
    pub user_id: String,
}

/// Filters for the card listing. Empty strings are treated as absent by
/// the caller.
#[derive(Default)]
pub struct CardFilter {
    pub card_type: Option<CardType>,
    pub category: Option<String>,
    pub search: Option<String>,
}

/// A chat joined with its participants' usernames and its card, if the
/// card still exists.
#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: String,
    pub participant_one: String,
    pub participant_one_username: Option<String>,
    pub participant_two: String,
    pub participant_two_username: Option<String>,
    pub card_id: Option<String>,
    pub card_item_name: Option<String>,
    pub card_image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatRow {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_one == user_id || self.participant_two == user_id
    }

    pub fn participants(&self) -> Vec<UserRef> {
        vec![
            user_ref(&self.participant_one, self.participant_one_username.as_deref()),
            user_ref(&self.participant_two, self.participant_two_username.as_deref()),
        ]
    }

    /// `None` when the chat has no card or the card was deleted.
    pub fn card_ref(&self) -> Option<CardRef> {
        match (&self.card_id, &self.card_item_name) {
            (Some(id), Some(item_name)) => Some(CardRef {
                id: parse_id(id),
                item_name: item_name.clone(),
                image_url: self.card_image_url.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessageRow {
    pub chat_id: String,
    pub position: i64,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub content: String,
    pub created_at: String,
}

impl ChatMessageRow {
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            sender: user_ref(&self.sender_id, self.sender_username.as_deref()),
            content: self.content.clone(),
            timestamp: parse_timestamp(&self.created_at),
        }
    }
}

/// Result of an append attempt. Membership is checked under the same lock
/// as the insert.
#[derive(Debug)]
pub enum AppendOutcome {
    Appended(ChatMessageRow),
    ChatNotFound,
    NotParticipant,
}

fn user_ref(id: &str, username: Option<&str>) -> UserRef {
    UserRef {
        id: parse_id(id),
        username: username.unwrap_or(UNKNOWN_USERNAME).to_string(),
    }
}

pub fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}': {}", raw, e);
        Uuid::default()
    })
}

/// Timestamps are written as RFC 3339; SQLite's own `datetime('now')`
/// format is accepted as a fallback.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
