use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Role, UserProfile};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway upgrade check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Returned by register and login: the profile plus a fresh token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub token: String,
}

impl AuthResponse {
    pub fn new(profile: UserProfile, token: String) -> Self {
        Self {
            id: profile.id,
            username: profile.username,
            email: profile.email,
            role: profile.role,
            token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub password: Option<String>,
}

// -- Cards --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardQuery {
    pub card_type: Option<String>,
    pub category: Option<String>,
    pub search_query: Option<String>,
}

/// Raw query strings; parsed by the handler so bad numbers map to a 400
/// with a readable message.
#[derive(Debug, Default, Deserialize)]
pub struct NearbyQuery {
    pub longitude: Option<String>,
    pub latitude: Option<String>,
    pub distance: Option<String>,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub participant_id: Option<String>,
    pub card_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
}

// -- Generic --

/// `{"message": ...}` body used for errors and plain acknowledgements.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}
