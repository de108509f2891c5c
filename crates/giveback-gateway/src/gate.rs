use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use giveback_db::Database;
use giveback_types::api::Claims;
use giveback_types::models::Role;

use crate::run_blocking;

/// Identity attached to a connection (or request) once its token checks out.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Authentication error")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("User not found")]
    UserNotFound,
    #[error("Server error")]
    Internal(#[from] anyhow::Error),
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Check signature and expiry.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, GateError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| GateError::InvalidToken)?;

    Ok(token_data.claims)
}

/// Verify the token and resolve it to a user that still exists.
pub async fn authenticate(
    db: &Arc<Database>,
    secret: &str,
    token: Option<&str>,
) -> Result<Identity, GateError> {
    let token = token.filter(|t| !t.is_empty()).ok_or(GateError::MissingToken)?;
    let claims = verify_token(secret, token)?;

    let user_id = claims.sub.to_string();
    let user = run_blocking(db, move |db| db.get_user_by_id(&user_id))
        .await?
        .ok_or(GateError::UserNotFound)?;

    Ok(Identity {
        id: claims.sub,
        username: user.username.clone(),
        role: user.role(),
    })
}

/// Token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").map(str::trim)
}
