use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};

use giveback_db::Database;
use giveback_db::models::{NewUser, UserUpdate};
use giveback_db::queries::is_constraint_violation;
use giveback_gateway::gate;
use giveback_types::api::{AuthResponse, LoginRequest, MessageBody, RegisterRequest, UpdateProfileRequest};
use giveback_types::models::{Role, UserProfile};

use crate::db_call;
use crate::error::{ApiError, msg};
use crate::middleware::CurrentUser;
use crate::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 6;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let email = normalize_email(&req.email);
    validate_username(&username)?;
    validate_email(&email)?;
    validate_password(&req.password)?;

    ensure_unique(&state, Some(&email), Some(&username), None).await?;

    let password_hash = hash_password(&req.password)?;

    let (u, e) = (username.clone(), email.clone());
    let user = giveback_gateway::run_blocking(&state.db, move |db| {
        db.create_user(&NewUser {
            username: &u,
            email: &e,
            password_hash: &password_hash,
            role: Role::User,
        })
    })
    .await
    .map_err(|e| {
        // Lost a race with a concurrent registration.
        if is_constraint_violation(&e) {
            ApiError::validation(msg::EMAIL_TAKEN)
        } else {
            ApiError::Internal(e)
        }
    })?;

    let profile = user.to_profile();
    let token = gate::create_token(&state.jwt_secret, profile.id, &profile.username, state.token_ttl)?;
    info!("Registered user {} ({})", profile.username, profile.id);

    Ok((StatusCode::CREATED, Json(AuthResponse::new(profile, token))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&req.email);
    let user = db_call(&state.db, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::unauthorized(msg::BAD_CREDENTIALS))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("Stored password hash for {} is unreadable: {}", user.id, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized(msg::BAD_CREDENTIALS))?;

    let profile = user.to_profile();
    let token = gate::create_token(&state.jwt_secret, profile.id, &profile.username, state.token_ttl)?;

    Ok(Json(AuthResponse::new(profile, token)))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<UserProfile>, ApiError> {
    let id = current.id.to_string();
    let user = db_call(&state.db, move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::not_found(msg::USER_NOT_FOUND))?;

    Ok(Json(user.to_profile()))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let username = req.username.map(|u| u.trim().to_string());
    let email = req.email.as_deref().map(normalize_email);

    if let Some(username) = &username {
        validate_username(username)?;
    }
    if let Some(email) = &email {
        validate_email(email)?;
    }
    let password_hash = match req.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };

    ensure_unique(&state, email.as_deref(), username.as_deref(), Some(current.id.to_string())).await?;

    let id = current.id.to_string();
    let update = UserUpdate {
        username,
        email,
        phone_number: req.phone_number.map(|p| p.trim().to_string()),
        password_hash,
    };
    let user = db_call(&state.db, move |db| {
        if !db.update_user(&id, &update)? {
            return Ok(None);
        }
        db.get_user_by_id(&id)
    })
    .await?
    .ok_or_else(|| ApiError::not_found(msg::USER_NOT_FOUND))?;

    Ok(Json(user.to_profile()))
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let users = db_call(&state.db, |db| db.list_users()).await?;
    Ok(Json(users.iter().map(|u| u.to_profile()).collect()))
}

/// Admin removal of a user along with their cards and card images.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    if user_id == current.id.to_string() {
        return Err(ApiError::validation(msg::CANNOT_DELETE_SELF));
    }

    let id = user_id.clone();
    let images = db_call(&state.db, move |db| {
        if db.get_user_by_id(&id)?.is_none() {
            return Ok(None);
        }
        let images = db.card_images_for_user(&id)?;
        db.delete_user(&id)?;
        Ok(Some(images))
    })
    .await?
    .ok_or_else(|| ApiError::not_found(msg::USER_NOT_FOUND))?;

    for url in &images {
        state.images.delete(url).await;
    }
    info!(
        "{} ({}) deleted user {} and {} card images",
        current.username,
        current.id,
        user_id,
        images.len()
    );

    Ok(Json(MessageBody {
        message: msg::USER_DELETED.to_string(),
    }))
}

/// Create the configured admin account unless the email is already taken.
pub fn ensure_admin(db: &Database, username: &str, email: &str, password: &str) -> anyhow::Result<()> {
    let email = normalize_email(email);
    if let Some(existing) = db.get_user_by_email(&email)? {
        if existing.role() != Role::Admin {
            warn!("Admin email {} belongs to a regular user; not promoting", email);
        }
        return Ok(());
    }

    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!("{}", e))?;
    let user = db.create_user(&NewUser {
        username,
        email: &email,
        password_hash: &password_hash,
        role: Role::Admin,
    })?;
    info!("Created admin account {} ({})", user.username, user.id);
    Ok(())
}

async fn ensure_unique(
    state: &AppState,
    email: Option<&str>,
    username: Option<&str>,
    except_id: Option<String>,
) -> Result<(), ApiError> {
    let email = email.map(str::to_string);
    let username = username.map(str::to_string);

    let (email_taken, username_taken) = db_call(&state.db, move |db| {
        let taken_by_other = |row: Option<giveback_db::models::UserRow>| {
            row.is_some_and(|r| except_id.as_deref() != Some(r.id.as_str()))
        };
        let email_taken = match &email {
            Some(email) => taken_by_other(db.get_user_by_email(email)?),
            None => false,
        };
        let username_taken = match &username {
            Some(username) => taken_by_other(db.get_user_by_username(username)?),
            None => false,
        };
        Ok((email_taken, username_taken))
    })
    .await?;

    if email_taken {
        return Err(ApiError::validation(msg::EMAIL_TAKEN));
    }
    if username_taken {
        return Err(ApiError::validation(msg::USERNAME_TAKEN));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(ApiError::validation(msg::USERNAME_REQUIRED));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if !is_valid_email(email) {
        return Err(ApiError::validation(msg::INVALID_EMAIL));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(msg::PASSWORD_TOO_SHORT));
    }
    Ok(())
}

/// `local@domain.tld` with no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}
