use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use giveback_gateway::gate::{self, GateError};
use giveback_types::models::Role;

use crate::error::{ApiError, msg};
use crate::state::AppState;

/// The authenticated caller, inserted as a request extension by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners and admins may modify a resource.
    pub fn can_modify(&self, owner_id: &str) -> bool {
        self.is_admin() || self.id.to_string() == owner_id
    }
}

/// Validate the Bearer token and make sure its user still exists.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(gate::bearer_token);

    let identity = gate::authenticate(&state.db, &state.jwt_secret, token)
        .await
        .map_err(|e| match e {
            GateError::Internal(inner) => ApiError::Internal(inner),
            GateError::UserNotFound => ApiError::unauthorized(msg::USER_NOT_FOUND),
            GateError::MissingToken | GateError::InvalidToken => {
                ApiError::unauthorized(msg::NOT_AUTHENTICATED)
            }
        })?;

    req.extensions_mut().insert(CurrentUser {
        id: identity.id,
        username: identity.username,
        role: identity.role,
    });
    Ok(next.run(req).await)
}

/// Must run after [`require_auth`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| ApiError::unauthorized(msg::NOT_AUTHENTICATED))?
        .is_admin();

    if !is_admin {
        return Err(ApiError::forbidden(msg::ADMIN_ONLY));
    }
    Ok(next.run(req).await)
}
