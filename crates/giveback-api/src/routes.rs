use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::services::ServeDir;

use crate::images::MAX_IMAGE_SIZE;
use crate::middleware::{require_admin, require_auth};
use crate::state::AppState;
use crate::{auth, cards, chats, gateway};

/// Room for the text fields of a card form on top of the image.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Assemble every route: REST under `/api`, the gateway at `/socket` and
/// stored images under `/uploads`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/cards", get(cards::list_cards))
        .route("/api/cards/near", get(cards::nearby_cards))
        .route("/api/cards/{id}", get(cards::get_card))
        .route("/socket", get(gateway::ws_upgrade));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth::me).put(auth::update_me))
        .route("/api/cards", post(cards::create_card))
        .route("/api/cards/user", get(cards::my_cards))
        .route("/api/cards/{id}", put(cards::update_card).delete(cards::delete_card))
        .route("/api/chat", get(chats::list_chats).post(chats::create_chat))
        .route("/api/chat/start/{card_id}", post(chats::start_chat))
        .route("/api/chat/{id}", get(chats::get_chat))
        .route("/api/chat/{id}/messages", post(chats::post_message))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE + FORM_OVERHEAD))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route("/api/auth/users", get(auth::list_users))
        .route("/api/auth/users/{id}", delete(auth::delete_user))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let uploads = ServeDir::new(state.images.dir());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .nest_service("/uploads", uploads)
        .with_state(state)
}
