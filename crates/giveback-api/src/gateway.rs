use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, warn};

use giveback_gateway::connection;
use giveback_gateway::gate::{self, GateError};
use giveback_types::api::MessageBody;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade. The token is checked before the handshake completes;
/// a bad one gets a 401 and no socket.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(gate::bearer_token);
    let token = query.token.as_deref().filter(|t| !t.is_empty()).or(header_token);

    let identity = match gate::authenticate(&state.db, &state.jwt_secret, token).await {
        Ok(identity) => identity,
        Err(GateError::Internal(e)) => {
            error!("Gateway authentication failed: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageBody {
                    message: GateError::Internal(e).to_string(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            warn!("Gateway connection refused: {}", e);
            return (
                StatusCode::UNAUTHORIZED,
                Json(MessageBody { message: e.to_string() }),
            )
                .into_response();
        }
    };

    let db = state.db.clone();
    let dispatcher = state.dispatcher.clone();
    let heartbeat = state.heartbeat_interval;
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, identity, heartbeat))
}
