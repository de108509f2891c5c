pub mod auth;
pub mod cards;
pub mod chats;
pub mod error;
pub mod gateway;
pub mod images;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use giveback_db::Database;

use crate::error::ApiError;

/// Run a blocking database call and surface failures as a 500.
pub(crate) async fn db_call<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    giveback_gateway::run_blocking(db, f).await.map_err(ApiError::Internal)
}
