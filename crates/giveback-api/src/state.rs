use std::sync::Arc;
use std::time::Duration;

use giveback_db::Database;
use giveback_gateway::dispatcher::Dispatcher;

use crate::images::ImageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub images: ImageStore,
    /// Ping interval for gateway connections.
    pub heartbeat_interval: Duration,
}
