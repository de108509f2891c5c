pub mod chat;
pub mod connection;
pub mod dispatcher;
pub mod gate;

use std::sync::Arc;

use giveback_db::Database;

/// Run a blocking database call off the async runtime.
pub async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
