mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{
    HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use giveback_api::auth;
use giveback_api::images::ImageStore;
use giveback_api::routes;
use giveback_api::state::{AppState, AppStateInner};
use giveback_db::Database;
use giveback_gateway::connection;
use giveback_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "giveback=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_dev_secret() {
        warn!("GIVEBACK_JWT_SECRET is not set; using the development secret");
    }

    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database: {}", config.db_path.display());

    if let Some(admin) = config.admin.clone() {
        giveback_gateway::run_blocking(&db, move |db| {
            auth::ensure_admin(db, &admin.username, &admin.email, &admin.password)
        })
        .await?;
    }

    let images = ImageStore::new(config.upload_dir.clone()).await?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl,
        images,
        heartbeat_interval: connection::HEARTBEAT_INTERVAL,
    });

    let app = routes::router(state)
        .layer(cors_layer(config.client_url.as_deref())?)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Giveback server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn cors_layer(client_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = client_url else {
        return Ok(CorsLayer::permissive());
    };

    info!("CORS restricted to {}", origin);
    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
