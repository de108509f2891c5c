use std::path::PathBuf;

use anyhow::{Context, Result};

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";
const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// Admin account created at startup when both email and password are set.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub upload_dir: PathBuf,
    /// Allowed CORS origin; `None` means any origin.
    pub client_url: Option<String>,
    pub admin: Option<AdminBootstrap>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("GIVEBACK_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("GIVEBACK_PORT is not a port: {}", raw))?,
            None => 5000,
        };
        let token_ttl = match var("GIVEBACK_TOKEN_TTL_DAYS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|d| *d > 0)
                .and_then(chrono::Duration::try_days)
                .with_context(|| format!("GIVEBACK_TOKEN_TTL_DAYS must be a positive number of days: {}", raw))?,
            None => chrono::Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        };

        let admin = match (var("GIVEBACK_ADMIN_EMAIL"), var("GIVEBACK_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap {
                username: var("GIVEBACK_ADMIN_USERNAME").unwrap_or_else(|| "admin".into()),
                email,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            host: var("GIVEBACK_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("GIVEBACK_DB_PATH").unwrap_or_else(|| "giveback.db".into()).into(),
            jwt_secret: var("GIVEBACK_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into()),
            token_ttl,
            upload_dir: var("GIVEBACK_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            client_url: var("GIVEBACK_CLIENT_URL"),
            admin,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
