//! Postgres backend for the Weave tables.
//!
//! Connection pooling follows the usual `DATABASE_URL` / `DATABASE_POOL_SIZE`
//! conventions; `PgWeaveStore::ensure_schema` creates the tables if missing.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{info, warn};

mod store;

pub use store::PgWeaveStore;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/portal_db".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }
}

/// Open a connection pool for `config`.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        "Connecting to database: {}",
        mask_database_url(&config.database_url)
    );

    let mut pool_options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connection_timeout);

    if let Some(idle_timeout) = config.idle_timeout {
        pool_options = pool_options.idle_timeout(idle_timeout);
    }

    if let Some(max_lifetime) = config.max_lifetime {
        pool_options = pool_options.max_lifetime(max_lifetime);
    }

    pool_options
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            warn!("Failed to connect to database: {}", e);
            e
        })
}

fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else if url.chars().count() > 20 {
        let head: String = url.chars().take(10).collect();
        let mut tail: Vec<char> = url.chars().rev().take(10).collect();
        tail.reverse();
        format!("{}***{}", head, tail.into_iter().collect::<String>())
    } else {
        "***".to_string()
    }
}
