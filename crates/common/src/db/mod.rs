//! Database layer for StudyVault
//!
//! Provides:
//! - SeaORM entity models
//! - PostgreSQL-backed data store
//! - Change feed (LISTEN/NOTIFY) driving live queries
//! - Connection pool management

pub mod models;
mod notify;
mod store;

pub use notify::{Change, ChangeFeed, CHANGE_CHANNEL};
pub use store::PgStore;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Bundled schema, applied when `run_migrations` is set
const SCHEMA: &str = include_str!("../../../../migrations/0001_init.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(true);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Apply the bundled schema; every statement is idempotent
    pub async fn migrate(&self) -> Result<()> {
        self.conn.execute_unprepared(SCHEMA).await?;
        info!("Schema applied");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}
