//! Configuration management for StudyVault services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Data store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Media upload endpoint configuration
    #[serde(default)]
    pub media: MediaConfig,

    /// Assistant (LLM) configuration
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration (chat endpoint)
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Which data store backs the service
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, contents are lost on restart
    Memory,
    /// PostgreSQL with LISTEN/NOTIFY live queries
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Store backend
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Database URL (postgres backend only)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply the bundled schema on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    /// Upload API base, e.g. https://api.cloudinary.com/v1_1/<cloud>
    #[serde(default = "default_media_base")]
    pub api_base: String,

    /// Unsigned upload preset
    #[serde(default = "default_upload_preset")]
    pub upload_preset: String,

    /// Root folder; the department code is appended
    #[serde(default = "default_media_folder")]
    pub folder_root: String,

    /// Request timeout in seconds
    #[serde(default = "default_media_timeout")]
    pub timeout_secs: u64,

    /// Host serving uploaded files; the only host context files are fetched from
    #[serde(default = "default_delivery_host")]
    pub delivery_host: String,

    /// Largest context file the assistant downloads, in bytes
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantConfig {
    /// API key for the inference service
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_assistant_base")]
    pub api_base: String,

    /// Model tried first
    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    /// Model tried when the primary fails
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Request timeout in seconds
    #[serde(default = "default_assistant_timeout")]
    pub timeout_secs: u64,

    /// Where clients reach the chat endpoint
    #[serde(default = "default_chat_url")]
    pub chat_url: String,

    /// Number of persisted turns loaded into a conversation
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// JWT secret for session token signing
    pub jwt_secret: Option<String>,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,

    /// Only identities with this email domain may sign in
    #[serde(default = "default_allowed_domain")]
    pub allowed_domain: String,

    /// Admin roles granted on profile completion, uid -> scope ("all" or a department)
    #[serde(default)]
    pub admins: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_max_upload_bytes() -> usize { 25 * 1024 * 1024 }
fn default_backend() -> StoreBackend { StoreBackend::Memory }
fn default_database_url() -> String { "postgres://localhost/studyvault".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_run_migrations() -> bool { true }
fn default_media_base() -> String { "https://api.cloudinary.com/v1_1/studyvault".to_string() }
fn default_upload_preset() -> String { "studyvault_unsigned".to_string() }
fn default_media_folder() -> String { "studyvault".to_string() }
fn default_media_timeout() -> u64 { 60 }
fn default_delivery_host() -> String { "res.cloudinary.com".to_string() }
fn default_max_fetch_bytes() -> usize { 20 * 1024 * 1024 }
fn default_assistant_base() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_primary_model() -> String { "gemini-flash-latest".to_string() }
fn default_fallback_model() -> String { "gemini-pro-latest".to_string() }
fn default_assistant_timeout() -> u64 { 60 }
fn default_chat_url() -> String { "http://localhost:8080/api/chat".to_string() }
fn default_history_limit() -> usize { 50 }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_allowed_domain() -> String { crate::DEFAULT_ALLOWED_DOMAIN.to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "studyvault".to_string() }
fn default_rate_limit() -> u32 { 5 }
fn default_burst() -> u32 { 10 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            api_base: default_media_base(),
            upload_preset: default_upload_preset(),
            folder_root: default_media_folder(),
            timeout_secs: default_media_timeout(),
            delivery_host: default_delivery_host(),
            max_fetch_bytes: default_max_fetch_bytes(),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_assistant_base(),
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            timeout_secs: default_assistant_timeout(),
            chat_url: default_chat_url(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_expiration_secs: default_jwt_expiration(),
            allowed_domain: default_allowed_domain(),
            admins: HashMap::new(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            media: MediaConfig::default(),
            assistant: AssistantConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.assistant.primary_model, "gemini-flash-latest");
        assert_eq!(config.assistant.fallback_model, "gemini-pro-latest");
        assert_eq!(config.auth.allowed_domain, "sahyadri.edu.in");
    }

    #[test]
    fn test_backend_parsing() {
        let backend: StoreBackend = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(backend, StoreBackend::Postgres);
    }
}
