//! StudyVault Common Library
//!
//! Shared code for the StudyVault workspace including:
//! - Domain types (resources, profiles, chat history)
//! - Data store traits with in-process and PostgreSQL implementations
//! - Media store and assistant (LLM) clients
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod assistant;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod media;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use domain::{
    AdminScope, ChatMessage, ChatRole, FileKind, Identity, Resource, ResourceId, ResourceStatus,
    Role, UserId, UserProfile,
};
pub use errors::{AppError, Result};
pub use store::{DataStore, Delivery, MemoryStore, Subscription};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Email domain accepted by default when none is configured
pub const DEFAULT_ALLOWED_DOMAIN: &str = "sahyadri.edu.in";
