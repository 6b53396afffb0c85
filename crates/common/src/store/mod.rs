//! Remote data store abstraction
//!
//! Three collections, mirrored by three traits:
//! - `resources/{id}`
//! - `users/{uid}`
//! - `users/{uid}/chat_history/{msgId}`
//!
//! Mutations are field-level atomic primitives (increment, set-add,
//! set-remove) so concurrent writers never lose each other's updates.
//! Live queries push full snapshots through a [`Subscription`].

mod memory;
mod subscription;

pub use memory::MemoryStore;
pub use subscription::{Delivery, Publisher, Subscription};

use async_trait::async_trait;

use crate::domain::{
    ChatMessage, Identity, NewResource, ProfileUpdate, Resource, ResourceFilter, ResourceId,
    ResourceUpdate, Role, UserId, UserProfile,
};
use crate::errors::Result;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a resource; the store assigns its id
    async fn insert_resource(&self, new: NewResource) -> Result<Resource>;

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>>;

    /// Apply one atomic field update
    async fn update_resource(&self, id: &ResourceId, update: ResourceUpdate) -> Result<()>;

    /// Hard delete. Returns whether a document was removed.
    async fn delete_resource(&self, id: &ResourceId) -> Result<bool>;

    /// One-shot query, newest first
    async fn query_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>>;

    /// Live query, newest first
    async fn watch_resources(&self, filter: ResourceFilter) -> Result<Subscription<Vec<Resource>>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>>;

    /// Create or merge the caller's own profile. Never changes the role.
    async fn upsert_profile(&self, identity: &Identity, update: ProfileUpdate) -> Result<UserProfile>;

    async fn set_role(&self, uid: &UserId, role: Role) -> Result<()>;

    /// Set-add or set-remove on the saved resource ids
    async fn update_saved(&self, uid: &UserId, resource: &ResourceId, saved: bool) -> Result<()>;

    async fn watch_profile(&self, uid: &UserId) -> Result<Subscription<Option<UserProfile>>>;
}

#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn append_message(&self, uid: &UserId, message: ChatMessage) -> Result<()>;

    /// The most recent `limit` turns in ascending order
    async fn watch_history(&self, uid: &UserId, limit: usize) -> Result<Subscription<Vec<ChatMessage>>>;
}

/// Everything the application needs from its backing store
#[async_trait]
pub trait DataStore: ResourceStore + ProfileStore + ChatHistoryStore {
    /// Connectivity check for readiness
    async fn ping(&self) -> Result<()>;
}
