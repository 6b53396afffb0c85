//! In-process data store
//!
//! Backs local development and tests. Live queries are re-evaluated after
//! every committed write; subscribers that have gone away are pruned on the
//! same pass.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ChatHistoryStore, DataStore, Delivery, ProfileStore, Publisher, ResourceStore, Subscription};
use crate::domain::{
    ChatMessage, Identity, NewResource, ProfileUpdate, Resource, ResourceFilter, ResourceId,
    ResourceUpdate, Role, UserId, UserProfile,
};
use crate::errors::{AppError, Result};

#[derive(Default)]
struct State {
    resources: HashMap<ResourceId, Resource>,
    profiles: HashMap<UserId, UserProfile>,
    chats: HashMap<UserId, Vec<ChatMessage>>,

    resource_watchers: Vec<(ResourceFilter, Publisher<Vec<Resource>>)>,
    profile_watchers: Vec<(UserId, Publisher<Option<UserProfile>>)>,
    chat_watchers: Vec<(UserId, usize, Publisher<Vec<ChatMessage>>)>,

    offline: bool,
    write_attempts: u64,
}

impl State {
    fn begin_write(&mut self) -> Result<()> {
        self.write_attempts += 1;
        if self.offline {
            return Err(AppError::ServiceUnavailable {
                message: "data store is offline".to_string(),
            });
        }
        Ok(())
    }

    fn select(&self, filter: &ResourceFilter) -> Vec<Resource> {
        let mut matched: Vec<Resource> = self
            .resources
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        matched
    }

    fn history(&self, uid: &UserId, limit: usize) -> Vec<ChatMessage> {
        let all = self.chats.get(uid).map(Vec::as_slice).unwrap_or(&[]);
        all[all.len().saturating_sub(limit)..].to_vec()
    }

    fn publish_resources(&mut self) {
        let watchers = std::mem::take(&mut self.resource_watchers);
        let live: Vec<_> = watchers
            .into_iter()
            .filter(|(filter, publisher)| publisher.publish(Delivery::Snapshot(self.select(filter))))
            .collect();
        self.resource_watchers = live;
    }

    fn publish_profile(&mut self, uid: &UserId) {
        let current = self.profiles.get(uid).cloned();
        self.profile_watchers.retain(|(watched, publisher)| {
            if watched == uid {
                publisher.publish(Delivery::Snapshot(current.clone()))
            } else {
                !publisher.is_closed()
            }
        });
    }

    fn publish_history(&mut self, uid: &UserId) {
        let watchers = std::mem::take(&mut self.chat_watchers);
        let live: Vec<_> = watchers
            .into_iter()
            .filter(|(watched, limit, publisher)| {
                if watched == uid {
                    publisher.publish(Delivery::Snapshot(self.history(uid, *limit)))
                } else {
                    !publisher.is_closed()
                }
            })
            .collect();
        self.chat_watchers = live;
    }
}

/// Data store held entirely in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as if the network dropped
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Number of write calls received, failed ones included
    pub async fn write_attempts(&self) -> u64 {
        self.state.lock().await.write_attempts
    }

    /// Live queries with a subscriber still attached
    pub async fn active_subscriptions(&self) -> usize {
        let state = self.state.lock().await;
        state.resource_watchers.iter().filter(|(_, p)| !p.is_closed()).count()
            + state.profile_watchers.iter().filter(|(_, p)| !p.is_closed()).count()
            + state.chat_watchers.iter().filter(|(_, _, p)| !p.is_closed()).count()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn insert_resource(&self, new: NewResource) -> Result<Resource> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.begin_write()?;

        let resource = new.into_resource(ResourceId::generate(), Utc::now());
        state.resources.insert(resource.id.clone(), resource.clone());
        state.publish_resources();

        debug!(resource_id = %resource.id, "Resource inserted");
        Ok(resource)
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        Ok(self.state.lock().await.resources.get(id).cloned())
    }

    async fn update_resource(&self, id: &ResourceId, update: ResourceUpdate) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.begin_write()?;

        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| AppError::ResourceNotFound { id: id.to_string() })?;

        // Apply to a copy so a refused update leaves the document untouched
        let mut updated = resource.clone();
        let changed = update.apply(&mut updated)?;
        if changed {
            *resource = updated;
            state.publish_resources();
        }
        Ok(())
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.begin_write()?;

        let removed = state.resources.remove(id).is_some();
        if removed {
            state.publish_resources();
        }
        Ok(removed)
    }

    async fn query_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        Ok(self.state.lock().await.select(filter))
    }

    async fn watch_resources(&self, filter: ResourceFilter) -> Result<Subscription<Vec<Resource>>> {
        let mut state = self.state.lock().await;
        let (publisher, subscription) = Subscription::channel();
        publisher.publish(Delivery::Snapshot(state.select(&filter)));
        state.resource_watchers.push((filter, publisher));
        Ok(subscription)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.state.lock().await.profiles.get(uid).cloned())
    }

    async fn upsert_profile(&self, identity: &Identity, update: ProfileUpdate) -> Result<UserProfile> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.begin_write()?;

        let now = Utc::now();
        let profile = match state.profiles.get_mut(&identity.uid) {
            Some(existing) => {
                existing.apply(update, now);
                existing.clone()
            }
            None => {
                let created = UserProfile::create(identity, update, now);
                state.profiles.insert(identity.uid.clone(), created.clone());
                created
            }
        };
        state.publish_profile(&identity.uid);
        Ok(profile)
    }

    async fn set_role(&self, uid: &UserId, role: Role) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.begin_write()?;

        let profile = state
            .profiles
            .get_mut(uid)
            .ok_or_else(|| AppError::ProfileNotFound { uid: uid.to_string() })?;
        profile.role = role;
        profile.updated_at = Utc::now();
        state.publish_profile(uid);
        Ok(())
    }

    async fn update_saved(&self, uid: &UserId, resource: &ResourceId, saved: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.begin_write()?;

        let profile = state
            .profiles
            .get_mut(uid)
            .ok_or_else(|| AppError::ProfileNotFound { uid: uid.to_string() })?;
        let changed = if saved {
            profile.saved.insert(resource.clone())
        } else {
            profile.saved.remove(resource)
        };
        if changed {
            state.publish_profile(uid);
        }
        Ok(())
    }

    async fn watch_profile(&self, uid: &UserId) -> Result<Subscription<Option<UserProfile>>> {
        let mut state = self.state.lock().await;
        let (publisher, subscription) = Subscription::channel();
        publisher.publish(Delivery::Snapshot(state.profiles.get(uid).cloned()));
        state.profile_watchers.push((uid.clone(), publisher));
        Ok(subscription)
    }
}

#[async_trait]
impl ChatHistoryStore for MemoryStore {
    async fn append_message(&self, uid: &UserId, message: ChatMessage) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.begin_write()?;

        state.chats.entry(uid.clone()).or_default().push(message);
        state.publish_history(uid);
        Ok(())
    }

    async fn watch_history(&self, uid: &UserId, limit: usize) -> Result<Subscription<Vec<ChatMessage>>> {
        let mut state = self.state.lock().await;
        let (publisher, subscription) = Subscription::channel();
        publisher.publish(Delivery::Snapshot(state.history(uid, limit)));
        state.chat_watchers.push((uid.clone(), limit, publisher));
        Ok(subscription)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        if self.state.lock().await.offline {
            return Err(AppError::ServiceUnavailable {
                message: "data store is offline".to_string(),
            });
        }
        Ok(())
    }
}
