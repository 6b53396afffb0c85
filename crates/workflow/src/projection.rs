//! Realtime view projections
//!
//! A projection turns a keyed live query into a derived list. Changing the
//! key drops the old subscription before the new one is opened, and every
//! delivery replaces whatever was derived before.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use studyvault_common::catalog;
use studyvault_common::domain::{AdminScope, Resource, ResourceFilter, ResourceStatus, UserProfile};
use studyvault_common::errors::{AppError, Result};
use studyvault_common::metrics;
use studyvault_common::store::{DataStore, Delivery, ResourceStore, Subscription};
use tracing::debug;

use crate::lifecycle::ResourceLifecycle;

/// A keyed live query plus the derivation applied to each snapshot
#[async_trait]
pub trait Projection: Send + Sync {
    type Key: Clone + PartialEq + Debug + Send + Sync;
    type Source: Clone + Send + Sync + 'static;
    type Output: Clone + Send;

    async fn subscribe(&self, key: &Self::Key) -> Result<Subscription<Self::Source>>;

    fn derive(&self, key: &Self::Key, source: Self::Source) -> Self::Output;
}

/// Holds at most one live subscription for a projection
pub struct LiveProjection<P: Projection> {
    projection: P,
    key: Option<P::Key>,
    subscription: Option<Subscription<P::Source>>,
    current: Option<P::Output>,
}

impl<P: Projection> LiveProjection<P> {
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            key: None,
            subscription: None,
            current: None,
        }
    }

    /// Start following `key`. The previous subscription is torn down first.
    pub async fn focus(&mut self, key: P::Key) -> Result<()> {
        if self.subscription.is_some() && self.key.as_ref() == Some(&key) {
            return Ok(());
        }

        self.release();
        debug!(?key, "Projection refocused");
        let subscription = self.projection.subscribe(&key).await?;
        metrics::record_live_subscription(1.0);
        self.subscription = Some(subscription);
        self.key = Some(key);
        Ok(())
    }

    /// Wait for the next derived state. `None` when not focused or once the
    /// underlying query has closed.
    pub async fn next(&mut self) -> Option<Result<P::Output>> {
        let key = self.key.clone()?;
        let delivery = self.subscription.as_mut()?.next().await?;
        match delivery {
            Delivery::Snapshot(source) => {
                let output = self.projection.derive(&key, source);
                self.current = Some(output.clone());
                Some(Ok(output))
            }
            Delivery::Failed(message) => Some(Err(AppError::Store { message })),
        }
    }

    pub fn current(&self) -> Option<&P::Output> {
        self.current.as_ref()
    }

    pub fn key(&self) -> Option<&P::Key> {
        self.key.as_ref()
    }

    /// Drop the subscription and any derived state
    pub fn release(&mut self) {
        if self.subscription.take().is_some() {
            metrics::record_live_subscription(-1.0);
        }
        self.key = None;
        self.current = None;
    }
}

impl<P: Projection> Drop for LiveProjection<P> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Subjects offered for one department and semester: the static catalog
/// merged with subjects of approved resources, sorted and deduplicated
pub struct SubjectCatalog<S: DataStore + ?Sized> {
    store: Arc<S>,
}

impl<S: DataStore + ?Sized> SubjectCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderKey {
    pub department: String,
    pub semester: u8,
}

#[async_trait]
impl<S: DataStore + ?Sized> Projection for SubjectCatalog<S> {
    type Key = FolderKey;
    type Source = Vec<Resource>;
    type Output = Vec<String>;

    async fn subscribe(&self, key: &FolderKey) -> Result<Subscription<Vec<Resource>>> {
        let filter = ResourceFilter::new()
            .department(key.department.clone())
            .semester(key.semester)
            .status(ResourceStatus::Approved);
        self.store.watch_resources(filter).await
    }

    fn derive(&self, key: &FolderKey, source: Vec<Resource>) -> Vec<String> {
        let mut subjects: BTreeSet<String> = catalog::static_subjects(&key.department, key.semester)
            .iter()
            .map(|s| s.to_string())
            .collect();
        subjects.extend(
            source
                .into_iter()
                .filter(Resource::is_visible)
                .map(|r| r.subject),
        );
        subjects.into_iter().collect()
    }
}

/// Moderation queue for one admin, keyed by the scope being reviewed
pub struct PendingQueue<S: DataStore + ?Sized> {
    lifecycle: ResourceLifecycle<S>,
    acting: UserProfile,
}

impl<S: DataStore + ?Sized> PendingQueue<S> {
    pub fn new(lifecycle: ResourceLifecycle<S>, acting: UserProfile) -> Self {
        Self { lifecycle, acting }
    }
}

#[async_trait]
impl<S: DataStore + ?Sized> Projection for PendingQueue<S> {
    type Key = AdminScope;
    type Source = Vec<Resource>;
    type Output = Vec<Resource>;

    async fn subscribe(&self, scope: &AdminScope) -> Result<Subscription<Vec<Resource>>> {
        self.lifecycle.list_pending(&self.acting, scope).await
    }

    fn derive(&self, _scope: &AdminScope, source: Vec<Resource>) -> Vec<Resource> {
        source
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub department: String,
    pub semester: u8,
    pub subject: String,
}

/// Approved resources inside one subject folder
pub struct SubjectResources<S: ResourceStore + ?Sized> {
    store: Arc<S>,
}

impl<S: ResourceStore + ?Sized> SubjectResources<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ResourceStore + ?Sized> Projection for SubjectResources<S> {
    type Key = SubjectKey;
    type Source = Vec<Resource>;
    type Output = Vec<Resource>;

    async fn subscribe(&self, key: &SubjectKey) -> Result<Subscription<Vec<Resource>>> {
        let filter = ResourceFilter::new()
            .department(key.department.clone())
            .semester(key.semester)
            .subject(key.subject.clone())
            .status(ResourceStatus::Approved);
        self.store.watch_resources(filter).await
    }

    fn derive(&self, _key: &SubjectKey, source: Vec<Resource>) -> Vec<Resource> {
        source
    }
}

/// Case-insensitive match on title, faculty or contributor name.
/// A blank query keeps everything.
pub fn search(resources: &[Resource], query: &str) -> Vec<Resource> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return resources.to_vec();
    }
    resources
        .iter()
        .filter(|r| {
            [&r.title, &r.faculty_name, &r.contributor.name]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}
