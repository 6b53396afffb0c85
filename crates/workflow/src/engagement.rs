//! Optimistic likes and saves
//!
//! Each tracker holds the viewer's local view of one resource. A toggle
//! changes that view immediately, then issues exactly one atomic remote
//! update; if the update fails the local change is reverted and the error
//! surfaced. Nothing retries. Authoritative snapshots are folded back in
//! through `reconcile`.

use serde::Serialize;
use studyvault_common::domain::{Identity, Resource, ResourceId, ResourceUpdate, UserId, UserProfile};
use studyvault_common::errors::{AppError, Result};
use studyvault_common::metrics;
use studyvault_common::store::{ProfileStore, ResourceStore};
use tracing::{debug, warn};

/// Largest divergence between the local and authoritative like count that
/// is tolerated without resyncing
pub const COUNT_DRIFT_TOLERANCE: u64 = 1;

/// Result of a like toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub liked: bool,
    /// Only set on a transition into the liked state
    pub celebrate: bool,
    pub count: u64,
}

/// A local like change awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLike {
    update: ResourceUpdate,
    outcome: ToggleOutcome,
}

impl PendingLike {
    pub fn outcome(&self) -> ToggleOutcome {
        self.outcome
    }
}

/// Viewer-local like state of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeTracker {
    resource: ResourceId,
    liked: bool,
    count: u64,
}

impl LikeTracker {
    pub fn new(resource: &Resource, viewer: Option<&UserId>) -> Self {
        Self {
            resource: resource.id.clone(),
            liked: viewer.map_or(false, |uid| resource.is_liked_by(uid)),
            count: resource.like_count,
        }
    }

    pub fn liked(&self) -> bool {
        self.liked
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Apply the toggle locally and describe the remote update it needs
    pub fn begin(&mut self, user: Option<&Identity>) -> Result<PendingLike> {
        let user = user.ok_or_else(|| AppError::AuthRequired {
            action: "like resources".to_string(),
        })?;

        let target = !self.liked;
        let update = if target {
            self.count += 1;
            ResourceUpdate::AddLike(user.uid.clone())
        } else {
            self.count = self.count.saturating_sub(1);
            ResourceUpdate::RemoveLike(user.uid.clone())
        };
        self.liked = target;

        Ok(PendingLike {
            update,
            outcome: ToggleOutcome {
                liked: target,
                celebrate: target,
                count: self.count,
            },
        })
    }

    /// Undo a local change whose remote update failed
    pub fn rollback(&mut self, pending: &PendingLike) {
        if pending.outcome.liked {
            self.count = self.count.saturating_sub(1);
        } else {
            self.count += 1;
        }
        self.liked = !pending.outcome.liked;
    }

    /// Toggle the viewer's like and confirm it with the store
    pub async fn toggle<S: ResourceStore + ?Sized>(
        &mut self,
        store: &S,
        user: Option<&Identity>,
    ) -> Result<ToggleOutcome> {
        let pending = self.begin(user)?;

        match store.update_resource(&self.resource, pending.update.clone()).await {
            Ok(()) => {
                metrics::record_like(pending.outcome.liked);
                debug!(resource_id = %self.resource, liked = pending.outcome.liked, "Like confirmed");
                Ok(pending.outcome)
            }
            Err(e) => {
                self.rollback(&pending);
                warn!(resource_id = %self.resource, error = %e, "Like failed; reverted");
                Err(e)
            }
        }
    }

    /// Fold in an authoritative snapshot of the resource.
    ///
    /// Membership always follows the snapshot. The count only resyncs when
    /// it has drifted by more than [`COUNT_DRIFT_TOLERANCE`].
    pub fn reconcile(&mut self, snapshot: &Resource, viewer: Option<&UserId>) {
        if snapshot.id != self.resource {
            return;
        }
        self.liked = viewer.map_or(false, |uid| snapshot.is_liked_by(uid));
        if snapshot.like_count.abs_diff(self.count) > COUNT_DRIFT_TOLERANCE {
            self.count = snapshot.like_count;
        }
    }
}

/// Viewer-local saved state of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTracker {
    resource: ResourceId,
    saved: bool,
}

impl SaveTracker {
    pub fn new(resource: &ResourceId, profile: Option<&UserProfile>) -> Self {
        Self {
            resource: resource.clone(),
            saved: profile.map_or(false, |p| p.has_saved(resource)),
        }
    }

    pub fn saved(&self) -> bool {
        self.saved
    }

    /// Toggle the saved flag and confirm it with the store
    pub async fn toggle<S: ProfileStore + ?Sized>(&mut self, store: &S, user: Option<&Identity>) -> Result<bool> {
        let user = user.ok_or_else(|| AppError::AuthRequired {
            action: "save resources".to_string(),
        })?;

        let target = !self.saved;
        self.saved = target;

        if let Err(e) = store.update_saved(&user.uid, &self.resource, target).await {
            self.saved = !target;
            warn!(resource_id = %self.resource, error = %e, "Save failed; reverted");
            return Err(e);
        }
        Ok(target)
    }

    pub fn reconcile(&mut self, profile: &UserProfile) {
        self.saved = profile.has_saved(&self.resource);
    }
}
