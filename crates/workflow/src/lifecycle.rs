//! Resource lifecycle: submission, moderation and deletion
//!
//! `pending -> approved`, `pending -> deleted`, `approved -> deleted`.
//! Only approval and rejection write a resource's status; nothing ever
//! returns a resource to pending.

use std::sync::Arc;

use studyvault_common::catalog;
use studyvault_common::domain::{
    AdminScope, ApprovalOverrides, Contributor, Identity, NewResource, Resource, ResourceFilter,
    ResourceId, ResourceStatus, ResourceUpdate, UserProfile,
};
use studyvault_common::errors::{AppError, Result};
use studyvault_common::media::{MediaStore, Upload};
use studyvault_common::metrics;
use studyvault_common::store::{DataStore, Subscription};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::submission::{Selection, SubmissionMetadata};

/// Moderation scope of the acting profile, or `Forbidden` for non-admins
pub fn acting_scope<'a>(acting: &'a UserProfile, action: &str) -> Result<&'a AdminScope> {
    acting.role.admin_scope().ok_or_else(|| AppError::Forbidden {
        message: format!("only admins can {}", action),
    })
}

/// Refuse when `scope` does not cover `department`
pub fn ensure_scope(scope: &AdminScope, department: &str) -> Result<()> {
    if scope.permits(department) {
        Ok(())
    } else {
        Err(AppError::ScopeViolation {
            permitted: scope.to_string(),
            department: department.to_string(),
        })
    }
}

/// Drives resources through their lifecycle
pub struct ResourceLifecycle<S: DataStore + ?Sized> {
    store: Arc<S>,
    media: Arc<dyn MediaStore>,
}

impl<S: DataStore + ?Sized> Clone for ResourceLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            media: self.media.clone(),
        }
    }
}

impl<S: DataStore + ?Sized> ResourceLifecycle<S> {
    pub fn new(store: Arc<S>, media: Arc<dyn MediaStore>) -> Self {
        Self { store, media }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Upload the selected file and create a pending resource.
    ///
    /// Local checks (identity, conversion, form) all run before the upload.
    #[instrument(skip_all, fields(department = %metadata.department, semester = metadata.semester))]
    pub async fn submit(
        &self,
        contributor: Option<&Identity>,
        metadata: SubmissionMetadata,
        selection: &Selection,
    ) -> Result<Resource> {
        let identity = contributor.ok_or_else(|| AppError::AuthRequired {
            action: "upload resources".to_string(),
        })?;

        let file = selection.ready_file()?;
        let metadata = metadata.normalized();
        metadata.validate()?;

        let file_kind = file.kind();
        let file_url = self
            .media
            .upload(Upload {
                file_name: file.name.clone(),
                content_type: file.content_type.clone(),
                bytes: file.bytes.clone(),
                department: metadata.department.clone(),
            })
            .await?;

        let new = NewResource {
            subject: metadata.subject,
            module: metadata.module,
            department: metadata.department,
            semester: metadata.semester,
            faculty_name: metadata.faculty_name,
            syllabus_year: metadata.syllabus_year,
            file_url: file_url.clone(),
            file_kind,
            contributor: Contributor {
                id: identity.uid.clone(),
                name: identity.display_name.clone(),
                email: identity.email.clone(),
            },
        };

        let resource = match self.store.insert_resource(new).await {
            Ok(resource) => resource,
            Err(e) => {
                // The upload cannot be taken back from here
                warn!(file_url = %file_url, error = %e, "Resource write failed; uploaded file is orphaned");
                return Err(e);
            }
        };

        metrics::record_submission(&resource.department, selection.has_images());
        info!(
            resource_id = %resource.id,
            contributor = %identity.uid,
            file_kind = file_kind.as_str(),
            "Resource submitted for review"
        );

        Ok(resource)
    }

    /// Live queue of pending resources within `scope`, newest first
    pub async fn list_pending(
        &self,
        acting: &UserProfile,
        scope: &AdminScope,
    ) -> Result<Subscription<Vec<Resource>>> {
        let own = acting_scope(acting, "review submissions")?;
        if own != &AdminScope::All && own != scope {
            return Err(AppError::QueueScopeViolation {
                permitted: own.to_string(),
                requested: scope.to_string(),
            });
        }

        let mut filter = ResourceFilter::new().status(ResourceStatus::Pending);
        if let Some(department) = scope.department() {
            filter = filter.department(department);
        }
        self.store.watch_resources(filter).await
    }

    /// Approve a pending resource, applying any metadata corrections in the
    /// same write
    #[instrument(skip(self, acting, overrides), fields(admin = %acting.uid))]
    pub async fn approve(
        &self,
        acting: &UserProfile,
        id: &ResourceId,
        overrides: ApprovalOverrides,
    ) -> Result<Resource> {
        acting_scope(acting, "approve resources")?;
        let overrides = normalize_overrides(overrides)?;
        let corrected = !overrides.is_empty();

        self.store
            .update_resource(id, ResourceUpdate::Approve(overrides))
            .await?;

        let resource = self
            .store
            .get_resource(id)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound { id: id.to_string() })?;

        metrics::record_moderation(&resource.department, "approved");
        info!(resource_id = %id, title = %resource.title, corrected, "Resource approved");
        Ok(resource)
    }

    /// Reject a submission. Rejection is a hard delete.
    #[instrument(skip(self, acting), fields(admin = %acting.uid))]
    pub async fn reject(&self, acting: &UserProfile, id: &ResourceId) -> Result<()> {
        let scope = acting_scope(acting, "reject resources")?;
        let resource = self
            .store
            .get_resource(id)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound { id: id.to_string() })?;
        ensure_scope(scope, &resource.department)?;

        self.remove(&resource).await?;
        metrics::record_moderation(&resource.department, "rejected");
        Ok(())
    }

    /// Delete a resource the caller already holds.
    ///
    /// Permission is decided from the snapshot alone so a refusal never
    /// reaches the store.
    #[instrument(skip(self, acting, resource), fields(admin = %acting.uid, resource_id = %resource.id))]
    pub async fn delete(&self, acting: &UserProfile, resource: &Resource) -> Result<()> {
        let scope = acting_scope(acting, "delete resources")?;
        ensure_scope(scope, &resource.department)?;

        self.remove(resource).await?;
        metrics::record_moderation(&resource.department, "deleted");
        Ok(())
    }

    async fn remove(&self, resource: &Resource) -> Result<()> {
        if !self.store.delete_resource(&resource.id).await? {
            return Err(AppError::ResourceNotFound {
                id: resource.id.to_string(),
            });
        }
        info!(resource_id = %resource.id, department = %resource.department, "Resource deleted");
        Ok(())
    }

    /// Count a view. Best effort; failures are only logged.
    pub async fn record_view(&self, viewer: &Identity, id: &ResourceId) {
        match self.store.update_resource(id, ResourceUpdate::IncrementViews).await {
            Ok(()) => metrics::record_view(),
            Err(e) => warn!(resource_id = %id, viewer = %viewer.uid, error = %e, "Failed to record view"),
        }
    }
}

/// Trim overrides and drop blanks; reject values no form would accept
fn normalize_overrides(overrides: ApprovalOverrides) -> Result<ApprovalOverrides> {
    let text = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let normalized = ApprovalOverrides {
        subject: text(overrides.subject),
        module: text(overrides.module),
        department: text(overrides.department).map(|d| d.to_ascii_lowercase()),
        semester: overrides.semester,
    };

    if let Some(department) = &normalized.department {
        if !catalog::is_known_department(department) {
            return Err(AppError::Validation {
                message: format!("unknown department '{}'", department),
                field: Some("department".to_string()),
            });
        }
    }
    if let Some(semester) = normalized.semester {
        if !(1..=8).contains(&semester) {
            return Err(AppError::Validation {
                message: "semester must be between 1 and 8".to_string(),
                field: Some("semester".to_string()),
            });
        }
    }

    Ok(normalized)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::submission::tests::{image_file, metadata, pdf_file};
    use chrono::Utc;
    use studyvault_common::domain::{ProfileUpdate, Role};
    use studyvault_common::media::MockMediaStore;
    use studyvault_common::store::{Delivery, MemoryStore, ResourceStore};

    pub(crate) fn student() -> Identity {
        Identity::new("u1", "asha@sahyadri.edu.in", "Asha")
    }

    pub(crate) fn profile_with(role: Role) -> UserProfile {
        let mut profile = UserProfile::create(
            &Identity::new("admin", "hod@sahyadri.edu.in", "HOD"),
            ProfileUpdate {
                display_name: "HOD".into(),
                college_id: "4SF00CS000".into(),
                department: "cs".into(),
                semester: 1,
            },
            Utc::now(),
        );
        profile.role = role;
        profile
    }

    pub(crate) fn admin(scope: AdminScope) -> UserProfile {
        profile_with(Role::Admin(scope))
    }

    pub(crate) fn setup() -> (Arc<MemoryStore>, Arc<MockMediaStore>, ResourceLifecycle<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let media = Arc::new(MockMediaStore::new());
        let lifecycle = ResourceLifecycle::new(store.clone(), media.clone());
        (store, media, lifecycle)
    }

    pub(crate) async fn submitted(lifecycle: &ResourceLifecycle<MemoryStore>, department: &str) -> Resource {
        let selection = Selection::new(vec![pdf_file()]).unwrap();
        let form = SubmissionMetadata {
            department: department.into(),
            ..metadata()
        };
        lifecycle.submit(Some(&student()), form, &selection).await.unwrap()
    }

    #[tokio::test]
    async fn test_submit_creates_pending_resource() {
        let (store, media, lifecycle) = setup();
        let filter = ResourceFilter::new()
            .department("cs")
            .semester(3)
            .subject("Maths")
            .status(ResourceStatus::Pending);
        let mut live = store.watch_resources(filter).await.unwrap();
        assert_eq!(live.next().await, Some(Delivery::Snapshot(vec![])));

        let resource = submitted(&lifecycle, "cs").await;
        assert_eq!(media.uploads(), 1);
        assert_eq!(resource.status, ResourceStatus::Pending);
        assert_eq!(resource.title, "Maths - Module 2");
        assert_eq!((resource.view_count, resource.like_count), (0, 0));
        assert!(resource.liked_by.is_empty());
        assert_eq!(resource.contributor.id, student().uid);

        let seen = live.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(seen, vec![resource]);
    }

    #[tokio::test]
    async fn test_submit_requires_identity() {
        let (store, media, lifecycle) = setup();
        let selection = Selection::new(vec![pdf_file()]).unwrap();
        let err = lifecycle.submit(None, metadata(), &selection).await.unwrap_err();
        assert!(matches!(err, AppError::AuthRequired { .. }));
        assert_eq!(err.to_string(), "Please log in to upload resources");
        assert_eq!(media.uploads(), 0);
        assert_eq!(store.write_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_unconverted_images_never_reach_the_network() {
        let (store, media, lifecycle) = setup();
        let selection = Selection::new(vec![image_file("a.png", 8, 8)]).unwrap();
        let err = lifecycle
            .submit(Some(&student()), metadata(), &selection)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConversionRequired));
        assert_eq!(media.uploads(), 0);
        assert_eq!(store.write_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_converted_images_upload_as_one_pdf() {
        let (_store, media, lifecycle) = setup();
        let mut selection = Selection::new(vec![image_file("a.png", 8, 8), image_file("b.png", 8, 8)]).unwrap();
        selection.convert("Maths").unwrap();

        let resource = lifecycle
            .submit(Some(&student()), metadata(), &selection)
            .await
            .unwrap();
        assert_eq!(media.uploads(), 1);
        assert!(resource.file_url.contains("/raw/cs/"));
        assert!(resource.file_url.ends_with("Maths.pdf"));
    }

    #[tokio::test]
    async fn test_failed_upload_creates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = ResourceLifecycle::new(store.clone(), Arc::new(MockMediaStore::failing()));
        let selection = Selection::new(vec![pdf_file()]).unwrap();

        let err = lifecycle
            .submit(Some(&student()), metadata(), &selection)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upload { .. }));
        assert_eq!(store.write_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_failed_write_after_upload_is_reported() {
        let (store, media, lifecycle) = setup();
        store.set_offline(true).await;
        let selection = Selection::new(vec![pdf_file()]).unwrap();

        let err = lifecycle
            .submit(Some(&student()), metadata(), &selection)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable { .. }));
        assert_eq!(media.uploads(), 1);
    }

    #[tokio::test]
    async fn test_approve_with_subject_edit_retitles() {
        let (_store, _media, lifecycle) = setup();
        let resource = submitted(&lifecycle, "cs").await;

        let approved = lifecycle
            .approve(
                &admin(AdminScope::All),
                &resource.id,
                ApprovalOverrides {
                    subject: Some(" Engineering Maths ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(approved.status, ResourceStatus::Approved);
        assert_eq!(approved.subject, "Engineering Maths");
        assert_eq!(approved.title, "Engineering Maths - Module 2");
    }

    #[tokio::test]
    async fn test_status_never_returns_to_pending() {
        let (store, _media, lifecycle) = setup();
        let resource = submitted(&lifecycle, "cs").await;
        let acting = admin(AdminScope::All);

        lifecycle
            .approve(&acting, &resource.id, ApprovalOverrides::default())
            .await
            .unwrap();
        let again = lifecycle
            .approve(&acting, &resource.id, ApprovalOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(again, AppError::InvalidTransition { .. }));

        // Engagement writes leave the status alone
        let viewer = student();
        lifecycle.record_view(&viewer, &resource.id).await;
        store
            .update_resource(&resource.id, ResourceUpdate::AddLike(viewer.uid.clone()))
            .await
            .unwrap();
        let current = store.get_resource(&resource.id).await.unwrap().unwrap();
        assert_eq!(current.status, ResourceStatus::Approved);
        assert_eq!(current.view_count, 1);
    }

    #[tokio::test]
    async fn test_approve_missing_resource() {
        let (_store, _media, lifecycle) = setup();
        let err = lifecycle
            .approve(&admin(AdminScope::All), &ResourceId::new("nope"), ApprovalOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_students_cannot_moderate() {
        let (store, _media, lifecycle) = setup();
        let resource = submitted(&lifecycle, "cs").await;
        let before = store.write_attempts().await;
        let acting = profile_with(Role::Student);

        let err = lifecycle
            .approve(&acting, &resource.id, ApprovalOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
        assert!(lifecycle.delete(&acting, &resource).await.is_err());
        assert!(lifecycle.list_pending(&acting, &AdminScope::All).await.is_err());
        assert_eq!(store.write_attempts().await, before);
    }

    #[tokio::test]
    async fn test_scoped_admin_cannot_delete_other_department() {
        let (store, _media, lifecycle) = setup();
        let resource = submitted(&lifecycle, "ec").await;
        let before = store.write_attempts().await;

        let err = lifecycle
            .delete(&admin(AdminScope::Department("cs".into())), &resource)
            .await
            .unwrap_err();
        match err {
            AppError::ScopeViolation { permitted, department } => {
                assert_eq!(permitted, "cs");
                assert_eq!(department, "ec");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.write_attempts().await, before);
        assert!(store.get_resource(&resource.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_and_reject_within_scope() {
        let (store, _media, lifecycle) = setup();
        let first = submitted(&lifecycle, "cs").await;
        let second = submitted(&lifecycle, "cs").await;
        let acting = admin(AdminScope::Department("cs".into()));

        lifecycle.delete(&acting, &first).await.unwrap();
        lifecycle.reject(&acting, &second.id).await.unwrap();
        assert!(store.get_resource(&first.id).await.unwrap().is_none());
        assert!(store.get_resource(&second.id).await.unwrap().is_none());

        let err = lifecycle.reject(&acting, &second.id).await.unwrap_err();
        assert!(matches!(err, AppError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_pending_queue_follows_scope() {
        let (_store, _media, lifecycle) = setup();
        submitted(&lifecycle, "cs").await;
        submitted(&lifecycle, "ec").await;

        let mut all = lifecycle
            .list_pending(&admin(AdminScope::All), &AdminScope::Department("ec".into()))
            .await
            .unwrap();
        let queue = all.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].department, "ec");

        let scoped = admin(AdminScope::Department("cs".into()));
        let err = lifecycle.list_pending(&scoped, &AdminScope::All).await.unwrap_err();
        assert_eq!(err.to_string(), "You can only review cs submissions, not all");
        let err = lifecycle
            .list_pending(&scoped, &AdminScope::Department("ec".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QueueScopeViolation { .. }));
    }

    #[tokio::test]
    async fn test_record_view_swallows_failures() {
        let (store, _media, lifecycle) = setup();
        let resource = submitted(&lifecycle, "cs").await;
        store.set_offline(true).await;
        lifecycle.record_view(&student(), &resource.id).await;
        store.set_offline(false).await;
        let current = store.get_resource(&resource.id).await.unwrap().unwrap();
        assert_eq!(current.view_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_overrides_are_refused() {
        let (_store, _media, lifecycle) = setup();
        let resource = submitted(&lifecycle, "cs").await;
        let err = lifecycle
            .approve(
                &admin(AdminScope::All),
                &resource.id,
                ApprovalOverrides {
                    semester: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
