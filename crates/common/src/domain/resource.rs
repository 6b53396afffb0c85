//! Resource entity: one uploaded document and its moderation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::profile::UserId;
use crate::errors::{AppError, Result};

/// Store-assigned opaque resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Moderation status. Rejection deletes the resource, so it has no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Approved,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ResourceStatus::Pending),
            "approved" => Ok(ResourceStatus::Approved),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown resource status '{}'", other),
            }),
        }
    }
}

/// Coarse MIME category of the stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
    Other,
}

impl FileKind {
    /// Classify a MIME type
    pub fn classify(content_type: &str) -> Self {
        let content_type = content_type.trim().to_ascii_lowercase();
        if content_type.starts_with("image/") {
            FileKind::Image
        } else if content_type == "application/pdf" {
            FileKind::Pdf
        } else {
            FileKind::Other
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, FileKind::Image)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
            FileKind::Other => "other",
        }
    }
}

impl FromStr for FileKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pdf" => Ok(FileKind::Pdf),
            "image" => Ok(FileKind::Image),
            "other" => Ok(FileKind::Other),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown file kind '{}'", other),
            }),
        }
    }
}

/// Who submitted a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

/// An uploaded academic document and its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub title: String,
    pub subject: String,
    pub module: String,
    pub department: String,
    pub semester: u8,
    pub faculty_name: String,
    pub syllabus_year: Option<i32>,
    pub file_url: String,
    pub file_kind: FileKind,
    pub status: ResourceStatus,
    pub contributor: Contributor,
    pub created_at: DateTime<Utc>,
    pub view_count: u64,
    pub like_count: u64,
    pub liked_by: BTreeSet<UserId>,
}

impl Resource {
    /// Title shown for a subject/module pair
    pub fn display_title(subject: &str, module: &str) -> String {
        format!("{} - {}", subject.trim(), module.trim())
    }

    /// Ordinary users only ever see approved resources
    pub fn is_visible(&self) -> bool {
        self.status == ResourceStatus::Approved
    }

    pub fn is_liked_by(&self, uid: &UserId) -> bool {
        self.liked_by.contains(uid)
    }

    /// Folder listing line handed to the assistant
    pub fn listing_label(&self) -> String {
        format!("{} (by {})", self.title, self.faculty_name)
    }
}

/// A submission after its file has been uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub subject: String,
    pub module: String,
    pub department: String,
    pub semester: u8,
    pub faculty_name: String,
    pub syllabus_year: Option<i32>,
    pub file_url: String,
    pub file_kind: FileKind,
    pub contributor: Contributor,
}

impl NewResource {
    /// Materialize as a freshly created, pending resource
    pub fn into_resource(self, id: ResourceId, created_at: DateTime<Utc>) -> Resource {
        Resource {
            id,
            title: Resource::display_title(&self.subject, &self.module),
            subject: self.subject,
            module: self.module,
            department: self.department,
            semester: self.semester,
            faculty_name: self.faculty_name,
            syllabus_year: self.syllabus_year,
            file_url: self.file_url,
            file_kind: self.file_kind,
            status: ResourceStatus::Pending,
            contributor: self.contributor,
            created_at,
            view_count: 0,
            like_count: 0,
            liked_by: BTreeSet::new(),
        }
    }
}

/// Equality filter for resource queries; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    pub department: Option<String>,
    pub semester: Option<u8>,
    pub subject: Option<String>,
    pub status: Option<ResourceStatus>,
    pub contributor: Option<UserId>,
}

impl ResourceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn semester(mut self, semester: u8) -> Self {
        self.semester = Some(semester);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn contributor(mut self, contributor: UserId) -> Self {
        self.contributor = Some(contributor);
        self
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        self.department.as_ref().map_or(true, |d| *d == resource.department)
            && self.semester.map_or(true, |s| s == resource.semester)
            && self.subject.as_ref().map_or(true, |s| *s == resource.subject)
            && self.status.map_or(true, |s| s == resource.status)
            && self
                .contributor
                .as_ref()
                .map_or(true, |c| *c == resource.contributor.id)
    }
}

/// Fields an admin may amend while approving
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOverrides {
    pub subject: Option<String>,
    pub module: Option<String>,
    pub department: Option<String>,
    pub semester: Option<u8>,
}

impl ApprovalOverrides {
    /// Subject or module edits change the display title
    pub fn retitles(&self) -> bool {
        self.subject.is_some() || self.module.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Field-level atomic mutation of a resource.
///
/// Only `Approve` touches `status`; engagement updates never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUpdate {
    Approve(ApprovalOverrides),
    IncrementViews,
    AddLike(UserId),
    RemoveLike(UserId),
}

impl ResourceUpdate {
    /// Apply in place. Returns whether anything changed.
    pub fn apply(&self, resource: &mut Resource) -> Result<bool> {
        match self {
            ResourceUpdate::Approve(overrides) => {
                if resource.status != ResourceStatus::Pending {
                    return Err(AppError::InvalidTransition {
                        from: resource.status.to_string(),
                        to: ResourceStatus::Approved.to_string(),
                    });
                }
                if let Some(subject) = &overrides.subject {
                    resource.subject = subject.clone();
                }
                if let Some(module) = &overrides.module {
                    resource.module = module.clone();
                }
                if let Some(department) = &overrides.department {
                    resource.department = department.clone();
                }
                if let Some(semester) = overrides.semester {
                    resource.semester = semester;
                }
                if overrides.retitles() {
                    resource.title = Resource::display_title(&resource.subject, &resource.module);
                }
                resource.status = ResourceStatus::Approved;
                Ok(true)
            }
            ResourceUpdate::IncrementViews => {
                resource.view_count += 1;
                Ok(true)
            }
            ResourceUpdate::AddLike(uid) => {
                let inserted = resource.liked_by.insert(uid.clone());
                if inserted {
                    resource.like_count += 1;
                }
                Ok(inserted)
            }
            ResourceUpdate::RemoveLike(uid) => {
                let removed = resource.liked_by.remove(uid);
                if removed {
                    resource.like_count = resource.like_count.saturating_sub(1);
                }
                Ok(removed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Resource {
        NewResource {
            subject: "Maths".into(),
            module: "Module 2".into(),
            department: "cs".into(),
            semester: 3,
            faculty_name: "Dr. Rao".into(),
            syllabus_year: Some(2022),
            file_url: "https://cdn.example/maths.pdf".into(),
            file_kind: FileKind::Pdf,
            contributor: Contributor {
                id: UserId::new("u1"),
                name: "Asha".into(),
                email: "asha@sahyadri.edu.in".into(),
            },
        }
        .into_resource(ResourceId::new("r1"), Utc::now())
    }

    #[test]
    fn test_new_resource_starts_pending() {
        let r = sample();
        assert_eq!(r.status, ResourceStatus::Pending);
        assert_eq!(r.view_count, 0);
        assert_eq!(r.like_count, 0);
        assert!(r.liked_by.is_empty());
        assert_eq!(r.title, "Maths - Module 2");
        assert!(!r.is_visible());
    }

    #[test]
    fn test_approve_with_subject_override_retitles() {
        let mut r = sample();
        let update = ResourceUpdate::Approve(ApprovalOverrides {
            subject: Some("Engineering Maths".into()),
            ..Default::default()
        });
        assert!(update.apply(&mut r).unwrap());
        assert_eq!(r.status, ResourceStatus::Approved);
        assert_eq!(r.title, "Engineering Maths - Module 2");
    }

    #[test]
    fn test_approve_twice_is_invalid_transition() {
        let mut r = sample();
        let update = ResourceUpdate::Approve(ApprovalOverrides::default());
        update.apply(&mut r).unwrap();
        let err = update.apply(&mut r).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn test_like_set_and_count_move_together() {
        let mut r = sample();
        let uid = UserId::new("u2");
        assert!(ResourceUpdate::AddLike(uid.clone()).apply(&mut r).unwrap());
        assert!(!ResourceUpdate::AddLike(uid.clone()).apply(&mut r).unwrap());
        assert_eq!(r.like_count, 1);
        assert!(ResourceUpdate::RemoveLike(uid.clone()).apply(&mut r).unwrap());
        assert!(!ResourceUpdate::RemoveLike(uid).apply(&mut r).unwrap());
        assert_eq!(r.like_count, 0);
        assert_eq!(r.like_count as usize, r.liked_by.len());
    }

    #[test]
    fn test_engagement_never_touches_status() {
        let mut r = sample();
        ResourceUpdate::IncrementViews.apply(&mut r).unwrap();
        ResourceUpdate::AddLike(UserId::new("u3")).apply(&mut r).unwrap();
        assert_eq!(r.status, ResourceStatus::Pending);
        assert_eq!(r.view_count, 1);
    }

    #[test]
    fn test_filter_matching() {
        let r = sample();
        assert!(ResourceFilter::new().department("cs").semester(3).matches(&r));
        assert!(!ResourceFilter::new().status(ResourceStatus::Approved).matches(&r));
        assert!(ResourceFilter::new().contributor(UserId::new("u1")).matches(&r));
    }

    #[test]
    fn test_file_kind_classification() {
        assert_eq!(FileKind::classify("image/png"), FileKind::Image);
        assert_eq!(FileKind::classify("application/pdf"), FileKind::Pdf);
        assert_eq!(FileKind::classify("text/plain"), FileKind::Other);
    }
}
