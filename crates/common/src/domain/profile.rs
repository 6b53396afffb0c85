//! Identities, roles and user profiles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use super::resource::ResourceId;
use crate::catalog;
use crate::errors::{AppError, Result};

/// Identity-provider subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An authenticated account as asserted by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: UserId,
    pub email: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(uid: impl Into<String>, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: UserId::new(uid),
            email: email.into(),
            display_name: display_name.into(),
        }
    }

    /// Whether the email belongs to `domain`
    pub fn belongs_to(&self, domain: &str) -> bool {
        self.email
            .rsplit_once('@')
            .map(|(local, host)| !local.is_empty() && host.eq_ignore_ascii_case(domain))
            .unwrap_or(false)
    }
}

/// Departments an admin may act on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AdminScope {
    All,
    Department(String),
}

impl AdminScope {
    pub fn permits(&self, department: &str) -> bool {
        match self {
            AdminScope::All => true,
            AdminScope::Department(d) => d == department,
        }
    }

    /// Department to filter by, `None` for every department
    pub fn department(&self) -> Option<&str> {
        match self {
            AdminScope::All => None,
            AdminScope::Department(d) => Some(d),
        }
    }
}

impl fmt::Display for AdminScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminScope::All => f.write_str("all"),
            AdminScope::Department(d) => f.write_str(d),
        }
    }
}

impl FromStr for AdminScope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "all" {
            return Ok(AdminScope::All);
        }
        if catalog::is_known_department(&s) {
            Ok(AdminScope::Department(s))
        } else {
            Err(AppError::InvalidFormat {
                message: format!("unknown admin scope '{}'", s),
            })
        }
    }
}

impl TryFrom<String> for AdminScope {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AdminScope> for String {
    fn from(scope: AdminScope) -> Self {
        scope.to_string()
    }
}

/// Account role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "scope", rename_all = "lowercase")]
pub enum Role {
    Student,
    /// Reserved; carries no extra permissions yet
    Faculty,
    Admin(AdminScope),
}

impl Default for Role {
    fn default() -> Self {
        Role::Student
    }
}

impl Role {
    pub fn admin_scope(&self) -> Option<&AdminScope> {
        match self {
            Role::Admin(scope) => Some(scope),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
            Role::Admin(_) => "admin",
        }
    }

    /// Rebuild from the stored role/scope column pair
    pub fn from_parts(role: &str, scope: Option<&str>) -> Result<Self> {
        match role {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            "admin" => Ok(Role::Admin(scope.unwrap_or("all").parse()?)),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown role '{}'", other),
            }),
        }
    }
}

/// Self-service profile form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100))]
    pub display_name: String,

    /// University seat number
    #[validate(length(min = 1, max = 20))]
    pub college_id: String,

    #[validate(custom(function = "catalog::validate_department"))]
    pub department: String,

    #[validate(range(min = 1, max = 8))]
    pub semester: u8,
}

/// College-specific account metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub email: String,
    pub display_name: String,
    pub college_id: String,
    pub department: String,
    pub semester: u8,
    pub role: Role,
    pub saved: BTreeSet<ResourceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// First profile for an identity; always a student
    pub fn create(identity: &Identity, update: ProfileUpdate, now: DateTime<Utc>) -> Self {
        Self {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            display_name: update.display_name,
            college_id: update.college_id,
            department: update.department,
            semester: update.semester,
            role: Role::Student,
            saved: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a form submission; role and saved set are untouched
    pub fn apply(&mut self, update: ProfileUpdate, now: DateTime<Utc>) {
        self.display_name = update.display_name;
        self.college_id = update.college_id;
        self.department = update.department;
        self.semester = update.semester;
        self.updated_at = now;
    }

    pub fn has_saved(&self, id: &ResourceId) -> bool {
        self.saved.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_check() {
        let ok = Identity::new("u1", "asha@sahyadri.edu.in", "Asha");
        let bad = Identity::new("u2", "asha@gmail.com", "Asha");
        let tricky = Identity::new("u3", "asha@sahyadri.edu.in.evil.com", "Asha");
        assert!(ok.belongs_to("sahyadri.edu.in"));
        assert!(!bad.belongs_to("sahyadri.edu.in"));
        assert!(!tricky.belongs_to("sahyadri.edu.in"));
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("all".parse::<AdminScope>().unwrap(), AdminScope::All);
        assert_eq!(
            "cs".parse::<AdminScope>().unwrap(),
            AdminScope::Department("cs".into())
        );
        assert!("".parse::<AdminScope>().is_err());
        assert!("physics".parse::<AdminScope>().is_err());
    }

    #[test]
    fn test_scope_department_is_case_insensitive() {
        let scope: AdminScope = " CS ".parse().unwrap();
        assert_eq!(scope, AdminScope::Department("cs".into()));
        assert!(scope.permits("cs"));
        assert_eq!("ALL".parse::<AdminScope>().unwrap(), AdminScope::All);
    }

    #[test]
    fn test_scope_permits() {
        let cs = AdminScope::Department("cs".into());
        assert!(cs.permits("cs"));
        assert!(!cs.permits("ec"));
        assert!(AdminScope::All.permits("ec"));
    }

    #[test]
    fn test_role_serde_shape() {
        let role = Role::Admin(AdminScope::Department("cs".into()));
        let json = serde_json::to_value(&role).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "admin", "scope": "cs"}));
        let back: Role = serde_json::from_value(json).unwrap();
        assert_eq!(back, role);

        let bad = serde_json::json!({"kind": "admin", "scope": "nowhere"});
        assert!(serde_json::from_value::<Role>(bad).is_err());
    }

    #[test]
    fn test_role_from_parts() {
        assert_eq!(Role::from_parts("admin", None).unwrap(), Role::Admin(AdminScope::All));
        assert_eq!(Role::from_parts("student", Some("cs")).unwrap(), Role::Student);
        assert!(Role::from_parts("root", None).is_err());
    }

    #[test]
    fn test_profile_update_validation() {
        let update = ProfileUpdate {
            display_name: "Asha".into(),
            college_id: "4SF22CS001".into(),
            department: "cs".into(),
            semester: 3,
        };
        assert!(update.validate().is_ok());

        let bad = ProfileUpdate {
            semester: 9,
            department: "xx".into(),
            ..update
        };
        let errors = bad.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("semester"));
        assert!(errors.field_errors().contains_key("department"));
    }
}
