//! Per-session state and navigation
//!
//! The controller owns everything a signed-in user's session knows: who
//! they are, their profile, the chat transcript, the resource they have
//! open and the folder they are browsing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use studyvault_common::auth::ensure_domain;
use studyvault_common::domain::{
    AdminScope, ChatMessage, FileKind, Identity, ProfileUpdate, Resource, ResourceFilter,
    ResourceId, Role, UserId, UserProfile,
};
use studyvault_common::errors::{AppError, Result};
use studyvault_common::store::{DataStore, Delivery, ProfileStore, Subscription};
use tracing::{info, warn};
use validator::Validate;

use crate::chat::{ChatContext, Conversation};
use crate::lifecycle::ResourceLifecycle;

/// Turns of persisted chat history loaded into a session
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Anonymous,
    ProfileRequired,
    Ready,
}

/// The document currently open in the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewedResource {
    pub id: ResourceId,
    pub url: String,
    pub kind: FileKind,
}

#[derive(Debug, Default)]
pub struct SessionContext {
    pub identity: Option<Identity>,
    pub profile: Option<UserProfile>,
    pub conversation: Conversation,
    pub viewing: Option<ViewedResource>,
    pub folder: Vec<Resource>,
}

impl SessionContext {
    pub fn stage(&self) -> SessionStage {
        match (&self.identity, &self.profile) {
            (None, _) => SessionStage::Anonymous,
            (Some(_), None) => SessionStage::ProfileRequired,
            (Some(_), Some(_)) => SessionStage::Ready,
        }
    }

    /// What the assistant is told about the current view
    pub fn chat_context(&self) -> ChatContext {
        ChatContext {
            file_url: self.viewing.as_ref().map(|v| v.url.clone()),
            file_type: self.viewing.as_ref().map(|v| v.kind.as_str().to_string()),
            resource_list: self.folder.iter().map(Resource::listing_label).collect(),
        }
    }
}

/// Accounts granted admin rights when they complete their profile
#[derive(Debug, Clone, Default)]
pub struct AdminRoster {
    scopes: HashMap<UserId, AdminScope>,
}

impl AdminRoster {
    /// Build from `uid -> scope` config entries
    pub fn from_config(entries: &HashMap<String, String>) -> Result<Self> {
        let scopes = entries
            .iter()
            .map(|(uid, scope)| Ok((UserId::new(uid.as_str()), scope.parse::<AdminScope>()?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { scopes })
    }

    pub fn scope_for(&self, uid: &UserId) -> Option<&AdminScope> {
        self.scopes.get(uid)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Validate and upsert the caller's profile, granting roster roles
pub async fn complete_profile<S: ProfileStore + ?Sized>(
    store: &S,
    identity: &Identity,
    update: ProfileUpdate,
    roster: &AdminRoster,
) -> Result<UserProfile> {
    let update = ProfileUpdate {
        display_name: update.display_name.trim().to_string(),
        college_id: update.college_id.trim().to_uppercase(),
        department: update.department.trim().to_ascii_lowercase(),
        semester: update.semester,
    };
    update.validate()?;

    let mut profile = store.upsert_profile(identity, update).await?;

    if let Some(scope) = roster.scope_for(&identity.uid) {
        let role = Role::Admin(scope.clone());
        if profile.role != role {
            store.set_role(&identity.uid, role.clone()).await?;
            info!(uid = %identity.uid, scope = %scope, "Admin role granted");
            profile.role = role;
        }
    }

    Ok(profile)
}

/// Profile page contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilePage {
    pub profile: UserProfile,
    pub saved: Vec<Resource>,
    pub contributions: Vec<Resource>,
    pub message: &'static str,
}

/// Encouragement shown for a contribution count
pub fn motivational_message(contributions: usize) -> &'static str {
    match contributions {
        0 => "Start your journey by sharing your first note!",
        1..=4 => "Great start! Keep sharing knowledge.",
        5..=9 => "You're a star contributor! 🌟",
        _ => "Legendary! Your juniors thank you. 👑",
    }
}

/// Drives one user's session
pub struct SessionController<S: DataStore + ?Sized> {
    store: Arc<S>,
    lifecycle: ResourceLifecycle<S>,
    allowed_domain: String,
    roster: AdminRoster,
    context: SessionContext,
    history: Option<Subscription<Vec<ChatMessage>>>,
}

impl<S: DataStore + ?Sized> SessionController<S> {
    pub fn new(lifecycle: ResourceLifecycle<S>, allowed_domain: impl Into<String>, roster: AdminRoster) -> Self {
        Self {
            store: lifecycle.store().clone(),
            lifecycle,
            allowed_domain: allowed_domain.into(),
            roster,
            context: SessionContext::default(),
            history: None,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.context
    }

    pub fn stage(&self) -> SessionStage {
        self.context.stage()
    }

    /// Start a session. Identities outside the institution domain end the
    /// session and leave it anonymous.
    pub async fn sign_in(&mut self, identity: Identity) -> Result<SessionStage> {
        if let Err(e) = ensure_domain(&identity, &self.allowed_domain) {
            warn!(email = %identity.email, "Sign-in refused for foreign domain");
            self.sign_out();
            return Err(e);
        }

        self.context = SessionContext::default();
        self.context.profile = self.store.get_profile(&identity.uid).await?;
        self.history = Some(self.store.watch_history(&identity.uid, HISTORY_LIMIT).await?);
        info!(uid = %identity.uid, has_profile = self.context.profile.is_some(), "Signed in");
        self.context.identity = Some(identity);

        Ok(self.stage())
    }

    pub async fn complete_profile(&mut self, update: ProfileUpdate) -> Result<&UserProfile> {
        let identity = self.context.identity.as_ref().ok_or_else(|| AppError::AuthRequired {
            action: "complete your profile".to_string(),
        })?;
        let profile = complete_profile(self.store.as_ref(), identity, update, &self.roster).await?;
        Ok(&*self.context.profile.insert(profile))
    }

    /// Identity and profile of a fully set-up session
    pub fn require_ready(&self) -> Result<(&Identity, &UserProfile)> {
        let identity = self.context.identity.as_ref().ok_or_else(|| AppError::AuthRequired {
            action: "continue".to_string(),
        })?;
        let profile = self.context.profile.as_ref().ok_or(AppError::ProfileRequired)?;
        Ok((identity, profile))
    }

    /// Open a resource in the viewer and count the view
    pub async fn open_resource(&mut self, resource: &Resource) -> Result<&ViewedResource> {
        let identity = self.context.identity.as_ref().ok_or_else(|| AppError::AuthRequired {
            action: "view resources".to_string(),
        })?;
        self.lifecycle.record_view(identity, &resource.id).await;

        Ok(&*self.context.viewing.insert(ViewedResource {
            id: resource.id.clone(),
            url: resource.file_url.clone(),
            kind: resource.file_kind,
        }))
    }

    pub fn close_resource(&mut self) {
        self.context.viewing = None;
    }

    /// Record the folder being browsed; its listing is shared with the assistant
    pub fn set_folder(&mut self, resources: Vec<Resource>) {
        self.context.folder = resources;
    }

    pub fn sign_out(&mut self) {
        if let Some(identity) = &self.context.identity {
            info!(uid = %identity.uid, "Signed out");
        }
        self.history = None;
        self.context = SessionContext::default();
    }

    /// Wait for the next history snapshot and fold it into the transcript.
    /// `None` when no history is being followed.
    pub async fn sync_history(&mut self) -> Option<Result<()>> {
        let delivery = self.history.as_mut()?.next().await?;
        Some(match delivery {
            Delivery::Snapshot(history) => {
                self.context.conversation.replace_with_history(history);
                Ok(())
            }
            Delivery::Failed(message) => Err(AppError::Store { message }),
        })
    }

    /// Saved resources and contributions of the signed-in user
    pub async fn profile_page(&self) -> Result<ProfilePage> {
        let (identity, profile) = self.require_ready()?;
        build_profile_page(self.store.as_ref(), &identity.uid, profile.clone()).await
    }
}

/// Resolve a profile's saved ids and contributions. Saved ids whose resource
/// no longer exists are skipped.
pub async fn build_profile_page<S: DataStore + ?Sized>(
    store: &S,
    uid: &UserId,
    profile: UserProfile,
) -> Result<ProfilePage> {
    let mut saved = Vec::with_capacity(profile.saved.len());
    for id in &profile.saved {
        match store.get_resource(id).await? {
            Some(resource) => saved.push(resource),
            None => warn!(resource_id = %id, "Saved resource no longer exists"),
        }
    }

    let contributions = store
        .query_resources(&ResourceFilter::new().contributor(uid.clone()))
        .await?;

    Ok(ProfilePage {
        message: motivational_message(contributions.len()),
        profile,
        saved,
        contributions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ensure_scope;
    use crate::lifecycle::tests::{setup, student, submitted};
    use crate::submission::{self, SubmissionMetadata};
    use studyvault_common::media::MockMediaStore;
    use studyvault_common::store::{ChatHistoryStore, MemoryStore, ProfileStore, ResourceStore};

    fn form() -> ProfileUpdate {
        ProfileUpdate {
            display_name: " Asha ".into(),
            college_id: "4sf21cs001".into(),
            department: "CS".into(),
            semester: 3,
        }
    }

    fn controller(store: Arc<MemoryStore>, roster: AdminRoster) -> SessionController<MemoryStore> {
        let lifecycle = ResourceLifecycle::new(store, Arc::new(MockMediaStore::new()));
        SessionController::new(lifecycle, "sahyadri.edu.in", roster)
    }

    #[tokio::test]
    async fn test_sign_in_stages() {
        let store = Arc::new(MemoryStore::new());
        let mut session = controller(store, AdminRoster::default());
        assert_eq!(session.stage(), SessionStage::Anonymous);

        let stage = session.sign_in(student()).await.unwrap();
        assert_eq!(stage, SessionStage::ProfileRequired);
        assert!(matches!(session.require_ready(), Err(AppError::ProfileRequired)));

        let profile = session.complete_profile(form()).await.unwrap();
        assert_eq!(profile.display_name, "Asha");
        assert_eq!(profile.college_id, "4SF21CS001");
        assert_eq!(profile.department, "cs");
        assert_eq!(profile.role, Role::Student);
        assert_eq!(session.stage(), SessionStage::Ready);

        session.sign_out();
        assert_eq!(session.stage(), SessionStage::Anonymous);
        assert!(session.context().profile.is_none());
    }

    #[tokio::test]
    async fn test_foreign_domain_stays_anonymous() {
        let store = Arc::new(MemoryStore::new());
        let mut session = controller(store, AdminRoster::default());
        session.sign_in(student()).await.unwrap();

        let err = session
            .sign_in(Identity::new("x1", "someone@gmail.com", "Someone"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DomainRestricted { .. }));
        assert_eq!(session.stage(), SessionStage::Anonymous);
    }

    #[tokio::test]
    async fn test_roster_grants_admin_role() {
        let store = Arc::new(MemoryStore::new());
        let entries = HashMap::from([("u1".to_string(), "cs".to_string())]);
        let roster = AdminRoster::from_config(&entries).unwrap();
        let mut session = controller(store.clone(), roster);

        session.sign_in(student()).await.unwrap();
        let profile = session.complete_profile(form()).await.unwrap();
        assert_eq!(profile.role, Role::Admin(AdminScope::Department("cs".into())));

        let stored = store.get_profile(&student().uid).await.unwrap().unwrap();
        assert_eq!(stored.role, profile.role);
    }

    #[test]
    fn test_roster_scope_matches_normalized_departments() {
        let entries = HashMap::from([("u1".to_string(), "CS".to_string())]);
        let roster = AdminRoster::from_config(&entries).unwrap();
        assert_eq!(roster.len(), 1);

        let scope = roster.scope_for(&student().uid).unwrap();
        let upload = SubmissionMetadata {
            department: "CS".into(),
            ..submission::tests::metadata()
        };
        let department = upload.normalized().department;
        assert!(scope.permits(&department));
        assert!(ensure_scope(scope, &department).is_ok());
    }

    #[test]
    fn test_roster_rejects_unknown_scope() {
        let entries = HashMap::from([("u1".to_string(), "astrology".to_string())]);
        assert!(AdminRoster::from_config(&entries).is_err());
    }

    #[tokio::test]
    async fn test_invalid_profile_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let mut session = controller(store.clone(), AdminRoster::default());
        session.sign_in(student()).await.unwrap();

        let err = session
            .complete_profile(ProfileUpdate {
                semester: 12,
                ..form()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(store.write_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_open_resource_counts_view() {
        let (store, _media, lifecycle) = setup();
        let resource = submitted(&lifecycle, "cs").await;
        let mut session = SessionController::new(lifecycle, "sahyadri.edu.in", AdminRoster::default());

        assert!(session.open_resource(&resource).await.is_err());

        session.sign_in(student()).await.unwrap();
        let viewing = session.open_resource(&resource).await.unwrap().clone();
        assert_eq!(viewing.url, resource.file_url);
        assert_eq!(viewing.kind, FileKind::Pdf);

        session.set_folder(vec![resource.clone()]);
        let context = session.context().chat_context();
        assert_eq!(context.file_type.as_deref(), Some("pdf"));
        assert_eq!(context.resource_list, vec!["Maths - Module 2 (by Dr. Rao)".to_string()]);

        let current = store.get_resource(&resource.id).await.unwrap().unwrap();
        assert_eq!(current.view_count, 1);
    }

    #[tokio::test]
    async fn test_profile_page_skips_missing_saved() {
        let (store, _media, lifecycle) = setup();
        let mine = submitted(&lifecycle, "cs").await;
        let mut session = SessionController::new(lifecycle, "sahyadri.edu.in", AdminRoster::default());
        session.sign_in(student()).await.unwrap();
        session.complete_profile(form()).await.unwrap();

        let uid = student().uid;
        store.update_saved(&uid, &mine.id, true).await.unwrap();
        store.update_saved(&uid, &ResourceId::new("gone"), true).await.unwrap();
        session.context_mut().profile = store.get_profile(&uid).await.unwrap();

        let page = session.profile_page().await.unwrap();
        assert_eq!(page.saved, vec![mine.clone()]);
        assert_eq!(page.contributions, vec![mine]);
        assert_eq!(page.message, "Great start! Keep sharing knowledge.");
    }

    #[tokio::test]
    async fn test_history_sync_replaces_transcript() {
        let store = Arc::new(MemoryStore::new());
        let mut session = controller(store.clone(), AdminRoster::default());
        session.sign_in(student()).await.unwrap();

        // Initial snapshot is empty: greeting stays
        session.sync_history().await.unwrap().unwrap();
        assert_eq!(session.context().conversation.messages().len(), 1);

        store
            .append_message(&student().uid, ChatMessage::user("hi"))
            .await
            .unwrap();
        session.sync_history().await.unwrap().unwrap();
        assert_eq!(session.context().conversation.messages()[0].text, "hi");
    }

    #[test]
    fn test_motivational_thresholds() {
        assert_eq!(motivational_message(0), "Start your journey by sharing your first note!");
        assert_eq!(motivational_message(1), "Great start! Keep sharing knowledge.");
        assert_eq!(motivational_message(5), "You're a star contributor! 🌟");
        assert_eq!(motivational_message(10), "Legendary! Your juniors thank you. 👑");
    }
}
