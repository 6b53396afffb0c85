//! StudyVault Workflow
//!
//! Application logic on top of the common store, media and assistant
//! abstractions:
//! - Resource lifecycle (submit, moderate, delete, view counting)
//! - Optimistic likes and saves
//! - Live projections (subject folders, moderation queue)
//! - Session controller and profile page
//! - Assistant chat client

pub mod chat;
pub mod engagement;
pub mod lifecycle;
pub mod projection;
pub mod session;
pub mod submission;

pub use chat::{AssistantEndpoint, ChatClient, ChatContext, Conversation, HttpAssistantEndpoint};
pub use engagement::{LikeTracker, SaveTracker, ToggleOutcome};
pub use lifecycle::ResourceLifecycle;
pub use projection::{
    search, FolderKey, LiveProjection, PendingQueue, Projection, SubjectCatalog, SubjectKey,
    SubjectResources,
};
pub use session::{
    build_profile_page, complete_profile, AdminRoster, ProfilePage, SessionController,
    SessionContext, SessionStage, ViewedResource,
};
pub use submission::{SelectedFile, Selection, SubmissionMetadata};
