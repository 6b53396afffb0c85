//! Domain types shared by the store, workflow and gateway layers

mod chat;
mod profile;
mod resource;

pub use chat::{ChatMessage, ChatRole};
pub use profile::{AdminScope, Identity, ProfileUpdate, Role, UserId, UserProfile};
pub use resource::{
    ApprovalOverrides, Contributor, FileKind, NewResource, Resource, ResourceFilter, ResourceId,
    ResourceStatus, ResourceUpdate,
};
