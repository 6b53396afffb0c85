//! SeaORM entity models
//!
//! Database entities for StudyVault

mod chat_message;
mod resource;
mod resource_like;
mod saved_resource;
mod user;

pub use resource::{
    Entity as ResourceEntity,
    Model as ResourceRow,
    ActiveModel as ResourceActiveModel,
    Column as ResourceColumn,
};

pub use resource_like::{
    Entity as ResourceLikeEntity,
    Model as ResourceLike,
    Column as ResourceLikeColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as UserRow,
    Column as UserColumn,
};

pub use saved_resource::{
    Entity as SavedResourceEntity,
    Model as SavedResource,
    Column as SavedResourceColumn,
};

pub use chat_message::{
    Entity as ChatMessageEntity,
    Model as ChatMessageRow,
    ActiveModel as ChatMessageActiveModel,
    Column as ChatMessageColumn,
};
