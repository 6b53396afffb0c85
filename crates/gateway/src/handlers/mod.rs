//! API handlers module

pub mod chat;
pub mod health;
pub mod live;
pub mod moderation;
pub mod profile;
pub mod resources;
pub mod subjects;

use crate::AppState;
use studyvault_common::auth::AuthContext;
use studyvault_common::domain::UserProfile;
use studyvault_common::errors::{AppError, Result};
use studyvault_common::store::ProfileStore;

/// Stored profile of the caller; handlers that act on behalf of a role need one
pub(crate) async fn acting_profile(state: &AppState, auth: &AuthContext) -> Result<UserProfile> {
    state
        .store
        .get_profile(&auth.identity.uid)
        .await?
        .ok_or(AppError::ProfileRequired)
}
