//! Profile handlers

use axum::{extract::State, Json};
use studyvault_common::auth::AuthContext;
use studyvault_common::domain::{ProfileUpdate, UserProfile};
use studyvault_common::errors::Result;
use studyvault_workflow::{build_profile_page, complete_profile, ProfilePage};

use super::acting_profile;
use crate::AppState;

/// Profile page: saved resources, contributions and a motivational note
pub async fn get_profile(State(state): State<AppState>, auth: AuthContext) -> Result<Json<ProfilePage>> {
    let profile = acting_profile(&state, &auth).await?;
    let page = build_profile_page(state.store.as_ref(), &auth.identity.uid, profile).await?;
    Ok(Json(page))
}

/// Create or update the caller's own profile
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>> {
    let profile = complete_profile(state.store.as_ref(), &auth.identity, update, &state.roster).await?;

    tracing::info!(
        uid = %auth.identity.uid,
        department = %profile.department,
        request_id = %auth.request_id,
        "Profile saved"
    );

    Ok(Json(profile))
}
