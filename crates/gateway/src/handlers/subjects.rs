//! Subject folder listings

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::Stream;
use std::convert::Infallible;
use studyvault_common::catalog;
use studyvault_common::errors::{AppError, Result};
use studyvault_workflow::{FolderKey, LiveProjection, SubjectCatalog};

use super::live;
use crate::AppState;

fn folder(department: String, semester: u8) -> Result<FolderKey> {
    let department = department.trim().to_lowercase();
    if !catalog::is_known_department(&department) {
        return Err(AppError::NotFound {
            resource_type: "department".to_string(),
            id: department,
        });
    }
    Ok(FolderKey { department, semester })
}

/// Subjects for one department and semester
pub async fn list_subjects(
    State(state): State<AppState>,
    Path((department, semester)): Path<(String, u8)>,
) -> Result<Json<Vec<String>>> {
    let mut projection = LiveProjection::new(SubjectCatalog::new(state.store.clone()));
    projection.focus(folder(department, semester)?).await?;

    match projection.next().await {
        Some(subjects) => Ok(Json(subjects?)),
        None => Err(AppError::ServiceUnavailable {
            message: "subject subscription closed".to_string(),
        }),
    }
}

/// Live subject list for one department and semester
pub async fn live_subjects(
    State(state): State<AppState>,
    Path((department, semester)): Path<(String, u8)>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let mut projection = LiveProjection::new(SubjectCatalog::new(state.store.clone()));
    projection.focus(folder(department, semester)?).await?;
    Ok(live::snapshots(projection, |subjects: Vec<String>| subjects))
}
