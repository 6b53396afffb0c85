//! Moderation handlers for admins

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use studyvault_common::{
    auth::AuthContext,
    domain::{AdminScope, ApprovalOverrides, Resource, ResourceId, UserProfile},
    errors::{AppError, Result},
    store::Delivery,
};
use studyvault_workflow::{lifecycle::acting_scope, LiveProjection, PendingQueue};

use super::{acting_profile, live};
use crate::AppState;

/// Queue to review; admins default to their own scope
#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub scope: Option<AdminScope>,
}

fn requested_scope(acting: &UserProfile, query: ScopeQuery) -> Result<AdminScope> {
    match query.scope {
        Some(scope) => Ok(scope),
        None => acting_scope(acting, "review submissions").cloned(),
    }
}

/// Current pending submissions within the requested scope
pub async fn list_pending(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Vec<Resource>>> {
    let acting = acting_profile(&state, &auth).await?;
    let scope = requested_scope(&acting, query)?;

    let mut pending = state.lifecycle.list_pending(&acting, &scope).await?;
    match pending.next().await {
        Some(Delivery::Snapshot(resources)) => Ok(Json(resources)),
        Some(Delivery::Failed(message)) => Err(AppError::Store { message }),
        None => Err(AppError::ServiceUnavailable {
            message: "moderation subscription closed".to_string(),
        }),
    }
}

/// Live moderation queue
pub async fn live_pending(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ScopeQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let acting = acting_profile(&state, &auth).await?;
    let scope = requested_scope(&acting, query)?;

    let mut projection = LiveProjection::new(PendingQueue::new(state.lifecycle.clone(), acting));
    projection.focus(scope).await?;
    Ok(live::snapshots(projection, |resources: Vec<Resource>| resources))
}

/// Approve a submission, optionally correcting its metadata
pub async fn approve(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
    overrides: Option<Json<ApprovalOverrides>>,
) -> Result<Json<Resource>> {
    let acting = acting_profile(&state, &auth).await?;
    let overrides = overrides.map(|Json(o)| o).unwrap_or_default();
    let resource = state
        .lifecycle
        .approve(&acting, &ResourceId::new(id), overrides)
        .await?;
    Ok(Json(resource))
}

/// Reject a submission; the resource is deleted
pub async fn reject(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let acting = acting_profile(&state, &auth).await?;
    state.lifecycle.reject(&acting, &ResourceId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::create_router;
    use crate::tests::{bearer, body_json, test_state};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use studyvault_common::domain::{
        AdminScope, Contributor, FileKind, Identity, NewResource, ProfileUpdate, Role, UserId,
    };
    use studyvault_common::store::{ProfileStore, ResourceStore};
    use tower::ServiceExt;

    fn new_resource(department: &str) -> NewResource {
        NewResource {
            subject: "Maths".into(),
            module: "Module 1".into(),
            department: department.into(),
            semester: 3,
            faculty_name: "Dr. Rao".into(),
            syllabus_year: None,
            file_url: format!("https://media.test/raw/{department}/1-a.pdf"),
            file_kind: FileKind::Pdf,
            contributor: Contributor {
                id: UserId::new("u9"),
                name: "Ravi".into(),
                email: "ravi@sahyadri.edu.in".into(),
            },
        }
    }

    fn update() -> ProfileUpdate {
        ProfileUpdate {
            display_name: "Someone".into(),
            college_id: "4SF21CS001".into(),
            department: "cs".into(),
            semester: 3,
        }
    }

    #[tokio::test]
    async fn test_admin_approves_pending_resource() {
        let (state, store) = test_state();
        let admin = Identity::new("admin1", "head@sahyadri.edu.in", "Head");
        store.upsert_profile(&admin, update()).await.unwrap();
        store
            .set_role(&admin.uid, Role::Admin(AdminScope::All))
            .await
            .unwrap();
        let resource = store.insert_resource(new_resource("cs")).await.unwrap();

        let app = create_router(state.clone());
        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/moderation/pending")
                    .header(header::AUTHORIZATION, bearer(&state, &admin))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);

        let response = app
            .oneshot(
                Request::post(format!("/v1/moderation/{}/approve", resource.id))
                    .header(header::AUTHORIZATION, bearer(&state, &admin))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"module":"Module 4"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "approved");
        assert_eq!(json["title"], "Maths - Module 4");
    }

    #[tokio::test]
    async fn test_student_cannot_reject() {
        let (state, store) = test_state();
        let student = Identity::new("u1", "asha@sahyadri.edu.in", "Asha");
        store.upsert_profile(&student, update()).await.unwrap();
        let resource = store.insert_resource(new_resource("cs")).await.unwrap();

        let response = create_router(state.clone())
            .oneshot(
                Request::post(format!("/v1/moderation/{}/reject", resource.id))
                    .header(header::AUTHORIZATION, bearer(&state, &student))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(store.get_resource(&resource.id).await.unwrap().is_some());
    }
}
