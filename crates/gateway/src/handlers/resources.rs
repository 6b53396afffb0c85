//! Resource handlers: browsing, submission and engagement

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use studyvault_common::{
    auth::{AuthContext, MaybeAuth},
    domain::{Resource, ResourceFilter, ResourceId, ResourceStatus},
    errors::{AppError, Result},
    store::{ProfileStore, ResourceStore},
};
use studyvault_workflow::{
    search, LikeTracker, LiveProjection, SaveTracker, SelectedFile, Selection, SubjectKey,
    SubjectResources, SubmissionMetadata, ToggleOutcome,
};

use super::{acting_profile, live};
use crate::AppState;

/// Subject folder, optionally narrowed by a search query
#[derive(Debug, Deserialize)]
pub struct FolderQuery {
    pub department: String,
    pub semester: u8,
    pub subject: String,
    #[serde(default)]
    pub q: Option<String>,
}

impl FolderQuery {
    fn key(&self) -> SubjectKey {
        SubjectKey {
            department: self.department.clone(),
            semester: self.semester,
            subject: self.subject.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct SaveResponse {
    pub saved: bool,
}

/// Approved resources of one subject folder
pub async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<Vec<Resource>>> {
    let filter = ResourceFilter::new()
        .department(query.department.clone())
        .semester(query.semester)
        .subject(query.subject.clone())
        .status(ResourceStatus::Approved);
    let resources = state.store.query_resources(&filter).await?;
    Ok(Json(search(&resources, query.q.as_deref().unwrap_or_default())))
}

/// Live view of one subject folder
pub async fn live_resources(
    State(state): State<AppState>,
    Query(query): Query<FolderQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let mut projection = LiveProjection::new(SubjectResources::new(state.store.clone()));
    projection.focus(query.key()).await?;

    let needle = query.q.unwrap_or_default();
    Ok(live::snapshots(projection, move |resources: Vec<Resource>| search(&resources, &needle)))
}

/// Submit a resource for review.
///
/// Multipart fields: `subject`, `module`, `department`, `semester`,
/// `facultyName`, optional `syllabusYear`, one or more `file` parts and an
/// optional `convert=true` to combine image files into a PDF first.
pub async fn submit_resource(
    State(state): State<AppState>,
    auth: MaybeAuth,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Resource>)> {
    let identity = auth.0.map(|ctx| ctx.identity);
    let form = read_submission(multipart).await?;
    let mut selection = Selection::new(form.files)?;

    if form.convert && identity.is_some() && selection.has_images() {
        let subject = form.metadata.subject.clone();
        selection = tokio::task::spawn_blocking(move || -> Result<Selection> {
            selection.convert(&subject)?;
            Ok(selection)
        })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("conversion task failed: {}", e),
        })??;
    }

    let resource = state
        .lifecycle
        .submit(identity.as_ref(), form.metadata, &selection)
        .await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

/// Count a view of an opened resource
pub async fn record_view(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> StatusCode {
    state.lifecycle.record_view(&auth.identity, &ResourceId::new(id)).await;
    StatusCode::NO_CONTENT
}

/// Toggle the caller's like
pub async fn toggle_like(
    State(state): State<AppState>,
    auth: MaybeAuth,
    Path(id): Path<String>,
) -> Result<Json<ToggleOutcome>> {
    let identity = auth.0.map(|ctx| ctx.identity);
    let resource = find_resource(&state, &ResourceId::new(id)).await?;

    let mut tracker = LikeTracker::new(&resource, identity.as_ref().map(|i| &i.uid));
    let outcome = tracker.toggle(state.store.as_ref(), identity.as_ref()).await?;
    Ok(Json(outcome))
}

/// Toggle the resource in the caller's saved set
pub async fn toggle_save(
    State(state): State<AppState>,
    auth: MaybeAuth,
    Path(id): Path<String>,
) -> Result<Json<SaveResponse>> {
    let id = ResourceId::new(id);
    let identity = auth.0.map(|ctx| ctx.identity);
    let profile = match &identity {
        Some(identity) => Some(
            state
                .store
                .get_profile(&identity.uid)
                .await?
                .ok_or(AppError::ProfileRequired)?,
        ),
        None => None,
    };

    let mut tracker = SaveTracker::new(&id, profile.as_ref());
    let saved = tracker.toggle(state.store.as_ref(), identity.as_ref()).await?;
    Ok(Json(SaveResponse { saved }))
}

/// Delete a resource; admins only, within their scope
pub async fn delete_resource(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let acting = acting_profile(&state, &auth).await?;
    let resource = find_resource(&state, &ResourceId::new(id)).await?;
    state.lifecycle.delete(&acting, &resource).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn find_resource(state: &AppState, id: &ResourceId) -> Result<Resource> {
    state
        .store
        .get_resource(id)
        .await?
        .ok_or_else(|| AppError::ResourceNotFound { id: id.to_string() })
}

struct SubmissionForm {
    metadata: SubmissionMetadata,
    files: Vec<SelectedFile>,
    convert: bool,
}

async fn read_submission(mut multipart: Multipart) -> Result<SubmissionForm> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(invalid_multipart)?;
            files.push(SelectedFile::new(file_name, content_type, bytes.to_vec()));
        } else {
            let value = field.text().await.map_err(invalid_multipart)?;
            fields.insert(name, value);
        }
    }

    let metadata = SubmissionMetadata {
        subject: required(&mut fields, "subject")?,
        module: required(&mut fields, "module")?,
        department: required(&mut fields, "department")?,
        semester: parse_number(&required(&mut fields, "semester")?, "semester")?,
        faculty_name: required(&mut fields, "facultyName")?,
        syllabus_year: match fields.remove("syllabusYear").filter(|v| !v.trim().is_empty()) {
            Some(year) => Some(parse_number(&year, "syllabusYear")?),
            None => None,
        },
    };
    let convert = fields
        .remove("convert")
        .map_or(false, |v| v.trim().eq_ignore_ascii_case("true"));

    Ok(SubmissionForm {
        metadata,
        files,
        convert,
    })
}

fn required(fields: &mut HashMap<String, String>, name: &str) -> Result<String> {
    fields.remove(name).ok_or_else(|| AppError::MissingField {
        field: name.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value.trim().parse().map_err(|_| AppError::Validation {
        message: format!("{} must be a number", field),
        field: Some(field.to_string()),
    })
}

fn invalid_multipart(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::InvalidFormat {
        message: format!("invalid multipart body: {}", e),
    }
}
