//! PostgreSQL-backed data store
//!
//! Reads go through SeaORM entities. Every mutation is a single SQL statement
//! so concurrent writers compose: counters move with `col = col + n`, like
//! and saved sets are join tables guarded by their primary keys, and approval
//! is conditional on the row still being pending.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement, Value,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::models::*;
use super::notify::{Change, ChangeFeed};
use super::DbPool;
use crate::config::DatabaseConfig;
use crate::domain::{
    ApprovalOverrides, ChatMessage, ChatRole, Contributor, Identity, NewResource, ProfileUpdate,
    Resource, ResourceFilter, ResourceId, ResourceStatus, ResourceUpdate, Role, UserId, UserProfile,
};
use crate::errors::{AppError, Result};
use crate::store::{ChatHistoryStore, DataStore, Delivery, ProfileStore, ResourceStore, Subscription};

const ADD_LIKE: &str = r#"
    WITH added AS (
        INSERT INTO resource_likes (resource_id, user_id)
        SELECT $1, $2 WHERE EXISTS (SELECT 1 FROM resources WHERE id = $1)
        ON CONFLICT DO NOTHING
        RETURNING 1
    )
    UPDATE resources
    SET like_count = like_count + (SELECT COUNT(*) FROM added)
    WHERE id = $1
    RETURNING id
"#;

const REMOVE_LIKE: &str = r#"
    WITH removed AS (
        DELETE FROM resource_likes
        WHERE resource_id = $1 AND user_id = $2
        RETURNING 1
    )
    UPDATE resources
    SET like_count = GREATEST(like_count - (SELECT COUNT(*) FROM removed), 0)
    WHERE id = $1
    RETURNING id
"#;

const INCREMENT_VIEWS: &str = r#"
    UPDATE resources SET view_count = view_count + 1 WHERE id = $1 RETURNING id
"#;

const APPROVE: &str = r#"
    UPDATE resources
    SET status = 'approved',
        subject = COALESCE($2, subject),
        module = COALESCE($3, module),
        department = COALESCE($4, department),
        semester = COALESCE($5, semester),
        title = CASE
            WHEN $6 THEN btrim(COALESCE($2, subject)) || ' - ' || btrim(COALESCE($3, module))
            ELSE title
        END
    WHERE id = $1 AND status = 'pending'
    RETURNING id
"#;

const UPSERT_PROFILE: &str = r#"
    INSERT INTO users (uid, email, display_name, college_id, department, semester, role, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, 'student', NOW(), NOW())
    ON CONFLICT (uid) DO UPDATE
    SET display_name = EXCLUDED.display_name,
        college_id = EXCLUDED.college_id,
        department = EXCLUDED.department,
        semester = EXCLUDED.semester,
        updated_at = NOW()
"#;

const SAVE_RESOURCE: &str = r#"
    WITH owner AS (SELECT uid FROM users WHERE uid = $1),
    added AS (
        INSERT INTO saved_resources (uid, resource_id)
        SELECT uid, $2 FROM owner
        ON CONFLICT DO NOTHING
        RETURNING 1
    )
    SELECT COUNT(*) FROM owner
"#;

const UNSAVE_RESOURCE: &str = r#"
    WITH owner AS (SELECT uid FROM users WHERE uid = $1),
    removed AS (
        DELETE FROM saved_resources
        WHERE uid = $1 AND resource_id = $2
        RETURNING 1
    )
    SELECT COUNT(*) FROM owner
"#;

/// Data store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    feed: ChangeFeed,
}

impl PgStore {
    /// Connect, apply the schema if configured and start the change feed
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = DbPool::new(config).await?;
        if config.run_migrations {
            pool.migrate().await?;
        }
        let feed = ChangeFeed::start(&config.url).await?;
        Ok(Self { pool, feed })
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    fn statement(sql: &str, values: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }

    /// Run a `RETURNING id` statement against one resource
    async fn mutate_resource(&self, id: &ResourceId, sql: &str, values: Vec<Value>) -> Result<()> {
        match self.conn().query_one(Self::statement(sql, values)).await? {
            Some(_) => Ok(()),
            None => Err(AppError::ResourceNotFound { id: id.to_string() }),
        }
    }

    async fn approve(&self, id: &ResourceId, overrides: &ApprovalOverrides) -> Result<()> {
        let values = vec![
            id.as_str().into(),
            overrides.subject.clone().into(),
            overrides.module.clone().into(),
            overrides.department.clone().into(),
            overrides.semester.map(i16::from).into(),
            overrides.retitles().into(),
        ];

        if self.conn().query_one(Self::statement(APPROVE, values)).await?.is_some() {
            return Ok(());
        }

        // Nothing matched: either gone or no longer pending
        match self.get_resource(id).await? {
            Some(existing) => Err(AppError::InvalidTransition {
                from: existing.status.to_string(),
                to: ResourceStatus::Approved.to_string(),
            }),
            None => Err(AppError::ResourceNotFound { id: id.to_string() }),
        }
    }

    /// Attach liker sets to resource rows
    async fn hydrate(&self, rows: Vec<ResourceRow>) -> Result<Vec<Resource>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut likes: HashMap<String, BTreeSet<UserId>> = HashMap::new();
        for like in ResourceLikeEntity::find()
            .filter(ResourceLikeColumn::ResourceId.is_in(ids))
            .all(self.conn())
            .await?
        {
            likes
                .entry(like.resource_id)
                .or_default()
                .insert(UserId::new(like.user_id));
        }

        rows.into_iter()
            .map(|row| {
                let liked_by = likes.remove(&row.id).unwrap_or_default();
                resource_from_row(row, liked_by)
            })
            .collect()
    }

    async fn history(&self, uid: &UserId, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut rows = ChatMessageEntity::find()
            .filter(ChatMessageColumn::Uid.eq(uid.as_str()))
            .order_by_desc(ChatMessageColumn::CreatedAt)
            .order_by_desc(ChatMessageColumn::Id)
            .limit(limit as u64)
            .all(self.conn())
            .await?;
        rows.reverse();

        rows.into_iter()
            .map(|row| {
                Ok(ChatMessage {
                    role: ChatRole::parse(&row.role)?,
                    text: row.text,
                    created_at: row.created_at.with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// Spawn a live query: evaluate, publish, then re-evaluate whenever a
    /// relevant change arrives. Ends when the subscription is dropped.
    fn watch<T, F, Fut, R>(&self, relevant: R, load: F) -> Subscription<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send,
        R: Fn(&Change) -> bool + Send + Sync + 'static,
    {
        let (publisher, subscription) = Subscription::channel();
        let mut changes = self.feed.subscribe();

        let feeder = tokio::spawn(async move {
            loop {
                let delivery = match load().await {
                    Ok(value) => Delivery::Snapshot(value),
                    Err(e) => {
                        warn!(error = %e, "Live query failed");
                        Delivery::Failed(e.to_string())
                    }
                };
                if !publisher.publish(delivery) {
                    return;
                }

                loop {
                    tokio::select! {
                        _ = publisher.closed() => return,
                        received = changes.recv() => match received {
                            Ok(change) if change == Change::Resync || relevant(&change) => break,
                            Ok(_) => {}
                            // Missed notifications: refresh to be safe
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(skipped, "Change feed lagged");
                                break;
                            }
                            Err(RecvError::Closed) => return,
                        }
                    }
                }
            }
        });

        subscription.with_feeder(feeder)
    }
}

fn narrow_semester(value: i16) -> Result<u8> {
    u8::try_from(value).map_err(|_| AppError::InvalidFormat {
        message: format!("semester {} out of range", value),
    })
}

fn resource_from_row(row: ResourceRow, liked_by: BTreeSet<UserId>) -> Result<Resource> {
    Ok(Resource {
        id: ResourceId::new(row.id),
        title: row.title,
        subject: row.subject,
        module: row.module,
        department: row.department,
        semester: narrow_semester(row.semester)?,
        faculty_name: row.faculty_name,
        syllabus_year: row.syllabus_year,
        file_url: row.file_url,
        file_kind: row.file_kind.parse()?,
        status: row.status.parse()?,
        contributor: Contributor {
            id: UserId::new(row.contributor_id),
            name: row.contributor_name,
            email: row.contributor_email,
        },
        created_at: row.created_at.with_timezone(&Utc),
        view_count: row.view_count.max(0) as u64,
        like_count: row.like_count.max(0) as u64,
        liked_by,
    })
}

fn profile_from_row(row: UserRow, saved: BTreeSet<ResourceId>) -> Result<UserProfile> {
    Ok(UserProfile {
        role: Role::from_parts(&row.role, row.admin_scope.as_deref())?,
        uid: UserId::new(row.uid),
        email: row.email,
        display_name: row.display_name,
        college_id: row.college_id,
        department: row.department,
        semester: narrow_semester(row.semester)?,
        saved,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    })
}

fn resource_condition(filter: &ResourceFilter) -> Condition {
    let mut condition = Condition::all();
    if let Some(department) = &filter.department {
        condition = condition.add(ResourceColumn::Department.eq(department.as_str()));
    }
    if let Some(semester) = filter.semester {
        condition = condition.add(ResourceColumn::Semester.eq(i16::from(semester)));
    }
    if let Some(subject) = &filter.subject {
        condition = condition.add(ResourceColumn::Subject.eq(subject.as_str()));
    }
    if let Some(status) = filter.status {
        condition = condition.add(ResourceColumn::Status.eq(status.as_str()));
    }
    if let Some(contributor) = &filter.contributor {
        condition = condition.add(ResourceColumn::ContributorId.eq(contributor.as_str()));
    }
    condition
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn insert_resource(&self, new: NewResource) -> Result<Resource> {
        let resource = new.into_resource(ResourceId::generate(), Utc::now());

        let row = ResourceActiveModel {
            id: Set(resource.id.to_string()),
            title: Set(resource.title),
            subject: Set(resource.subject),
            module: Set(resource.module),
            department: Set(resource.department),
            semester: Set(i16::from(resource.semester)),
            faculty_name: Set(resource.faculty_name),
            syllabus_year: Set(resource.syllabus_year),
            file_url: Set(resource.file_url),
            file_kind: Set(resource.file_kind.as_str().to_string()),
            status: Set(resource.status.as_str().to_string()),
            contributor_id: Set(resource.contributor.id.to_string()),
            contributor_name: Set(resource.contributor.name),
            contributor_email: Set(resource.contributor.email),
            view_count: Set(0),
            like_count: Set(0),
            created_at: Set(resource.created_at.into()),
        }
        .insert(self.conn())
        .await?;

        info!(resource_id = %row.id, department = %row.department, "Resource inserted");
        resource_from_row(row, BTreeSet::new())
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        let row = ResourceEntity::find_by_id(id.to_string()).one(self.conn()).await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update_resource(&self, id: &ResourceId, update: ResourceUpdate) -> Result<()> {
        match &update {
            ResourceUpdate::Approve(overrides) => self.approve(id, overrides).await,
            ResourceUpdate::IncrementViews => {
                self.mutate_resource(id, INCREMENT_VIEWS, vec![id.as_str().into()]).await
            }
            ResourceUpdate::AddLike(uid) => {
                self.mutate_resource(id, ADD_LIKE, vec![id.as_str().into(), uid.as_str().into()])
                    .await
            }
            ResourceUpdate::RemoveLike(uid) => {
                self.mutate_resource(id, REMOVE_LIKE, vec![id.as_str().into(), uid.as_str().into()])
                    .await
            }
        }
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<bool> {
        let result = ResourceEntity::delete_by_id(id.to_string())
            .exec(self.conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn query_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        let rows = ResourceEntity::find()
            .filter(resource_condition(filter))
            .order_by_desc(ResourceColumn::CreatedAt)
            .order_by_asc(ResourceColumn::Id)
            .all(self.conn())
            .await?;
        self.hydrate(rows).await
    }

    async fn watch_resources(&self, filter: ResourceFilter) -> Result<Subscription<Vec<Resource>>> {
        let store = self.clone();
        Ok(self.watch(
            |change| matches!(change, Change::Resources),
            move || {
                let store = store.clone();
                let filter = filter.clone();
                async move { store.query_resources(&filter).await }
            },
        ))
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>> {
        let Some(row) = UserEntity::find_by_id(uid.to_string()).one(self.conn()).await? else {
            return Ok(None);
        };

        let saved = SavedResourceEntity::find()
            .filter(SavedResourceColumn::Uid.eq(uid.as_str()))
            .all(self.conn())
            .await?
            .into_iter()
            .map(|s| ResourceId::new(s.resource_id))
            .collect();

        profile_from_row(row, saved).map(Some)
    }

    async fn upsert_profile(&self, identity: &Identity, update: ProfileUpdate) -> Result<UserProfile> {
        let values = vec![
            identity.uid.as_str().into(),
            identity.email.as_str().into(),
            update.display_name.into(),
            update.college_id.into(),
            update.department.into(),
            i16::from(update.semester).into(),
        ];
        self.conn().execute(Self::statement(UPSERT_PROFILE, values)).await?;

        self.get_profile(&identity.uid)
            .await?
            .ok_or_else(|| AppError::ProfileNotFound {
                uid: identity.uid.to_string(),
            })
    }

    async fn set_role(&self, uid: &UserId, role: Role) -> Result<()> {
        let scope: Option<String> = role.admin_scope().map(|s| s.to_string());
        let result = self
            .conn()
            .execute(Self::statement(
                "UPDATE users SET role = $2, admin_scope = $3, updated_at = NOW() WHERE uid = $1",
                vec![uid.as_str().into(), role.as_str().into(), scope.into()],
            ))
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ProfileNotFound { uid: uid.to_string() });
        }
        info!(uid = %uid, role = role.as_str(), "Role updated");
        Ok(())
    }

    async fn update_saved(&self, uid: &UserId, resource: &ResourceId, saved: bool) -> Result<()> {
        let sql = if saved { SAVE_RESOURCE } else { UNSAVE_RESOURCE };
        let row = self
            .conn()
            .query_one(Self::statement(sql, vec![uid.as_str().into(), resource.as_str().into()]))
            .await?
            .ok_or_else(|| AppError::store("saved-set update returned no row"))?;

        let owners: i64 = row.try_get_by_index(0).map_err(DbErr::from)?;
        if owners == 0 {
            return Err(AppError::ProfileNotFound { uid: uid.to_string() });
        }
        Ok(())
    }

    async fn watch_profile(&self, uid: &UserId) -> Result<Subscription<Option<UserProfile>>> {
        let store = self.clone();
        let watched = uid.clone();
        let uid = uid.clone();
        Ok(self.watch(
            move |change| matches!(change, Change::Profile(changed) if *changed == watched),
            move || {
                let store = store.clone();
                let uid = uid.clone();
                async move { store.get_profile(&uid).await }
            },
        ))
    }
}

#[async_trait]
impl ChatHistoryStore for PgStore {
    async fn append_message(&self, uid: &UserId, message: ChatMessage) -> Result<()> {
        ChatMessageActiveModel {
            uid: Set(uid.to_string()),
            role: Set(message.role.as_str().to_string()),
            text: Set(message.text),
            created_at: Set(message.created_at.into()),
            ..Default::default()
        }
        .insert(self.conn())
        .await?;
        Ok(())
    }

    async fn watch_history(&self, uid: &UserId, limit: usize) -> Result<Subscription<Vec<ChatMessage>>> {
        let store = self.clone();
        let watched = uid.clone();
        let uid = uid.clone();
        Ok(self.watch(
            move |change| matches!(change, Change::Chat(changed) if *changed == watched),
            move || {
                let store = store.clone();
                let uid = uid.clone();
                async move { store.history(&uid, limit).await }
            },
        ))
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
