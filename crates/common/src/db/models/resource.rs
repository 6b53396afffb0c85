//! Resource entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "resources")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub subject: String,

    #[sea_orm(column_type = "Text")]
    pub module: String,

    #[sea_orm(column_type = "Text")]
    pub department: String,

    pub semester: i16,

    #[sea_orm(column_type = "Text")]
    pub faculty_name: String,

    pub syllabus_year: Option<i32>,

    #[sea_orm(column_type = "Text")]
    pub file_url: String,

    /// pdf | image | other
    #[sea_orm(column_type = "Text")]
    pub file_kind: String,

    /// pending | approved
    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub contributor_id: String,

    #[sea_orm(column_type = "Text")]
    pub contributor_name: String,

    #[sea_orm(column_type = "Text")]
    pub contributor_email: String,

    pub view_count: i64,

    pub like_count: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::resource_like::Entity")]
    Likes,
}

impl Related<super::resource_like::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Likes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
