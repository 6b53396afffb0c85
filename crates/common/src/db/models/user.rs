//! User profile entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub uid: String,

    #[sea_orm(column_type = "Text")]
    pub email: String,

    #[sea_orm(column_type = "Text")]
    pub display_name: String,

    #[sea_orm(column_type = "Text")]
    pub college_id: String,

    #[sea_orm(column_type = "Text")]
    pub department: String,

    pub semester: i16,

    /// student | faculty | admin
    #[sea_orm(column_type = "Text")]
    pub role: String,

    /// "all" or a department code; admins only
    #[sea_orm(column_type = "Text", nullable)]
    pub admin_scope: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::saved_resource::Entity")]
    Saved,

    #[sea_orm(has_many = "super::chat_message::Entity")]
    ChatMessages,
}

impl Related<super::saved_resource::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Saved.def()
    }
}

impl Related<super::chat_message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatMessages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
