use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub account_id: Uuid,
    /// Hex digest of the raw RFC 2822 bytes; content address for reuse
    /// across folders and UIDVALIDITY resets.
    pub sha256: String,
    pub size: i64,
    pub thread_id: Option<Uuid>,
    pub g_msgid: Option<i64>,
    pub g_thrid: Option<i64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub subject: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub from_addr: Option<String>,
    pub received_date: Option<chrono::DateTime<chrono::Utc>>,
    /// Set when the last referencing UID disappears; rows are swept later
    /// instead of deleted inline.
    pub marked_for_deletion: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
    #[sea_orm(
        belongs_to = "super::thread::Entity",
        from = "Column::ThreadId",
        to = "super::thread::Column::Id"
    )]
    Thread,
    #[sea_orm(has_many = "super::uid_record::Entity")]
    UidRecords,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::thread::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Thread.def()
    }
}

impl Related<super::uid_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UidRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
